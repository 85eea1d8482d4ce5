//! In-memory bucket for tests
//!
//! Records every call so tests can assert which keys were consulted, and can
//! fail every operation touching a given key prefix.

use super::{validate_key, ObjectSummary, RemoteStore};
use crate::error::{RemoteError, RemoteResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{Cursor, Read};

/// A call observed by [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Exists(String),
    Get(String),
    Put(String),
    List(String),
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RefCell<BTreeMap<String, StoredObject>>,
    calls: RefCell<Vec<StoreCall>>,
    failing: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation whose key or prefix starts with `prefix`
    pub fn fail_on(mut self, prefix: impl Into<String>) -> Self {
        self.failing.push(prefix.into());
        self
    }

    /// Seed an object with an explicit modification time
    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>, last_modified: DateTime<Utc>) {
        self.objects.borrow_mut().insert(
            key.into(),
            StoredObject {
                body: body.into(),
                last_modified,
            },
        );
    }

    /// Body stored under `key`
    pub fn body(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.borrow().get(key).map(|o| o.body.clone())
    }

    /// Every call made so far, oldest first
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: StoreCall) -> RemoteResult<()> {
        let target = match &call {
            StoreCall::Exists(k) | StoreCall::Get(k) | StoreCall::Put(k) | StoreCall::List(k) => k.clone(),
        };
        self.calls.borrow_mut().push(call);
        if self.failing.iter().any(|p| target.starts_with(p.as_str())) {
            return Err(RemoteError::Backend(format!("injected failure for {}", target)));
        }
        Ok(())
    }
}

impl RemoteStore for MemoryStore {
    fn exists(&self, key: &str) -> RemoteResult<bool> {
        self.record(StoreCall::Exists(key.to_string()))?;
        validate_key(key)?;
        Ok(self.objects.borrow().contains_key(key))
    }

    fn get(&self, key: &str) -> RemoteResult<Option<Box<dyn Read>>> {
        self.record(StoreCall::Get(key.to_string()))?;
        validate_key(key)?;
        Ok(self
            .objects
            .borrow()
            .get(key)
            .map(|o| Box::new(Cursor::new(o.body.clone())) as Box<dyn Read>))
    }

    fn put(&self, key: &str, body: &mut dyn Read, content_md5: &str) -> RemoteResult<u64> {
        self.record(StoreCall::Put(key.to_string()))?;
        validate_key(key)?;

        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes)
            .map_err(|e| RemoteError::io("put", key, e))?;
        let actual = STANDARD.encode(Md5::digest(&bytes));
        if actual != content_md5 {
            return Err(RemoteError::Integrity {
                key: key.to_string(),
                expected: content_md5.to_string(),
                actual,
            });
        }

        let size = bytes.len() as u64;
        self.insert(key, bytes, Utc::now());
        Ok(size)
    }

    fn list_by_prefix(&self, prefix: &str) -> RemoteResult<Vec<ObjectSummary>> {
        self.record(StoreCall::List(prefix.to_string()))?;
        Ok(self
            .objects
            .borrow()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, o)| ObjectSummary {
                key: k.clone(),
                last_modified: o.last_modified,
                size: o.body.len() as u64,
            })
            .collect())
    }

    fn describe(&self) -> String {
        "in-memory bucket".to_string()
    }
}
