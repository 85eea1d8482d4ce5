//! Blob store abstraction
//!
//! The cache flows only ever talk to a [`RemoteStore`]:
//! - `local`: directory-backed buckets on disk
//! - `memory`: in-process fake for tests
//!
//! "Not found" is an ordinary outcome (`Ok(false)` / `Ok(None)`), never an
//! error; every other backend failure surfaces as [`RemoteError`].

mod local;
mod memory;

pub use local::LocalStore;
pub use memory::{MemoryStore, StoreCall};

use crate::config::schema::StoreConfig;
use crate::error::{RemoteError, RemoteResult, StowawayResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::Serialize;
use std::io::{self, Read};

/// One stored object as reported by a prefix listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSummary {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

/// Capability interface over a bucket of immutable objects
pub trait RemoteStore {
    /// Whether an object is stored under `key`
    fn exists(&self, key: &str) -> RemoteResult<bool>;

    /// Open the body of `key`, or `None` when nothing is stored there
    fn get(&self, key: &str) -> RemoteResult<Option<Box<dyn Read>>>;

    /// Upload `body` under `key`, overwriting any previous object
    ///
    /// `content_md5` is the base64 MD5 of the body; the store rejects the
    /// upload with [`RemoteError::Integrity`] when the received bytes differ.
    /// Returns the number of bytes stored.
    fn put(&self, key: &str, body: &mut dyn Read, content_md5: &str) -> RemoteResult<u64>;

    /// All objects whose key starts with `prefix`, in key order
    fn list_by_prefix(&self, prefix: &str) -> RemoteResult<Vec<ObjectSummary>>;

    /// Human-readable location for messages
    fn describe(&self) -> String;
}

/// Base64 MD5 digest of everything `reader` yields, as sent in `Content-MD5`
pub fn content_md5<R: Read + ?Sized>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Open the configured store for `bucket`
pub fn create_store(config: &StoreConfig, bucket: &str) -> StowawayResult<Box<dyn RemoteStore>> {
    let root = config.resolved_root()?;
    Ok(Box::new(LocalStore::open(root, bucket)?))
}

/// Reject object keys that cannot name a blob
pub(crate) fn validate_key(key: &str) -> RemoteResult<()> {
    let invalid = |reason: &str| {
        Err(RemoteError::InvalidKey {
            key: key.to_string(),
            reason: reason.to_string(),
        })
    };

    if key.is_empty() {
        return invalid("key is empty");
    }
    if key.starts_with('/') {
        return invalid("key must not start with '/'");
    }
    if key.contains('\0') || key.contains('\\') {
        return invalid("key contains a forbidden character");
    }
    for part in key.split('/') {
        match part {
            "" => return invalid("key has an empty path segment"),
            "." | ".." => return invalid("key has a relative path segment"),
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_md5_is_base64_of_digest() {
        // MD5("This is foo!") = da610129b94e1b3da45836e40e8e78ec
        let digest = content_md5(&mut &b"This is foo!"[..]).unwrap();
        let raw = hex::decode("da610129b94e1b3da45836e40e8e78ec").unwrap();
        assert_eq!(digest, STANDARD.encode(raw));
    }

    #[test]
    fn content_md5_of_empty_body() {
        assert_eq!(content_md5(&mut io::empty()).unwrap(), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("npm-abc.tar.gz").is_ok());
        assert!(validate_key("ci/linux/npm-abc.tar.gz").is_ok());

        for bad in ["", "/abs.tar.gz", "a//b", "a/../b", "./a", "a\\b", "trailing/"] {
            assert!(
                matches!(validate_key(bad), Err(RemoteError::InvalidKey { .. })),
                "{bad:?} should be rejected"
            );
        }
    }
}
