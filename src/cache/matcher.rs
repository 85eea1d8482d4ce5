//! Candidate key resolution against a remote store
//!
//! Candidates are tried in order. Each one first gets an exact lookup of
//! `<key>.tar.gz`; failing that, every object whose name starts with the key
//! is listed and the most recently modified one wins.

use crate::cache::template::TemplateResolver;
use crate::error::StowawayResult;
use crate::store::{ObjectSummary, RemoteStore};
use std::fmt;
use std::io::Read;
use tracing::{debug, warn};

/// Suffix appended to a resolved key to name its remote object
pub const OBJECT_SUFFIX: &str = ".tar.gz";

/// Remote object name for a resolved key
pub fn object_key(key: &str) -> String {
    format!("{}{}", key, OBJECT_SUFFIX)
}

/// How a candidate key found its artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Prefix,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Prefix => write!(f, "prefix"),
        }
    }
}

/// A stored artifact selected for restore
pub struct CacheHit {
    /// Resolved candidate key that produced the hit
    pub key: String,
    /// Name of the remote object actually fetched
    pub object_key: String,
    pub kind: MatchKind,
    pub body: Box<dyn Read>,
}

impl fmt::Debug for CacheHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheHit")
            .field("key", &self.key)
            .field("object_key", &self.object_key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub struct CacheKeyMatcher<'a> {
    store: &'a dyn RemoteStore,
    resolver: &'a TemplateResolver,
}

impl<'a> CacheKeyMatcher<'a> {
    pub fn new(store: &'a dyn RemoteStore, resolver: &'a TemplateResolver) -> Self {
        Self { store, resolver }
    }

    /// Resolve candidate templates into the first available artifact
    ///
    /// Templates are resolved one at a time, so a later candidate is never
    /// evaluated once an earlier one hits. Template errors are fatal; store
    /// errors only disqualify the candidate that hit them.
    pub fn find(&self, templates: &[String]) -> StowawayResult<Option<CacheHit>> {
        for template in templates {
            let key = self.resolver.resolve(template)?;
            if let Some(hit) = self.lookup(&key) {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }

    /// Exact then prefix lookup for one resolved key
    pub fn lookup(&self, key: &str) -> Option<CacheHit> {
        let exact = object_key(key);
        match self.store.get(&exact) {
            Ok(Some(body)) => {
                debug!(key, object = %exact, "Exact cache hit");
                return Some(CacheHit {
                    key: key.to_string(),
                    object_key: exact,
                    kind: MatchKind::Exact,
                    body,
                });
            }
            Ok(None) => {}
            // A failed exact lookup still leaves the prefix step to try
            Err(e) => warn!(key, object = %exact, error = %e, "Exact cache lookup failed"),
        }

        let listing = match self.store.list_by_prefix(key) {
            Ok(listing) => listing,
            Err(e) => {
                warn!(key, error = %e, "Prefix cache lookup failed, skipping candidate");
                return None;
            }
        };
        let latest = select_latest(&listing)?;

        match self.store.get(&latest.key) {
            Ok(Some(body)) => {
                debug!(key, object = %latest.key, modified = %latest.last_modified, "Prefix cache hit");
                Some(CacheHit {
                    key: key.to_string(),
                    object_key: latest.key.clone(),
                    kind: MatchKind::Prefix,
                    body,
                })
            }
            Ok(None) => {
                warn!(key, object = %latest.key, "Listed object vanished before download");
                None
            }
            Err(e) => {
                warn!(key, object = %latest.key, error = %e, "Fetching prefix match failed, skipping candidate");
                None
            }
        }
    }
}

/// Most recently modified object; the earliest listed wins ties
pub fn select_latest(objects: &[ObjectSummary]) -> Option<&ObjectSummary> {
    let mut best: Option<&ObjectSummary> = None;
    for object in objects {
        match best {
            Some(current) if object.last_modified <= current.last_modified => {}
            _ => best = Some(object),
        }
    }
    best
}
