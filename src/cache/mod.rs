//! Rule-based build cache
//!
//! Stores arbitrary directory trees as one compressed artifact keyed by a
//! computed string, and restores them by exact or prefix match.
//!
//! # Artifact Layout
//!
//! | Entry | Contents |
//! |-------|----------|
//! | `0000/<name>/...` | First stored path, relative to its parent |
//! | `0001/<name>/...` | Second stored path |
//! | `metadata.json` | `{"paths":[...]}`, always last |
//!
//! Remote objects are named `<resolved key>.tar.gz`.

pub mod archive;
pub mod compress;
pub mod extract;
pub mod flow;
pub mod manifest;
pub mod matcher;
pub mod template;
pub mod walk;

pub use archive::Archiver;
pub use compress::Compressor;
pub use flow::{restore, store, CacheContext, RestoreOutcome, StoreOutcome};
pub use manifest::Manifest;
pub use matcher::{object_key, CacheHit, CacheKeyMatcher, MatchKind};
pub use template::{TemplateContext, TemplateResolver};
