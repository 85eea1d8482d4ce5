//! Stowaway - Rule-based build cache
//!
//! Packs arbitrary directory trees into one compressed artifact under a
//! templated key, and restores them from a blob store by exact or prefix
//! match.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod store;
pub mod ui;

pub use error::{StowawayError, StowawayResult};
