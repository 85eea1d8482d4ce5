//! CLI command implementations

pub mod completions;
pub mod config;
pub mod key;
pub mod list;
pub mod restore;
pub mod store;

pub use completions::execute as completions;
pub use config::execute as config;
pub use key::execute as key;
pub use list::execute as list;
pub use restore::execute as restore;
pub use store::execute as store;
