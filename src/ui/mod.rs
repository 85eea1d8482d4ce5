//! Terminal output with automatic fallback to plain text in CI
//!
//! # Example
//!
//! ```rust,ignore
//! use stowaway::ui::{self, TaskSpinner, UiContext};
//!
//! let ctx = UiContext::detect();
//!
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Uploading deps-linux-x86_64...");
//! // ... do work ...
//! spinner.stop("Uploaded 12.4 MB");
//!
//! ui::step_info(&ctx, "cache already exists");
//! ```

mod context;
mod output;
mod progress;

pub use context::UiContext;
pub use output::{format_bytes, key_value, section, step_info, step_ok, step_ok_detail, step_warn};
pub use progress::TaskSpinner;
