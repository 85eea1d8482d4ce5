//! Store command - archive paths and upload them

use crate::audit::{AuditLog, CacheEvent};
use crate::cache::{self, CacheContext, StoreOutcome, TemplateContext, TemplateResolver};
use crate::cli::args::StoreArgs;
use crate::config::Config;
use crate::error::StowawayResult;
use crate::store::create_store;
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the store command
pub fn execute(args: StoreArgs, config: &Config) -> StowawayResult<()> {
    let ctx = UiContext::detect();
    let store = create_store(&config.store, &args.bucket)?;
    let resolver = TemplateResolver::new(TemplateContext::from_process()?);
    let cache_ctx = CacheContext {
        store: store.as_ref(),
        resolver: &resolver,
        archive: &config.archive,
    };

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Storing {} path(s) in {}...", args.paths.len(), store.describe()));
    let outcome = match cache::store(&cache_ctx, &args.key, &args.paths) {
        Ok(outcome) => outcome,
        Err(e) => {
            spinner.stop_error("Store failed");
            return Err(e);
        }
    };

    match outcome {
        StoreOutcome::AlreadyExists { key } => {
            spinner.clear();
            ui::step_info(&ctx, &format!("cache already exists: {}", key));
        }
        StoreOutcome::Stored {
            key,
            object_key,
            size,
        } => {
            spinner.stop(&format!("Stored cache {}", key));
            ui::key_value(&ctx, "object", &object_key);
            ui::key_value(&ctx, "size", &ui::format_bytes(size));

            AuditLog::new(config, &args.bucket).record(&CacheEvent::Stored {
                key: &key,
                object: &object_key,
                paths: &args.paths,
                size,
            });
        }
    }

    Ok(())
}
