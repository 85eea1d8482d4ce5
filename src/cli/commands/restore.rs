//! Restore command - fetch the best matching cache and relocate its paths

use crate::audit::{AuditLog, CacheEvent};
use crate::cache::{self, CacheContext, RestoreOutcome, TemplateContext, TemplateResolver};
use crate::cli::args::RestoreArgs;
use crate::config::Config;
use crate::error::StowawayResult;
use crate::store::create_store;
use crate::ui::{self, TaskSpinner, UiContext};

/// Execute the restore command
///
/// A miss is a successful run: the build simply proceeds without a cache.
pub fn execute(args: RestoreArgs, config: &Config) -> StowawayResult<()> {
    let ctx = UiContext::detect();
    let store = create_store(&config.store, &args.bucket)?;
    let resolver = TemplateResolver::new(TemplateContext::from_process()?);
    let cache_ctx = CacheContext {
        store: store.as_ref(),
        resolver: &resolver,
        archive: &config.archive,
    };
    let audit = AuditLog::new(config, &args.bucket);

    let mut spinner = TaskSpinner::new(&ctx);
    spinner.start(&format!("Looking up {} candidate key(s) in {}...", args.keys.len(), store.describe()));
    let outcome = match cache::restore(&cache_ctx, &args.keys) {
        Ok(outcome) => outcome,
        Err(e) => {
            spinner.stop_error("Restore failed");
            return Err(e);
        }
    };

    match outcome {
        RestoreOutcome::Miss => {
            spinner.clear();
            ui::step_info(&ctx, "No cache found");
            audit.record(&CacheEvent::Miss { keys: &args.keys });
        }
        RestoreOutcome::Restored {
            key,
            object_key,
            kind,
            paths,
        } => {
            spinner.stop(&format!("Restored cache {} ({} match)", object_key, kind));
            for path in &paths {
                ui::key_value(&ctx, "restored", &path.display().to_string());
            }

            audit.record(&CacheEvent::Restored {
                key: &key,
                object: &object_key,
                kind,
                paths: &paths,
            });
        }
    }

    Ok(())
}
