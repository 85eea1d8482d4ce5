//! Audit trail of cache traffic
//!
//! Writes one JSON line per cache event to `~/.local/state/stowaway/audit.log`
//! when `general.audit_log` is enabled:
//!
//! ```text
//! {"timestamp":"...","bucket":"ci","event":"cache.stored","data":{...}}
//! ```

use crate::cache::MatchKind;
use crate::config::{schema::Config, ConfigManager};
use chrono::Utc;
use serde_json::{json, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Something that happened to a bucket
#[derive(Debug)]
pub enum CacheEvent<'a> {
    /// An artifact was uploaded
    Stored {
        key: &'a str,
        object: &'a str,
        paths: &'a [String],
        size: u64,
    },
    /// An artifact was downloaded and relocated
    Restored {
        key: &'a str,
        object: &'a str,
        kind: MatchKind,
        paths: &'a [PathBuf],
    },
    /// No candidate key matched
    Miss { keys: &'a [String] },
}

impl CacheEvent<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stored { .. } => "cache.stored",
            Self::Restored { .. } => "cache.restored",
            Self::Miss { .. } => "cache.miss",
        }
    }

    fn data(&self) -> Value {
        match self {
            Self::Stored {
                key,
                object,
                paths,
                size,
            } => json!({ "key": key, "object": object, "paths": paths, "size": size }),
            Self::Restored {
                key,
                object,
                kind,
                paths,
            } => {
                let paths: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                json!({ "key": key, "object": object, "match": kind.to_string(), "paths": paths })
            }
            Self::Miss { keys } => json!({ "keys": keys }),
        }
    }
}

/// Appends events for one bucket
pub struct AuditLog {
    enabled: bool,
    bucket: String,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(config: &Config, bucket: impl Into<String>) -> Self {
        Self {
            enabled: config.general.audit_log,
            bucket: bucket.into(),
            path: ConfigManager::audit_log_path(),
        }
    }

    /// Record `event`; IO failures are logged and never fail the command
    pub fn record(&self, event: &CacheEvent<'_>) {
        if !self.enabled {
            return;
        }

        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "bucket": self.bucket,
            "event": event.name(),
            "data": event.data(),
        });

        let mut line = entry.to_string();
        line.push('\n');
        if let Err(e) = append_line(&self.path, &line) {
            warn!(event = event.name(), path = %self.path.display(), "Failed to write audit log: {}", e);
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    file.flush()
}
