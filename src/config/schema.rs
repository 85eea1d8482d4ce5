//! Configuration schema for Stowaway
//!
//! Configuration is stored at `~/.config/stowaway/config.toml`

use crate::cache::compress::DEFAULT_LEVEL;
use crate::error::{StowawayError, StowawayResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Object store settings
    pub store: StoreConfig,

    /// Archive settings
    pub archive: ArchiveConfig,
}

impl Config {
    /// Check values serde cannot constrain on its own
    pub fn validate(&self) -> Result<(), String> {
        match self.general.log_format.as_str() {
            "text" | "json" => {}
            other => return Err(format!("general.log_format must be \"text\" or \"json\", got {:?}", other)),
        }
        if self.archive.compression_level > 9 {
            return Err(format!(
                "archive.compression_level must be between 0 and 9, got {}",
                self.archive.compression_level
            ));
        }
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append store/restore events to the audit log
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: false,
        }
    }
}

/// Object store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

impl StoreConfig {
    /// Configured root, or the per-user data directory
    pub fn resolved_root(&self) -> StowawayResult<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("stowaway").join("buckets"))
            .ok_or_else(|| {
                StowawayError::User(
                    "cannot determine a data directory; set store.root or STOWAWAY_STORE_ROOT".to_string(),
                )
            })
    }
}

/// Archive configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// gzip level, 0-9
    pub compression_level: u32,

    /// Parent of per-invocation scratch directories (default: system temp)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_LEVEL,
            work_dir: None,
        }
    }
}
