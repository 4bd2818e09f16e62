//! Tree index configuration
//!
//! All fields use `#[serde(default)]` so partial config files deserialize
//! without error. Environment variables override the defaults:
//!
//! * `NESTINDEX_MAX_BATCH_SIZE` - page cap for persisted batches
//! * `NESTINDEX_TABLE` - backing table name
//! * `NESTINDEX_DB_PATH` - database file (unset means in-memory)
//! * `NESTINDEX_RELAX_INTEGRITY` - `true`/`false`, disable key checks during flush

use crate::db::DEFAULT_MAX_BATCH_SIZE;
use crate::operations::TreeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_TABLE_NAME: &str = "tree_nodes";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeIndexConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_table_name")]
    pub table_name: String,

    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    #[serde(default = "default_relax_integrity_checks")]
    pub relax_integrity_checks: bool,
}

impl Default for TreeIndexConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            table_name: default_table_name(),
            database_path: None,
            relax_integrity_checks: default_relax_integrity_checks(),
        }
    }
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_relax_integrity_checks() -> bool {
    true
}

impl TreeIndexConfig {
    /// Defaults overlaid with the `NESTINDEX_*` environment variables
    pub fn from_env() -> Result<Self, TreeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TreeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("NESTINDEX_MAX_BATCH_SIZE") {
            config.max_batch_size = raw.trim().parse().map_err(|_| {
                TreeError::InvalidConfig(format!(
                    "NESTINDEX_MAX_BATCH_SIZE must be a positive integer, got '{}'",
                    raw
                ))
            })?;
        }
        if let Some(table) = lookup("NESTINDEX_TABLE") {
            config.table_name = table.trim().to_string();
        }
        if let Some(path) = lookup("NESTINDEX_DB_PATH") {
            if !path.trim().is_empty() {
                tracing::info!("Using database path from NESTINDEX_DB_PATH: {}", path);
                config.database_path = Some(PathBuf::from(path));
            }
        }
        if let Some(raw) = lookup("NESTINDEX_RELAX_INTEGRITY") {
            config.relax_integrity_checks = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(TreeError::InvalidConfig(format!(
                        "NESTINDEX_RELAX_INTEGRITY must be a boolean, got '{}'",
                        raw
                    )))
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TreeError> {
        if self.max_batch_size == 0 {
            return Err(TreeError::InvalidConfig(
                "max_batch_size must be greater than zero".to_string(),
            ));
        }
        if !is_valid_identifier(&self.table_name) {
            return Err(TreeError::InvalidConfig(format!(
                "table_name '{}' is not a valid SQL identifier",
                self.table_name
            )));
        }
        Ok(())
    }
}

/// ASCII letters, digits and underscores, not starting with a digit
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
