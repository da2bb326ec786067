//! YAML configuration for extraction runs.
//!
//! Everything here can also be set from CLI flags; flags win over file
//! values. The file is optional, and every section has working defaults.

use crate::anonymize::AnonymizeConfig;
use crate::emit::OutputOptions;
use crate::error::{Result, SubsetError};
use crate::schema::VirtualFkSpec;
use crate::traverse::Direction;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default BFS depth cap.
pub const DEFAULT_DEPTH: u32 = 3;

/// Upper bound on the configurable depth; deeper walks amount to a
/// denial-of-service against the source database.
pub const MAX_DEPTH: u32 = 10;

/// Streaming thresholds, matching `performance.streaming`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Force streaming for traversal-leaf tables
    pub enabled: bool,
    /// Row count above which a leaf table streams even when not forced
    pub threshold: usize,
    /// Rows per chunk when streaming
    pub chunk_size: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 50_000,
            chunk_size: 1000,
        }
    }
}

/// Query sizing, matching the `performance` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub streaming: StreamingConfig,
    /// Ceiling on values bound per query (IN-list chunking)
    pub batch_size: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            streaming: StreamingConfig::default(),
            batch_size: 1000,
        }
    }
}

/// Root of the YAML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub default_depth: Option<u32>,
    pub direction: Option<Direction>,
    pub exclude_tables: Vec<String>,
    pub passthrough_tables: Vec<String>,
    pub validate: Option<bool>,
    pub fail_on_validation_error: Option<bool>,
    pub anonymize: AnonymizeConfig,
    pub output: OutputOptions,
    pub performance: PerformanceConfig,
    pub virtual_foreign_keys: Vec<VirtualFkSpec>,
}

impl FileConfig {
    /// Load and parse a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SubsetError::config(format!("reading {}: {}", path.display(), e)))?;
        serde_yaml::from_str(&content)
            .map_err(|e| SubsetError::config(format!("parsing {}: {}", path.display(), e)))
    }
}
