//! Error types for subset extraction.
//!
//! One variant per failure class; lower-level recoveries (IN-list splitting,
//! batch retries at the driver layer) never surface here.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SubsetError>;

#[derive(Debug, Error)]
pub enum SubsetError {
    /// Introspection failure or an invalid virtual foreign key declaration.
    #[error("schema error: {0}")]
    Schema(String),

    /// Connection reports a dialect this crate does not speak.
    #[error("unsupported dialect '{0}': only postgresql is supported")]
    UnsupportedDialect(String),

    /// Seed references an unknown table/column or a table that cannot be
    /// seeded (no primary key, or excluded from traversal).
    #[error("invalid seed '{seed}': {reason}")]
    InvalidSeed { seed: String, reason: String },

    /// Database error during row retrieval. Parameter values are reported
    /// only as a count so sensitive data never reaches logs.
    #[error("fetch failed: {reason}\n  sql: {sql}\n  params: {param_count}")]
    Fetch {
        sql: String,
        param_count: usize,
        reason: String,
    },

    /// Could not establish or keep the database session.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A dependency cycle with no nullable foreign key to defer.
    #[error("unbreakable dependency cycle: {cycle}\n{detail}")]
    UnbreakableCycle { cycle: String, detail: String },

    /// Post-extraction referential integrity check failed and
    /// `fail_on_validation_error` is set.
    #[error("validation failed: {orphans} orphaned reference(s)\n{report}")]
    Validation { orphans: usize, report: String },

    /// A cancellation signal was observed before a blocking call.
    #[error("extraction cancelled")]
    Cancelled,

    /// Bad configuration (unknown format, missing output directory, ...).
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SubsetError {
    pub fn schema(msg: impl Into<String>) -> Self {
        SubsetError::Schema(msg.into())
    }

    pub fn invalid_seed(seed: impl Into<String>, reason: impl Into<String>) -> Self {
        SubsetError::InvalidSeed {
            seed: seed.into(),
            reason: reason.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        SubsetError::Config(msg.into())
    }
}
