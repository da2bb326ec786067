//! Database seam: typed values, the opaque connection trait, and the
//! dialect capability set.
//!
//! The crate never links a driver directly into its core logic. Everything
//! above this module talks to a [`Connection`], which offers parameterized
//! queries and chunked (server-cursor backed) reads, and to a [`SqlDialect`]
//! for identifier/literal rendering. The bundled PostgreSQL implementation
//! lives in [`postgres`].

pub mod postgres;

use crate::error::{Result, SubsetError};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A single database value.
///
/// Exotic types (numeric, uuid, json, arrays) arrive as text: the fetcher
/// casts them in the SELECT list, so this enum stays closed.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary-precision numeric, kept textual to avoid rounding.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(DateTime<FixedOffset>),
}

impl Eq for SqlValue {}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            SqlValue::Null => {}
            SqlValue::Bool(b) => b.hash(state),
            SqlValue::Int(i) => i.hash(state),
            // NaN never appears in key tuples; bit pattern is good enough.
            SqlValue::Float(f) => f.to_bits().hash(state),
            SqlValue::Decimal(s) | SqlValue::Text(s) => s.hash(state),
            SqlValue::Bytes(b) => b.hash(state),
            SqlValue::Date(d) => d.hash(state),
            SqlValue::Time(t) => t.hash(state),
            SqlValue::Timestamp(ts) => ts.hash(state),
        }
    }
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Textual view for non-null scalar values; used by the introspector
    /// when reading catalog rows.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) | SqlValue::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Stable representation used for anonymization seeding and key display.
    pub fn repr(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Decimal(s) | SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => hex::encode(b),
            SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            SqlValue::Timestamp(ts) => ts.to_rfc3339(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// One fetched row: values in the table's column order.
///
/// Rows carry no column names; positions resolve through the table schema,
/// which surfaces schema mismatches at fetch time instead of at emit time.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub values: Vec<SqlValue>,
}

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }
}

/// Dialects the wire layer can render SQL for. Only PostgreSQL is
/// implemented; the other names are reserved so connection impls can
/// report what they actually speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
}

impl SqlDialect {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(SqlDialect::Postgres),
            other => Err(SubsetError::UnsupportedDialect(other.to_string())),
        }
    }

    /// Quote an identifier (table or column name).
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            SqlDialect::Postgres => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Render a value as a SQL literal.
    pub fn quote_literal(&self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(true) => "TRUE".to_string(),
            SqlValue::Bool(false) => "FALSE".to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Decimal(s) => s.clone(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            SqlValue::Bytes(b) => format!("'\\x{}'", hex::encode(b)),
            SqlValue::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            SqlValue::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
            SqlValue::Timestamp(ts) => format!("'{}'", ts.to_rfc3339()),
        }
    }

    /// Positional query placeholder, 1-based.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Postgres => format!("${}", index),
        }
    }

    pub fn drop_table_stmt(&self, table: &str) -> String {
        match self {
            SqlDialect::Postgres => {
                format!("DROP TABLE IF EXISTS {} CASCADE;", self.quote_ident(table))
            }
        }
    }

    /// Session-level FK check toggle, where the dialect has one.
    pub fn fk_disable_stmt(&self) -> Option<&'static str> {
        match self {
            SqlDialect::Postgres => Some("SET session_replication_role = replica;"),
        }
    }

    pub fn fk_enable_stmt(&self) -> Option<&'static str> {
        match self {
            SqlDialect::Postgres => Some("SET session_replication_role = origin;"),
        }
    }

    pub fn supports_server_cursors(&self) -> bool {
        match self {
            SqlDialect::Postgres => true,
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Postgres => write!(f, "postgresql"),
        }
    }
}

/// The opaque driver seam.
///
/// Implementations own exactly one database session. `query_chunked` backs
/// streaming mode; implementations without server-side cursors may satisfy
/// it by buffering, at the cost of memory.
pub trait Connection {
    fn dialect(&self) -> SqlDialect;

    /// Run a parameterized query and materialize every row.
    fn query(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a parameterized query, delivering rows in chunks of at most
    /// `chunk_size` without materializing the full result set.
    fn query_chunked(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<Row>) -> Result<()>,
    ) -> Result<()>;
}

/// Cooperative cancellation flag, checked before every blocking call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Error out if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SubsetError::Cancelled)
        } else {
            Ok(())
        }
    }
}
