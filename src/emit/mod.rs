//! Output serialization: SQL, JSON, and CSV writers.
//!
//! Tables are written in the exact order the insert planner produced.
//! Buffered tables emit straight from the collected set; streamed leaf
//! tables are re-fetched chunk-by-chunk through the row source so their
//! values never sit in memory all at once.

mod csv;
mod json;
mod sql;

pub use csv::emit_csv;
pub use json::emit_json;
pub use sql::emit_sql;

use crate::anonymize::Anonymizer;
use crate::db::{Row, SqlDialect, SqlValue};
use crate::error::{Result, SubsetError};
use crate::fetch::RowSource;
use crate::schema::{ColumnId, InsertPlan, Schema, TableId};
use crate::traverse::Collected;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Sql,
    Json,
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sql" => Ok(OutputFormat::Sql),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            _ => Err(format!("unknown format: {}. Valid options: sql, json, csv", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JsonMode {
    #[default]
    Single,
    PerTable,
}

impl std::str::FromStr for JsonMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(JsonMode::Single),
            "per-table" | "per_table" => Ok(JsonMode::PerTable),
            _ => Err(format!("unknown json mode: {}. Valid options: single, per-table", s)),
        }
    }
}

/// Output settings, matching the `output` config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    pub format: OutputFormat,
    /// File for sql/json-single; directory for json per-table and csv;
    /// stdout when absent (sql and json-single only)
    pub out_file: Option<PathBuf>,
    pub include_transaction: bool,
    pub include_drop_tables: bool,
    pub disable_fk_checks: bool,
    pub json_mode: JsonMode,
    pub json_pretty: bool,
}

/// Per-run emit counters.
#[derive(Debug, Default)]
pub struct EmitStats {
    pub rows_per_table: AHashMap<String, usize>,
    pub total_rows: usize,
}

impl EmitStats {
    fn record(&mut self, table: &str, rows: usize) {
        *self.rows_per_table.entry(table.to_string()).or_insert(0) += rows;
        self.total_rows += rows;
    }
}

/// Read-only emit context shared by the format writers.
pub struct EmitInput<'a> {
    pub schema: &'a Schema,
    pub collected: &'a Collected,
    pub plan: &'a InsertPlan,
    pub dialect: SqlDialect,
    pub chunk_size: usize,
}

/// Serialize the extraction through the configured format writer.
pub fn emit<S: RowSource>(
    input: &EmitInput<'_>,
    anonymizer: &mut Option<Anonymizer>,
    source: &mut S,
    opts: &OutputOptions,
) -> Result<EmitStats> {
    match opts.format {
        OutputFormat::Sql => {
            let mut out = open_sink(opts.out_file.as_deref())?;
            let stats = emit_sql(input, anonymizer, source, opts, &mut out)?;
            out.flush()?;
            Ok(stats)
        }
        OutputFormat::Json => emit_json(input, anonymizer, source, opts),
        OutputFormat::Csv => emit_csv(input, anonymizer, source, opts),
    }
}

/// File sink or stdout, buffered either way.
fn open_sink(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    })
}

/// Resolve the output directory for per-table formats.
fn output_dir(opts: &OutputOptions, what: &str) -> Result<PathBuf> {
    let Some(dir) = opts.out_file.clone() else {
        return Err(SubsetError::config(format!(
            "{} output requires --out-file to name a directory",
            what
        )));
    };
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Tables the plan ordered, restricted to those with collected rows.
fn tables_to_emit(input: &EmitInput<'_>) -> Vec<TableId> {
    input
        .plan
        .ordered
        .iter()
        .copied()
        .filter(|t| input.collected.table(*t).map(|r| !r.is_empty()).unwrap_or(false))
        .collect()
}

/// Drive `f` over every emitted row of a table: straight from memory for
/// buffered tables, chunk-wise through the row source for streamed ones.
fn for_each_row<S: RowSource>(
    input: &EmitInput<'_>,
    source: &mut S,
    table_id: TableId,
    f: &mut dyn FnMut(&Row) -> Result<()>,
) -> Result<()> {
    let Some(rows) = input.collected.table(table_id) else {
        return Ok(());
    };
    if !rows.values_dropped {
        for row in &rows.rows {
            f(row)?;
        }
        return Ok(());
    }

    let table = input.schema.table(table_id);
    let key_columns: Vec<ColumnId> = if table.has_primary_key() {
        table.primary_key.clone()
    } else {
        table.columns.iter().map(|c| c.ordinal).collect()
    };
    source.fetch_matching_chunked(
        table,
        &key_columns,
        &rows.keys,
        input.chunk_size,
        &mut |chunk| {
            for row in &chunk {
                f(row)?;
            }
            Ok(())
        },
    )
}

/// Apply anonymization to one row, yielding the values to serialize.
fn rewrite_row(
    schema: &Schema,
    anonymizer: &mut Option<Anonymizer>,
    table_id: TableId,
    row: &Row,
) -> Vec<SqlValue> {
    match anonymizer {
        None => row.values.clone(),
        Some(anon) => row
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| anon.anonymize(schema, table_id, ColumnId(i as u16), v))
            .collect(),
    }
}
