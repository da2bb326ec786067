//! JSON emitter.
//!
//! `single` mode writes one object keyed by table name, in insert order,
//! to a file or stdout. `per-table` mode writes `<table>.json` files into
//! the output directory, one row array per table.

use super::{
    for_each_row, open_sink, output_dir, rewrite_row, tables_to_emit, EmitInput, EmitStats,
    JsonMode, OutputOptions,
};
use crate::anonymize::Anonymizer;
use crate::db::SqlValue;
use crate::error::Result;
use crate::fetch::RowSource;
use crate::schema::TableId;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Number, Value};
use std::fs::File;
use std::io::{BufWriter, Write};

/// JSON-native rendering of one value. Timestamps become ISO-8601 strings,
/// bytes become base64, numerics stay numbers where JSON allows it.
pub fn json_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::Int(i) => Value::Number((*i).into()),
        SqlValue::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        SqlValue::Decimal(s) => s
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(s.clone())),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Bytes(b) => Value::String(BASE64.encode(b)),
        SqlValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
        SqlValue::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
        SqlValue::Timestamp(ts) => Value::String(ts.to_rfc3339()),
    }
}

fn table_rows<S: RowSource>(
    input: &EmitInput<'_>,
    anonymizer: &mut Option<Anonymizer>,
    source: &mut S,
    table_id: TableId,
) -> Result<Vec<Value>> {
    let table = input.schema.table(table_id);
    let mut rows = Vec::new();
    for_each_row(input, source, table_id, &mut |row| {
        let values = rewrite_row(input.schema, anonymizer, table_id, row);
        let mut object = Map::with_capacity(values.len());
        for (column, value) in table.columns.iter().zip(values.iter()) {
            object.insert(column.name.clone(), json_value(value));
        }
        rows.push(Value::Object(object));
        Ok(())
    })?;
    Ok(rows)
}

pub fn emit_json<S: RowSource>(
    input: &EmitInput<'_>,
    anonymizer: &mut Option<Anonymizer>,
    source: &mut S,
    opts: &OutputOptions,
) -> Result<EmitStats> {
    let mut stats = EmitStats::default();
    let tables = tables_to_emit(input);

    match opts.json_mode {
        JsonMode::Single => {
            let mut document = Map::new();
            for &table_id in &tables {
                let name = input.schema.table(table_id).name.clone();
                let rows = table_rows(input, anonymizer, source, table_id)?;
                stats.record(&name, rows.len());
                document.insert(name, Value::Array(rows));
            }

            let mut out = open_sink(opts.out_file.as_deref())?;
            let rendered = if opts.json_pretty {
                serde_json::to_string_pretty(&Value::Object(document))
            } else {
                serde_json::to_string(&Value::Object(document))
            }
            .map_err(|e| crate::error::SubsetError::config(format!("json encoding: {}", e)))?;
            out.write_all(rendered.as_bytes())?;
            out.write_all(b"\n")?;
            out.flush()?;
        }
        JsonMode::PerTable => {
            let dir = output_dir(opts, "per-table json")?;
            for &table_id in &tables {
                let name = input.schema.table(table_id).name.clone();
                let rows = table_rows(input, anonymizer, source, table_id)?;
                stats.record(&name, rows.len());

                let path = dir.join(format!("{}.json", name));
                let mut out = BufWriter::new(File::create(path)?);
                let rendered = if opts.json_pretty {
                    serde_json::to_string_pretty(&Value::Array(rows))
                } else {
                    serde_json::to_string(&Value::Array(rows))
                }
                .map_err(|e| {
                    crate::error::SubsetError::config(format!("json encoding: {}", e))
                })?;
                out.write_all(rendered.as_bytes())?;
                out.write_all(b"\n")?;
                out.flush()?;
            }
        }
    }

    Ok(stats)
}
