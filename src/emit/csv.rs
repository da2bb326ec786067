//! CSV emitter: one RFC 4180 file per table in the output directory.
//! NULLs are empty fields; bytes are base64; timestamps are ISO-8601.

use super::{
    for_each_row, output_dir, rewrite_row, tables_to_emit, EmitInput, EmitStats, OutputOptions,
};
use crate::anonymize::Anonymizer;
use crate::db::SqlValue;
use crate::error::Result;
use crate::fetch::RowSource;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::fs::File;
use std::io::{BufWriter, Write};

/// Quote a field when it contains a delimiter, quote, or line break.
pub fn csv_field(raw: &str) -> String {
    if raw.contains(',') || raw.contains('"') || raw.contains('\n') || raw.contains('\r') {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn csv_value(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Bool(b) => b.to_string(),
        SqlValue::Int(i) => i.to_string(),
        SqlValue::Float(f) => f.to_string(),
        SqlValue::Decimal(s) => s.clone(),
        SqlValue::Text(s) => csv_field(s),
        SqlValue::Bytes(b) => BASE64.encode(b),
        SqlValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.f").to_string(),
        SqlValue::Timestamp(ts) => ts.to_rfc3339(),
    }
}

pub fn emit_csv<S: RowSource>(
    input: &EmitInput<'_>,
    anonymizer: &mut Option<Anonymizer>,
    source: &mut S,
    opts: &OutputOptions,
) -> Result<EmitStats> {
    let mut stats = EmitStats::default();
    let dir = output_dir(opts, "csv")?;

    for &table_id in &tables_to_emit(input) {
        let table = input.schema.table(table_id);
        let path = dir.join(format!("{}.csv", table.name));
        let mut out = BufWriter::new(File::create(path)?);

        let header = table
            .columns
            .iter()
            .map(|c| csv_field(&c.name))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(out, "{}", header)?;

        let mut emitted = 0usize;
        for_each_row(input, source, table_id, &mut |row| {
            let values = rewrite_row(input.schema, anonymizer, table_id, row);
            let line = values.iter().map(csv_value).collect::<Vec<_>>().join(",");
            writeln!(out, "{}", line)?;
            emitted += 1;
            Ok(())
        })?;

        out.flush()?;
        stats.record(&table.name, emitted);
    }

    Ok(stats)
}
