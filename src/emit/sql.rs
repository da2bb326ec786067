//! SQL emitter: multi-row INSERTs in dependency order, optional framing
//! (transaction, DROP TABLE, FK-check toggles), and deferred-edge UPDATEs.

use super::{for_each_row, rewrite_row, tables_to_emit, EmitInput, EmitStats, OutputOptions};
use crate::anonymize::Anonymizer;
use crate::db::SqlValue;
use crate::error::Result;
use crate::fetch::RowSource;
use crate::schema::{EdgeId, RowKey, TableId};
use std::io::Write;
use tracing::debug;

/// Rows per multi-row INSERT statement.
const INSERT_BATCH_ROWS: usize = 500;

/// One post-insert UPDATE restoring a deferred FK value.
struct DeferredUpdate {
    table: TableId,
    pk_key: RowKey,
    assignments: Vec<(String, SqlValue)>,
}

pub fn emit_sql<S: RowSource>(
    input: &EmitInput<'_>,
    anonymizer: &mut Option<Anonymizer>,
    source: &mut S,
    opts: &OutputOptions,
    out: &mut dyn Write,
) -> Result<EmitStats> {
    let mut stats = EmitStats::default();
    let tables = tables_to_emit(input);
    let dialect = input.dialect;

    writeln!(out, "-- dbsubset extraction")?;
    writeln!(
        out,
        "-- {} table(s), insert order: {}",
        tables.len(),
        tables
            .iter()
            .map(|&t| input.schema.table(t).name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    )?;
    writeln!(out)?;

    if opts.disable_fk_checks {
        if let Some(stmt) = dialect.fk_disable_stmt() {
            writeln!(out, "{}", stmt)?;
        }
    }

    if opts.include_drop_tables {
        for &table_id in &input.plan.drop_order() {
            if input.collected.table(table_id).map(|r| !r.is_empty()).unwrap_or(false) {
                writeln!(out, "{}", dialect.drop_table_stmt(&input.schema.table(table_id).name))?;
            }
        }
        writeln!(out)?;
    }

    if opts.include_transaction {
        writeln!(out, "BEGIN;")?;
    }

    let mut deferred_updates: Vec<DeferredUpdate> = Vec::new();

    for &table_id in &tables {
        let table = input.schema.table(table_id);

        // Source columns of deferred edges out of this table are written
        // as NULL and restored after all inserts.
        let deferred_edges: Vec<EdgeId> = input
            .schema
            .edges_where_child(table_id)
            .iter()
            .copied()
            .filter(|eid| input.plan.is_deferred(*eid))
            .collect();

        let column_list = table
            .columns
            .iter()
            .map(|c| dialect.quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_header = format!(
            "INSERT INTO {} ({}) VALUES",
            dialect.quote_ident(&table.name),
            column_list
        );

        let mut batch: Vec<String> = Vec::with_capacity(INSERT_BATCH_ROWS);
        let mut emitted = 0usize;

        for_each_row(input, source, table_id, &mut |row| {
            let mut values = rewrite_row(input.schema, anonymizer, table_id, row);

            for &eid in &deferred_edges {
                let edge = input.schema.edge(eid);
                let mut assignments = Vec::new();
                for &col in &edge.source_columns {
                    let current = &mut values[col.0 as usize];
                    if !current.is_null() {
                        let name = table.column(col).expect("edge column").name.clone();
                        assignments.push((name, current.clone()));
                        *current = SqlValue::Null;
                    }
                }
                // Updates address rows by PK; a PK-less table cannot be
                // back-filled and keeps the NULL.
                if !assignments.is_empty() && table.has_primary_key() {
                    deferred_updates.push(DeferredUpdate {
                        table: table_id,
                        pk_key: table.row_key(row),
                        assignments,
                    });
                }
            }

            let rendered = values
                .iter()
                .map(|v| dialect.quote_literal(v))
                .collect::<Vec<_>>()
                .join(", ");
            batch.push(format!("({})", rendered));
            emitted += 1;

            if batch.len() >= INSERT_BATCH_ROWS {
                write_insert(&mut *out, &insert_header, &batch)?;
                batch.clear();
            }
            Ok(())
        })?;

        if !batch.is_empty() {
            write_insert(&mut *out, &insert_header, &batch)?;
        }
        if emitted > 0 {
            writeln!(out)?;
        }
        stats.record(&table.name, emitted);
        debug!(table = %table.name, rows = emitted, "sql emitted");
    }

    for update in &deferred_updates {
        let table = input.schema.table(update.table);
        let set_clause = update
            .assignments
            .iter()
            .map(|(name, value)| {
                format!("{} = {}", dialect.quote_ident(name), dialect.quote_literal(value))
            })
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = table
            .primary_key
            .iter()
            .zip(update.pk_key.0.iter())
            .map(|(col, value)| {
                format!(
                    "{} = {}",
                    dialect.quote_ident(&table.column(*col).expect("pk column").name),
                    dialect.quote_literal(value)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        writeln!(
            out,
            "UPDATE {} SET {} WHERE {};",
            dialect.quote_ident(&table.name),
            set_clause,
            where_clause
        )?;
    }
    if !deferred_updates.is_empty() {
        writeln!(out)?;
    }

    if opts.include_transaction {
        writeln!(out, "COMMIT;")?;
    }

    if opts.disable_fk_checks {
        if let Some(stmt) = dialect.fk_enable_stmt() {
            writeln!(out, "{}", stmt)?;
        }
    }

    Ok(stats)
}

fn write_insert(out: &mut dyn Write, header: &str, rows: &[String]) -> Result<()> {
    writeln!(out, "{}", header)?;
    for (i, row) in rows.iter().enumerate() {
        let terminator = if i + 1 == rows.len() { ";" } else { "," };
        writeln!(out, "{}{}", row, terminator)?;
    }
    Ok(())
}
