//! Post-extraction referential integrity check.
//!
//! Walks the in-memory collected set: for every row and every real FK
//! edge, a non-null source tuple must resolve to a collected target row,
//! unless the edge was deferred (its UPDATE will supply the reference).

use crate::schema::{EdgeId, RowKey, Schema, TableId};
use crate::traverse::Collected;
use ahash::{AHashMap, AHashSet};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Stop collecting after this many violations.
const MAX_VIOLATIONS: usize = 1000;

/// One missing FK reference.
#[derive(Debug, Clone, Serialize)]
pub struct Violation {
    pub table: String,
    pub row_key: String,
    pub edge: String,
    pub missing_target: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row {} references missing {} via {}",
            self.table, self.row_key, self.missing_target, self.edge
        )
    }
}

/// Validation outcome with coverage counters.
#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub rows_checked: usize,
    pub fk_checks: usize,
    /// Tables whose values were streamed out and could not be re-checked
    pub skipped_tables: Vec<String>,
    pub truncated: bool,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn format_report(&self) -> String {
        let mut lines = Vec::new();
        for v in self.violations.iter().take(20) {
            lines.push(format!("  - {}", v));
        }
        if self.violations.len() > 20 {
            lines.push(format!("  ... and {} more", self.violations.len() - 20));
        }
        lines.join("\n")
    }
}

/// Check every real FK edge over the collected set. `deferred` edges are
/// exempt; their references arrive via post-insert UPDATEs.
pub fn validate(schema: &Schema, collected: &Collected, deferred: &[EdgeId]) -> ValidationReport {
    let deferred: AHashSet<EdgeId> = deferred.iter().copied().collect();
    let mut report = ValidationReport::default();

    // Lazily built per-edge target tuple sets; needed because an edge may
    // reference a unique key rather than the target's PK.
    let mut target_sets: AHashMap<EdgeId, AHashSet<RowKey>> = AHashMap::new();

    let mut tables: Vec<TableId> = collected.table_ids().collect();
    tables.sort();

    for table_id in tables {
        let rows = collected.table(table_id).expect("listed table");
        if rows.values_dropped {
            report
                .skipped_tables
                .push(schema.table(table_id).name.clone());
            continue;
        }

        let table = schema.table(table_id);
        let edges: Vec<EdgeId> = schema
            .edges_where_child(table_id)
            .iter()
            .copied()
            .filter(|eid| !schema.edge(*eid).is_virtual && !deferred.contains(eid))
            .collect();

        report.rows_checked += rows.rows.len();
        if edges.is_empty() {
            continue;
        }

        for (key, row) in rows.keys.iter().zip(rows.rows.iter()) {
            for &eid in &edges {
                let edge = schema.edge(eid);
                let Some(tuple) = table.project(row, &edge.source_columns) else {
                    continue; // null component: nothing to satisfy
                };
                report.fk_checks += 1;

                let targets = target_sets.entry(eid).or_insert_with(|| {
                    let target = schema.table(edge.target_table);
                    let mut set = AHashSet::new();
                    if let Some(target_rows) = collected.table(edge.target_table) {
                        if !target_rows.values_dropped {
                            for target_row in &target_rows.rows {
                                if let Some(t) = target.project(target_row, &edge.target_columns) {
                                    set.insert(t);
                                }
                            }
                        } else {
                            // Streamed leaf target: keys are all we have.
                            // They match when the edge references the PK.
                            if edge.target_columns == target.primary_key {
                                set.extend(target_rows.keys.iter().cloned());
                            }
                        }
                    }
                    set
                });

                if !targets.contains(&tuple) {
                    if report.violations.len() >= MAX_VIOLATIONS {
                        report.truncated = true;
                        return report;
                    }
                    report.violations.push(Violation {
                        table: table.name.clone(),
                        row_key: key.to_string(),
                        edge: edge.name.clone(),
                        missing_target: format!(
                            "{} {}",
                            schema.table(edge.target_table).name,
                            tuple
                        ),
                    });
                }
            }
        }
    }

    debug!(
        rows = report.rows_checked,
        checks = report.fk_checks,
        violations = report.violations.len(),
        "validation finished"
    );
    report
}
