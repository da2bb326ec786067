//! Insert ordering over the induced FK sub-graph.
//!
//! Kahn's algorithm over the tables that actually have collected rows.
//! When the sub-graph is cyclic, edges are deferred (inserted as NULL and
//! back-filled by UPDATE) until an order exists: nullable edges first,
//! then fewest incident rows, ties by (source table, edge name).

use crate::error::{Result, SubsetError};
use crate::schema::{EdgeId, Schema, TableId};
use ahash::{AHashMap, AHashSet};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Result of insert-order planning.
#[derive(Debug)]
pub struct InsertPlan {
    /// Tables in insert order (parents before children)
    pub ordered: Vec<TableId>,
    /// Edges removed to break cycles; their source columns are inserted as
    /// NULL and restored by post-insert UPDATEs
    pub deferred: Vec<EdgeId>,
}

impl InsertPlan {
    /// Tables in DROP order (children before parents).
    pub fn drop_order(&self) -> Vec<TableId> {
        self.ordered.iter().rev().copied().collect()
    }

    pub fn is_deferred(&self, edge: EdgeId) -> bool {
        self.deferred.contains(&edge)
    }
}

/// Plan an insert order for the tables in `row_counts`.
///
/// `row_counts` doubles as the table set: only tables with at least one
/// collected row participate, and counts feed the deferral policy.
pub fn plan_insert_order(
    schema: &Schema,
    row_counts: &AHashMap<TableId, usize>,
) -> Result<InsertPlan> {
    let tables: AHashSet<TableId> = row_counts.keys().copied().collect();

    // Induced sub-graph: every edge (real or virtual) between member tables.
    let induced: Vec<EdgeId> = schema
        .edges()
        .filter(|e| tables.contains(&e.source_table) && tables.contains(&e.target_table))
        .map(|e| e.id)
        .collect();

    let mut in_degree: AHashMap<TableId, usize> = tables.iter().map(|&t| (t, 0)).collect();
    for &eid in &induced {
        *in_degree.get_mut(&schema.edge(eid).source_table).expect("member table") += 1;
    }

    // Name-keyed ready set keeps the output deterministic.
    let mut ready: BTreeSet<(String, TableId)> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&t, _)| (schema.table(t).name.clone(), t))
        .collect();

    let mut ordered = Vec::with_capacity(tables.len());
    let mut done: AHashSet<TableId> = AHashSet::new();
    let mut deferred: Vec<EdgeId> = Vec::new();
    let mut removed: AHashSet<EdgeId> = AHashSet::new();

    while ordered.len() < tables.len() {
        if let Some(entry) = ready.iter().next().cloned() {
            ready.remove(&entry);
            let (_, table) = entry;
            ordered.push(table);
            done.insert(table);

            for &eid in &induced {
                let edge = schema.edge(eid);
                if edge.target_table == table && removed.insert(eid) {
                    let deg = in_degree.get_mut(&edge.source_table).expect("member table");
                    *deg -= 1;
                    if *deg == 0 && !done.contains(&edge.source_table) {
                        ready.insert((
                            schema.table(edge.source_table).name.clone(),
                            edge.source_table,
                        ));
                    }
                }
            }
            continue;
        }

        // Stuck: every remaining table waits on another. Defer one edge.
        let candidate = induced
            .iter()
            .filter(|&&eid| {
                !removed.contains(&eid)
                    && !done.contains(&schema.edge(eid).source_table)
                    && !done.contains(&schema.edge(eid).target_table)
            })
            .min_by_key(|&&eid| {
                let edge = schema.edge(eid);
                (
                    !edge.nullable,
                    row_counts.get(&edge.source_table).copied().unwrap_or(0),
                    schema.table(edge.source_table).name.clone(),
                    edge.name.clone(),
                )
            })
            .copied();

        let Some(eid) = candidate else {
            // No remaining edges yet nothing is ready: cannot happen with a
            // consistent in-degree table, but fail loudly instead of looping.
            return Err(SubsetError::schema(
                "insert ordering stalled with no deferrable edge".to_string(),
            ));
        };

        let edge = schema.edge(eid);
        if !edge.nullable {
            let remaining: Vec<TableId> = tables
                .iter()
                .filter(|t| !done.contains(t))
                .copied()
                .collect();
            let cycle = find_cycle(schema, &remaining, &removed)
                .unwrap_or_else(|| remaining.clone());
            return Err(unbreakable_cycle_error(schema, &cycle, &removed));
        }

        debug!(edge = %schema.describe_edge(eid), "deferring edge to break cycle");
        removed.insert(eid);
        deferred.push(eid);
        let deg = in_degree.get_mut(&edge.source_table).expect("member table");
        *deg -= 1;
        if *deg == 0 && !done.contains(&edge.source_table) {
            ready.insert((
                schema.table(edge.source_table).name.clone(),
                edge.source_table,
            ));
        }
    }

    if !deferred.is_empty() {
        warn!(
            deferred = deferred.len(),
            "circular dependencies broken by deferring nullable FK edges"
        );
    }

    Ok(InsertPlan { ordered, deferred })
}

/// Walk child->parent edges among `remaining` looking for a cycle path.
fn find_cycle(
    schema: &Schema,
    remaining: &[TableId],
    removed: &AHashSet<EdgeId>,
) -> Option<Vec<TableId>> {
    let members: AHashSet<TableId> = remaining.iter().copied().collect();

    fn dfs(
        schema: &Schema,
        members: &AHashSet<TableId>,
        removed: &AHashSet<EdgeId>,
        node: TableId,
        stack: &mut Vec<TableId>,
        visited: &mut AHashSet<TableId>,
    ) -> Option<Vec<TableId>> {
        if let Some(pos) = stack.iter().position(|&t| t == node) {
            return Some(stack[pos..].to_vec());
        }
        if !visited.insert(node) {
            return None;
        }
        stack.push(node);
        for &eid in schema.edges_where_child(node) {
            let edge = schema.edge(eid);
            if removed.contains(&eid) || !members.contains(&edge.target_table) {
                continue;
            }
            if let Some(cycle) = dfs(schema, members, removed, edge.target_table, stack, visited) {
                return Some(cycle);
            }
        }
        stack.pop();
        None
    }

    let mut visited = AHashSet::new();
    for &start in remaining {
        let mut stack = Vec::new();
        if let Some(cycle) = dfs(schema, &members, removed, start, &mut stack, &mut visited) {
            return Some(cycle);
        }
    }
    None
}

fn unbreakable_cycle_error(
    schema: &Schema,
    cycle: &[TableId],
    removed: &AHashSet<EdgeId>,
) -> SubsetError {
    let members: AHashSet<TableId> = cycle.iter().copied().collect();
    let mut names: Vec<String> = cycle.iter().map(|&t| schema.table(t).name.clone()).collect();
    if let Some(first) = names.first().cloned() {
        names.push(first);
    }

    let mut lines = vec!["Foreign keys in cycle:".to_string()];
    for edge in schema.edges() {
        if removed.contains(&edge.id)
            || !members.contains(&edge.source_table)
            || !members.contains(&edge.target_table)
        {
            continue;
        }
        lines.push(format!(
            "  - {} ({})",
            schema.describe_edge(edge.id),
            if edge.nullable { "nullable" } else { "NOT NULL" }
        ));
    }
    lines.push(
        "No nullable foreign key exists to defer; make one of the columns nullable \
         or use deferred constraints."
            .to_string(),
    );

    SubsetError::UnbreakableCycle {
        cycle: names.join(" -> "),
        detail: lines.join("\n"),
    }
}
