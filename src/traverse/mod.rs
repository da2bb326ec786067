//! Seed-rooted BFS over the row graph.
//!
//! Maintains a FIFO frontier of `(table, row-key batch, depth)` work items.
//! Neighbor keys are projected in memory from already-collected rows, so
//! the database is only consulted for the set-based row fetches. A key
//! enters the queue exactly once, when it is first collected, which is what
//! bounds the walk on cyclic graphs.

use crate::db::Row;
use crate::error::{Result, SubsetError};
use crate::fetch::RowSource;
use crate::schema::{ColumnId, EdgeId, RowKey, Schema, TableId};
use crate::seed::SeedPredicate;
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::debug;

/// Which FK edges to follow from a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Child-to-parent only (referential integrity closure)
    Up,
    /// Parent-to-child only (dependent data)
    Down,
    /// Both directions
    #[default]
    Both,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            "both" => Ok(Direction::Both),
            _ => Err(format!("unknown direction: {}. Valid options: up, down, both", s)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
            Direction::Both => write!(f, "both"),
        }
    }
}

/// Traversal bounds and filters.
#[derive(Debug, Clone)]
pub struct TraversalOptions {
    /// Maximum hops from the nearest seed; 0 collects seed rows only
    pub max_depth: u32,
    pub direction: Direction,
    pub exclude: AHashSet<TableId>,
    /// Tables collected in full after the walk, FK-reachable or not
    pub passthrough: Vec<TableId>,
    /// When set, traversal-leaf tables keep only row keys; their values
    /// are re-fetched chunk-wise at emit time
    pub stream_leaves: bool,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            direction: Direction::Both,
            exclude: AHashSet::new(),
            passthrough: Vec::new(),
            stream_leaves: false,
        }
    }
}

/// Rows collected for one table, in discovery order.
#[derive(Debug, Default)]
pub struct TableRows {
    /// Row keys in discovery order
    pub keys: Vec<RowKey>,
    /// Full rows, parallel to `keys`; empty when `values_dropped`
    pub rows: Vec<Row>,
    index: AHashMap<RowKey, usize>,
    /// True for streaming-leaf tables: only keys are retained
    pub values_dropped: bool,
}

impl TableRows {
    /// Insert a row; returns false when the key was already present.
    fn insert(&mut self, key: RowKey, row: Row) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.keys.len());
        self.keys.push(key);
        if !self.values_dropped {
            self.rows.push(row);
        }
        true
    }

    pub fn contains(&self, key: &RowKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn row_for(&self, key: &RowKey) -> Option<&Row> {
        if self.values_dropped {
            return None;
        }
        self.index.get(key).map(|&i| &self.rows[i])
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// All rows gathered during one extraction, keyed by `(table, row-key)`.
#[derive(Debug, Default)]
pub struct Collected {
    tables: AHashMap<TableId, TableRows>,
}

impl Collected {
    pub fn table(&self, id: TableId) -> Option<&TableRows> {
        self.tables.get(&id)
    }

    pub fn table_ids(&self) -> impl Iterator<Item = TableId> + '_ {
        self.tables.keys().copied()
    }

    pub fn row_counts(&self) -> AHashMap<TableId, usize> {
        self.tables
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(&t, rows)| (t, rows.len()))
            .collect()
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(TableRows::len).sum()
    }

    fn entry(&mut self, id: TableId, values_dropped: bool) -> &mut TableRows {
        self.tables.entry(id).or_insert_with(|| TableRows {
            values_dropped,
            ..TableRows::default()
        })
    }

    /// Release a table's row values, keeping only its keys; used when a
    /// leaf table crosses the streaming threshold after traversal.
    pub fn drop_values(&mut self, id: TableId) {
        if let Some(rows) = self.tables.get_mut(&id) {
            rows.rows = Vec::new();
            rows.values_dropped = true;
        }
    }
}

/// Traversal result: the collected set plus a provenance trail.
#[derive(Debug, Default)]
pub struct TraversalOutcome {
    pub collected: Collected,
    /// One entry per traversal step, for verbose output and dry runs
    pub path: Vec<String>,
}

struct WorkItem {
    table: TableId,
    keys: Vec<RowKey>,
    depth: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Hop {
    Up,
    Down,
}

/// Candidate edges out of `table` under the configured direction,
/// excluding edges whose other endpoint is an excluded table. Real edges
/// come before virtual ones (adjacency is pre-sorted).
fn candidate_edges(schema: &Schema, opts: &TraversalOptions, table: TableId) -> Vec<(EdgeId, Hop)> {
    let mut edges = Vec::new();
    if matches!(opts.direction, Direction::Up | Direction::Both) {
        for &eid in schema.edges_where_child(table) {
            if !opts.exclude.contains(&schema.edge(eid).target_table) {
                edges.push((eid, Hop::Up));
            }
        }
    }
    if matches!(opts.direction, Direction::Down | Direction::Both) {
        for &eid in schema.edges_where_parent(table) {
            if !opts.exclude.contains(&schema.edge(eid).source_table) {
                edges.push((eid, Hop::Down));
            }
        }
    }
    edges
}

/// A traversal leaf has no candidate out-edges under the active
/// direction/exclusions; its rows are never needed for projection, so
/// streaming mode may emit and discard them chunk-wise.
pub fn is_traversal_leaf(schema: &Schema, opts: &TraversalOptions, table: TableId) -> bool {
    candidate_edges(schema, opts, table).is_empty()
}

pub struct Traverser<'a, S: RowSource> {
    schema: &'a Schema,
    source: &'a mut S,
    opts: TraversalOptions,
    /// Per (edge, hop): neighbor value tuples already sent to the fetcher
    queried: AHashMap<(EdgeId, Hop), AHashSet<RowKey>>,
}

impl<'a, S: RowSource> Traverser<'a, S> {
    pub fn new(schema: &'a Schema, source: &'a mut S, opts: TraversalOptions) -> Self {
        Self {
            schema,
            source,
            opts,
            queried: AHashMap::new(),
        }
    }

    fn keep_values(&self, table: TableId) -> bool {
        !(self.opts.stream_leaves && is_traversal_leaf(self.schema, &self.opts, table))
    }

    /// Run the BFS from the given seeds.
    pub fn run(&mut self, seeds: &[SeedPredicate]) -> Result<TraversalOutcome> {
        let mut outcome = TraversalOutcome::default();
        let mut queue: VecDeque<WorkItem> = VecDeque::new();

        let schema = self.schema;
        for seed in seeds {
            let table_id = schema.table_id(&seed.table).ok_or_else(|| {
                SubsetError::invalid_seed(&seed.source, format!("unknown table '{}'", seed.table))
            })?;
            let table = schema.table(table_id);

            let rows = self
                .source
                .fetch_where(table, &seed.sql_fragment, &seed.parameters)?;
            let row_count = rows.len();

            let keep = self.keep_values(table_id);
            let entry = outcome.collected.entry(table_id, !keep);
            let mut new_keys = Vec::new();
            for row in rows {
                let key = table.row_key(&row);
                if entry.insert(key.clone(), row) {
                    new_keys.push(key);
                }
            }

            outcome
                .path
                .push(format!("seed: {} ({} rows)", table.name, row_count));
            debug!(seed = %seed.source, rows = row_count, "seed fetched");

            if !new_keys.is_empty() {
                queue.push_back(WorkItem {
                    table: table_id,
                    keys: new_keys,
                    depth: 0,
                });
            }
        }

        while let Some(item) = queue.pop_front() {
            if item.depth >= self.opts.max_depth {
                continue;
            }
            self.expand(&item, &mut outcome, &mut queue)?;
        }

        self.collect_passthrough(&mut outcome)?;

        debug!(
            total_rows = outcome.collected.total_rows(),
            tables = outcome.collected.table_ids().count(),
            "traversal complete"
        );
        Ok(outcome)
    }

    fn expand(
        &mut self,
        item: &WorkItem,
        outcome: &mut TraversalOutcome,
        queue: &mut VecDeque<WorkItem>,
    ) -> Result<()> {
        let schema = self.schema;
        for (eid, hop) in candidate_edges(schema, &self.opts, item.table) {
            let edge = schema.edge(eid);
            let (other_id, project_cols, match_cols): (TableId, &[ColumnId], &[ColumnId]) =
                match hop {
                    Hop::Up => (edge.target_table, &edge.source_columns, &edge.target_columns),
                    Hop::Down => (edge.source_table, &edge.target_columns, &edge.source_columns),
                };

            // Project neighbor tuples out of the collected rows for this
            // batch; tuples with NULL components never match and are dropped.
            let table = schema.table(item.table);
            let rows = outcome
                .collected
                .table(item.table)
                .expect("work items reference collected tables");
            let mut frontier: Vec<RowKey> = Vec::new();
            let mut frontier_set: AHashSet<RowKey> = AHashSet::new();
            for key in &item.keys {
                let Some(row) = rows.row_for(key) else {
                    continue;
                };
                if let Some(tuple) = table.project(row, project_cols) {
                    if frontier_set.insert(tuple.clone()) {
                        frontier.push(tuple);
                    }
                }
            }

            // Never re-query tuples this edge has already seen; and when the
            // match columns are the neighbor's PK, tuples already collected
            // contribute nothing new either.
            let queried = self.queried.entry((eid, hop)).or_default();
            let other = schema.table(other_id);
            let match_is_pk = other.has_primary_key() && match_cols == other.primary_key.as_slice();
            let collected_other = outcome.collected.table(other_id);
            frontier.retain(|tuple| {
                if queried.contains(tuple) {
                    return false;
                }
                if match_is_pk {
                    if let Some(t) = collected_other {
                        if t.contains(tuple) {
                            return false;
                        }
                    }
                }
                true
            });
            if frontier.is_empty() {
                continue;
            }
            queried.extend(frontier.iter().cloned());

            let fetched = self.source.fetch_matching(other, match_cols, &frontier)?;

            let keep = self.keep_values(other_id);
            let entry = outcome.collected.entry(other_id, !keep);
            let mut new_keys = Vec::new();
            for row in fetched {
                let key = other.row_key(&row);
                if entry.insert(key.clone(), row) {
                    new_keys.push(key);
                }
            }

            if new_keys.is_empty() {
                continue;
            }

            let kind = if edge.is_virtual { "virtual:" } else { "" };
            outcome.path.push(format!(
                "{} --({}{})--> {} ({} rows)",
                table.name,
                kind,
                edge.name,
                other.name,
                new_keys.len()
            ));
            debug!(
                from = %table.name,
                to = %other.name,
                edge = %edge.name,
                new_rows = new_keys.len(),
                depth = item.depth,
                "traversed edge"
            );

            queue.push_back(WorkItem {
                table: other_id,
                keys: new_keys,
                depth: item.depth + 1,
            });
        }
        Ok(())
    }

    /// Include every row of the configured passthrough tables (lookup and
    /// reference data). Exclusions win; tables without a PK are skipped.
    fn collect_passthrough(&mut self, outcome: &mut TraversalOutcome) -> Result<()> {
        let schema = self.schema;
        let mut tables = self.opts.passthrough.clone();
        tables.sort_by_key(|&t| schema.table(t).name.clone());
        tables.dedup();

        for table_id in tables {
            if self.opts.exclude.contains(&table_id) {
                continue;
            }
            let table = schema.table(table_id);
            if !table.has_primary_key() {
                tracing::warn!(table = %table.name, "passthrough table has no primary key, skipped");
                continue;
            }

            let rows = self.source.fetch_all(table)?;
            let total = rows.len();
            let keep = self.keep_values(table_id);
            let entry = outcome.collected.entry(table_id, !keep);
            let mut new = 0usize;
            for row in rows {
                let key = table.row_key(&row);
                if entry.insert(key, row) {
                    new += 1;
                }
            }
            outcome.path.push(format!(
                "passthrough: {} ({} rows total, {} new)",
                table.name, total, new
            ));
        }
        Ok(())
    }
}
