//! Schema model for FK-aware subset extraction.
//!
//! This module provides:
//! - Data models for tables, columns, and foreign-key edges
//! - Virtual (user-declared) FK edges merged alongside real constraints
//! - Adjacency tables for traversal and insert ordering
//!
//! The model is immutable once introspection and virtual-FK merging finish.

mod graph;
mod introspect;

pub use graph::*;
pub use introspect::*;

use crate::db::{Row, SqlValue};
use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use std::fmt;

/// Unique identifier for a table within a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

/// Unique identifier for a column within a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId(pub u16);

/// Unique identifier for an FK edge within a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u32);

/// SQL column type classification (PostgreSQL names)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Int,
    BigInt,
    Text,
    Uuid,
    Decimal,
    Float,
    Bool,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Bytes,
    /// Any other type; kept verbatim so the fetcher can cast it to text
    Other(String),
}

impl SqlType {
    /// Parse a PostgreSQL `data_type` string as reported by the catalog.
    pub fn from_pg_type(type_str: &str) -> Self {
        match type_str.to_lowercase().as_str() {
            "smallint" | "integer" | "int" | "int2" | "int4" | "serial" | "smallserial" => {
                SqlType::Int
            }
            "bigint" | "int8" | "bigserial" => SqlType::BigInt,
            "character varying" | "varchar" | "character" | "char" | "text" | "name"
            | "citext" => SqlType::Text,
            "uuid" => SqlType::Uuid,
            "numeric" | "decimal" | "money" => SqlType::Decimal,
            "real" | "double precision" | "float4" | "float8" => SqlType::Float,
            "boolean" | "bool" => SqlType::Bool,
            "date" => SqlType::Date,
            "time without time zone" | "time" => SqlType::Time,
            "timestamp without time zone" | "timestamp" => SqlType::Timestamp,
            "timestamp with time zone" | "timestamptz" => SqlType::TimestampTz,
            "bytea" => SqlType::Bytes,
            _ => SqlType::Other(type_str.to_string()),
        }
    }

    /// Whether the fetcher must cast this type to text in SELECT lists
    /// because [`SqlValue`] has no native variant for it.
    pub fn needs_text_cast(&self) -> bool {
        matches!(
            self,
            SqlType::Uuid | SqlType::Decimal | SqlType::Timestamp | SqlType::Other(_)
        )
    }

    /// Explicit cast applied to query placeholders when a value of this
    /// type is bound as text.
    pub fn placeholder_cast(&self) -> Option<&'static str> {
        match self {
            SqlType::Uuid => Some("uuid"),
            SqlType::Decimal => Some("numeric"),
            SqlType::Timestamp => Some("timestamp"),
            _ => None,
        }
    }
}

/// How a column's values are treated at emit time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SensitivityTag {
    /// Pass through unchanged
    #[default]
    None,
    /// Replace with a deterministic fake via the named method
    Fake(String),
    /// Replace with NULL (secrets, tokens, credentials)
    NullOut,
}

/// Column definition within a table
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    /// Position in table (0-indexed)
    pub ordinal: ColumnId,
    pub nullable: bool,
    pub sensitivity: SensitivityTag,
}

/// Foreign-key edge, directed child -> parent.
///
/// Edges are flat records addressed by [`EdgeId`]; tables hold no edge
/// back-pointers, only the schema-level adjacency lists do.
#[derive(Debug, Clone)]
pub struct FkEdge {
    pub id: EdgeId,
    pub name: String,
    pub source_table: TableId,
    pub source_columns: Vec<ColumnId>,
    pub target_table: TableId,
    pub target_columns: Vec<ColumnId>,
    /// True when any source column accepts NULL
    pub nullable: bool,
    /// Declared in configuration rather than the database catalog
    pub is_virtual: bool,
}

impl FkEdge {
    pub fn is_self_referential(&self) -> bool {
        self.source_table == self.target_table
    }
}

/// Primary-key (or, for PK-less tables, whole-row) value tuple identifying
/// one row within its table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey(pub SmallVec<[SqlValue; 2]>);

impl RowKey {
    pub fn from_values(values: impl IntoIterator<Item = SqlValue>) -> Self {
        RowKey(values.into_iter().collect())
    }

    pub fn has_null(&self) -> bool {
        self.0.iter().any(SqlValue::is_null)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

/// Complete table definition
#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub id: TableId,
    /// Column definitions in catalog order
    pub columns: Vec<Column>,
    /// Primary key column ids (ordered, for composite PKs); empty when the
    /// table has no PK, in which case it may be collected but never seeded
    /// or traversed from
    pub primary_key: Vec<ColumnId>,
}

impl Table {
    pub fn new(name: String, id: TableId) -> Self {
        Self {
            name,
            id,
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.get(id.0 as usize)
    }

    /// Look up a column id by name (exact, then case-insensitive)
    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(name))
            })
            .map(|c| c.ordinal)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Key identifying a row of this table: the PK tuple, or the full value
    /// tuple for PK-less tables.
    pub fn row_key(&self, row: &Row) -> RowKey {
        if self.primary_key.is_empty() {
            RowKey::from_values(row.values.iter().cloned())
        } else {
            RowKey::from_values(
                self.primary_key
                    .iter()
                    .map(|c| row.values[c.0 as usize].clone()),
            )
        }
    }

    /// Project the named columns out of a row. Returns None when any
    /// projected component is NULL (null tuples never match in SQL).
    pub fn project(&self, row: &Row, columns: &[ColumnId]) -> Option<RowKey> {
        let key = RowKey::from_values(columns.iter().map(|c| row.values[c.0 as usize].clone()));
        if key.has_null() {
            None
        } else {
            Some(key)
        }
    }
}

/// Complete database schema with FK adjacency.
#[derive(Debug, Default)]
pub struct Schema {
    /// Map from table name to table id
    names: AHashMap<String, TableId>,
    tables: Vec<Table>,
    edges: Vec<FkEdge>,
    /// Per table: edges where the table is the child (outgoing, to parents)
    edges_as_child: Vec<Vec<EdgeId>>,
    /// Per table: edges where the table is the parent (incoming, from children)
    edges_as_parent: Vec<Vec<EdgeId>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn add_table(&mut self, mut table: Table) -> TableId {
        let id = TableId(self.tables.len() as u32);
        table.id = id;
        self.names.insert(table.name.clone(), id);
        self.tables.push(table);
        self.edges_as_child.push(Vec::new());
        self.edges_as_parent.push(Vec::new());
        id
    }

    pub fn add_edge(&mut self, mut edge: FkEdge) -> EdgeId {
        let id = EdgeId(self.edges.len() as u32);
        edge.id = id;
        self.edges_as_child[edge.source_table.0 as usize].push(id);
        self.edges_as_parent[edge.target_table.0 as usize].push(id);
        self.edges.push(edge);
        id
    }

    /// Sort adjacency lists so traversal visits real edges before virtual
    /// ones, alphabetically within each group. Call once after the last
    /// edge is added; BFS determinism depends on it.
    pub fn finalize(&mut self) {
        let edges = &self.edges;
        let sort = |list: &mut Vec<EdgeId>| {
            list.sort_by(|a, b| {
                let ea = &edges[a.0 as usize];
                let eb = &edges[b.0 as usize];
                (ea.is_virtual, ea.name.as_str()).cmp(&(eb.is_virtual, eb.name.as_str()))
            });
        };
        for list in &mut self.edges_as_child {
            sort(list);
        }
        for list in &mut self.edges_as_parent {
            sort(list);
        }
    }

    /// Get table id by name (exact match first, then case-insensitive)
    pub fn table_id(&self, name: &str) -> Option<TableId> {
        if let Some(&id) = self.names.get(name) {
            return Some(id);
        }
        let lower = name.to_lowercase();
        self.names
            .iter()
            .find(|(k, _)| k.to_lowercase() == lower)
            .map(|(_, &id)| id)
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0 as usize]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        &mut self.tables[id.0 as usize]
    }

    pub fn table_by_name(&self, name: &str) -> Option<&Table> {
        self.table_id(name).map(|id| self.table(id))
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn edge(&self, id: EdgeId) -> &FkEdge {
        &self.edges[id.0 as usize]
    }

    pub fn edges(&self) -> impl Iterator<Item = &FkEdge> {
        self.edges.iter()
    }

    /// Edges where `table` is the child (follow to parent rows).
    pub fn edges_where_child(&self, table: TableId) -> &[EdgeId] {
        &self.edges_as_child[table.0 as usize]
    }

    /// Edges where `table` is the parent (follow to child rows).
    pub fn edges_where_parent(&self, table: TableId) -> &[EdgeId] {
        &self.edges_as_parent[table.0 as usize]
    }

    /// Columns of `table` that participate in any FK edge, as source or
    /// target, real or virtual. Such columns are never anonymized.
    pub fn fk_member_columns(&self, table: TableId) -> AHashSet<ColumnId> {
        let mut cols = AHashSet::new();
        for &eid in self.edges_where_child(table) {
            cols.extend(self.edge(eid).source_columns.iter().copied());
        }
        for &eid in self.edges_where_parent(table) {
            cols.extend(self.edge(eid).target_columns.iter().copied());
        }
        cols
    }

    /// Human-readable edge description for logs and reports.
    pub fn describe_edge(&self, id: EdgeId) -> String {
        let e = self.edge(id);
        let src = self.table(e.source_table);
        let tgt = self.table(e.target_table);
        let src_cols: Vec<&str> = e
            .source_columns
            .iter()
            .filter_map(|c| src.column(*c).map(|c| c.name.as_str()))
            .collect();
        let tgt_cols: Vec<&str> = e
            .target_columns
            .iter()
            .filter_map(|c| tgt.column(*c).map(|c| c.name.as_str()))
            .collect();
        format!(
            "{}.{} -> {}.{}{}",
            src.name,
            src_cols.join(","),
            tgt.name,
            tgt_cols.join(","),
            if e.is_virtual { " (virtual)" } else { "" }
        )
    }

    /// Suggest near-miss table names for error messages.
    pub fn similar_tables(&self, target: &str, max: usize) -> Vec<String> {
        let target_lower = target.to_lowercase();
        let mut similar: Vec<String> = self
            .tables
            .iter()
            .map(|t| t.name.clone())
            .filter(|name| {
                let lower = name.to_lowercase();
                lower.contains(&target_lower) || target_lower.contains(&lower)
            })
            .collect();
        similar.sort();
        similar.truncate(max);
        similar
    }
}
