//! Shared fixtures: schema builders and an in-memory row source that
//! understands the query shapes the engine produces.

use ahash::AHashMap;
use dbsubset::db::{Row, SqlValue};
use dbsubset::error::Result;
use dbsubset::fetch::RowSource;
use dbsubset::schema::{
    Column, ColumnId, EdgeId, FkEdge, RowKey, Schema, SensitivityTag, SqlType, Table, TableId,
};

pub fn int(v: i64) -> SqlValue {
    SqlValue::Int(v)
}

pub fn text(v: &str) -> SqlValue {
    SqlValue::Text(v.to_string())
}

pub fn null() -> SqlValue {
    SqlValue::Null
}

pub fn row(values: Vec<SqlValue>) -> Row {
    Row::new(values)
}

/// Build a table; columns are (name, type, nullable), pk names columns.
pub fn table(name: &str, columns: &[(&str, SqlType, bool)], pk: &[&str]) -> Table {
    let mut t = Table::new(name.to_string(), TableId(0));
    for (i, (cname, ty, nullable)) in columns.iter().enumerate() {
        t.columns.push(Column {
            name: cname.to_string(),
            sql_type: ty.clone(),
            ordinal: ColumnId(i as u16),
            nullable: *nullable,
            sensitivity: SensitivityTag::None,
        });
    }
    t.primary_key = pk
        .iter()
        .map(|n| t.column_id(n).expect("pk column exists"))
        .collect();
    t
}

/// Add an FK edge between already-added tables, by column names.
#[allow(clippy::too_many_arguments)]
pub fn add_fk(
    schema: &mut Schema,
    name: &str,
    source: &str,
    source_cols: &[&str],
    target: &str,
    target_cols: &[&str],
    nullable: bool,
    is_virtual: bool,
) -> EdgeId {
    let source_table = schema.table_id(source).expect("source table");
    let target_table = schema.table_id(target).expect("target table");
    let source_columns = source_cols
        .iter()
        .map(|c| schema.table(source_table).column_id(c).expect("source col"))
        .collect();
    let target_columns = target_cols
        .iter()
        .map(|c| schema.table(target_table).column_id(c).expect("target col"))
        .collect();
    schema.add_edge(FkEdge {
        id: EdgeId(0),
        name: name.to_string(),
        source_table,
        source_columns,
        target_table,
        target_columns,
        nullable,
        is_virtual,
    })
}

/// `users(id PK, email)` <- `orders(id PK, user_id NOT NULL)`
pub fn users_orders_schema() -> Schema {
    let mut schema = Schema::new();
    schema.add_table(table(
        "users",
        &[("id", SqlType::Int, false), ("email", SqlType::Text, true)],
        &["id"],
    ));
    schema.add_table(table(
        "orders",
        &[("id", SqlType::Int, false), ("user_id", SqlType::Int, false)],
        &["id"],
    ));
    add_fk(
        &mut schema,
        "orders_user_id_fkey",
        "orders",
        &["user_id"],
        "users",
        &["id"],
        false,
        false,
    );
    schema.finalize();
    schema
}

/// Standard data for [`users_orders_schema`]: users 1 and 2, order 10 on
/// user 1, order 11 on user 2.
pub fn users_orders_source() -> MemoryRowSource {
    let mut source = MemoryRowSource::new();
    source.insert(
        "users",
        vec![
            row(vec![int(1), text("alice@example.com")]),
            row(vec![int(2), text("bob@example.com")]),
        ],
    );
    source.insert(
        "orders",
        vec![row(vec![int(10), int(1)]), row(vec![int(11), int(2)])],
    );
    source
}

/// In-memory [`RowSource`] over per-table row vectors.
///
/// Understands the two seed fragment shapes the parser emits
/// (`"col" = $1` and `"col" IS NULL`); set-based fetches evaluate tuple
/// membership directly.
#[derive(Default)]
pub struct MemoryRowSource {
    tables: AHashMap<String, Vec<Row>>,
    pub fetch_calls: usize,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, rows: Vec<Row>) {
        self.tables.insert(table.to_string(), rows);
    }

    fn rows_of(&self, table: &Table) -> Vec<Row> {
        self.tables.get(&table.name).cloned().unwrap_or_default()
    }
}

impl RowSource for MemoryRowSource {
    fn fetch_where(
        &mut self,
        table: &Table,
        fragment: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Row>> {
        self.fetch_calls += 1;
        let rows = self.rows_of(table);

        if let Some(column) = fragment
            .strip_suffix(" = $1")
            .and_then(|lhs| lhs.strip_prefix('"'))
            .and_then(|lhs| lhs.strip_suffix('"'))
        {
            let idx = table.column_id(column).expect("seed column").0 as usize;
            return Ok(rows
                .into_iter()
                .filter(|r| r.values[idx] == params[0])
                .collect());
        }
        if let Some(column) = fragment
            .strip_suffix(" IS NULL")
            .and_then(|lhs| lhs.strip_prefix('"'))
            .and_then(|lhs| lhs.strip_suffix('"'))
        {
            let idx = table.column_id(column).expect("seed column").0 as usize;
            return Ok(rows.into_iter().filter(|r| r.values[idx].is_null()).collect());
        }
        if fragment == "(TRUE)" {
            return Ok(rows);
        }
        panic!("MemoryRowSource cannot evaluate fragment: {fragment}");
    }

    fn fetch_matching(
        &mut self,
        table: &Table,
        key_columns: &[ColumnId],
        keys: &[RowKey],
    ) -> Result<Vec<Row>> {
        self.fetch_calls += 1;
        let wanted: ahash::AHashSet<&RowKey> = keys.iter().filter(|k| !k.has_null()).collect();
        Ok(self
            .rows_of(table)
            .into_iter()
            .filter(|r| {
                table
                    .project(r, key_columns)
                    .map(|tuple| wanted.contains(&tuple))
                    .unwrap_or(false)
            })
            .collect())
    }

    fn fetch_matching_chunked(
        &mut self,
        table: &Table,
        key_columns: &[ColumnId],
        keys: &[RowKey],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<Row>) -> Result<()>,
    ) -> Result<()> {
        let rows = self.fetch_matching(table, key_columns, keys)?;
        for chunk in rows.chunks(chunk_size.max(1)) {
            on_chunk(chunk.to_vec())?;
        }
        Ok(())
    }

    fn fetch_all(&mut self, table: &Table) -> Result<Vec<Row>> {
        self.fetch_calls += 1;
        Ok(self.rows_of(table))
    }
}
