//! Set-based row fetching.
//!
//! [`RowSource`] is the seam the traversal engine and emitter consume;
//! [`SqlRowFetcher`] is the production implementation that renders
//! dialect-correct SQL over a [`Connection`], splitting oversized key sets
//! into batches and casting exotic column types to text in the SELECT list.

use crate::db::{CancelToken, Connection, Row, SqlValue};
use crate::error::Result;
use crate::schema::{ColumnId, RowKey, Table};
use tracing::debug;

/// Supplies rows for traversal and emission.
pub trait RowSource {
    /// Rows of `table` matching a raw WHERE fragment (seed execution).
    fn fetch_where(
        &mut self,
        table: &Table,
        fragment: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Row>>;

    /// Rows of `table` whose `key_columns` tuple is in `keys`, buffered.
    fn fetch_matching(
        &mut self,
        table: &Table,
        key_columns: &[ColumnId],
        keys: &[RowKey],
    ) -> Result<Vec<Row>>;

    /// Like [`RowSource::fetch_matching`] but delivered in chunks via a
    /// server-side cursor, for streaming emission.
    fn fetch_matching_chunked(
        &mut self,
        table: &Table,
        key_columns: &[ColumnId],
        keys: &[RowKey],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<Row>) -> Result<()>,
    ) -> Result<()>;

    /// Every row of `table` (passthrough tables).
    fn fetch_all(&mut self, table: &Table) -> Result<Vec<Row>>;
}

/// SQL-rendering [`RowSource`] over an opaque connection.
pub struct SqlRowFetcher<C: Connection> {
    conn: C,
    batch_size: usize,
    cancel: CancelToken,
}

impl<C: Connection> SqlRowFetcher<C> {
    pub fn new(conn: C, batch_size: usize, cancel: CancelToken) -> Self {
        Self {
            conn,
            batch_size: batch_size.max(1),
            cancel,
        }
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    /// SELECT list in schema column order. Types without a native
    /// [`SqlValue`] variant are cast to text so decoding stays closed.
    fn select_list(&self, table: &Table) -> String {
        let dialect = self.conn.dialect();
        table
            .columns
            .iter()
            .map(|c| {
                let quoted = dialect.quote_ident(&c.name);
                if c.sql_type.needs_text_cast() {
                    format!("{}::text AS {}", quoted, quoted)
                } else {
                    quoted
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// WHERE clause and parameter list for one batch of key tuples.
    fn key_predicate(
        &self,
        table: &Table,
        key_columns: &[ColumnId],
        keys: &[RowKey],
    ) -> (String, Vec<SqlValue>) {
        let dialect = self.conn.dialect();
        let mut params = Vec::with_capacity(keys.len() * key_columns.len());

        let cast_for = |col: ColumnId| {
            table
                .column(col)
                .and_then(|c| c.sql_type.placeholder_cast())
        };

        if key_columns.len() == 1 {
            let col = key_columns[0];
            let cast = cast_for(col);
            let placeholders: Vec<String> = keys
                .iter()
                .enumerate()
                .map(|(i, key)| {
                    params.push(key.0[0].clone());
                    match cast {
                        Some(ty) => format!("{}::{}", dialect.placeholder(i + 1), ty),
                        None => dialect.placeholder(i + 1),
                    }
                })
                .collect();
            let quoted = dialect.quote_ident(&table.column(col).expect("key column").name);
            (format!("{} IN ({})", quoted, placeholders.join(", ")), params)
        } else {
            let mut groups = Vec::with_capacity(keys.len());
            let mut n = 0;
            for key in keys {
                let mut parts = Vec::with_capacity(key_columns.len());
                for (col, value) in key_columns.iter().zip(key.0.iter()) {
                    n += 1;
                    params.push(value.clone());
                    let quoted =
                        dialect.quote_ident(&table.column(*col).expect("key column").name);
                    let placeholder = match cast_for(*col) {
                        Some(ty) => format!("{}::{}", dialect.placeholder(n), ty),
                        None => dialect.placeholder(n),
                    };
                    parts.push(format!("{} = {}", quoted, placeholder));
                }
                groups.push(format!("({})", parts.join(" AND ")));
            }
            (groups.join(" OR "), params)
        }
    }

    /// Split keys so one query never binds more than `batch_size` values,
    /// dropping tuples with NULL components (they never match in SQL).
    fn batches<'k>(&self, key_columns: &[ColumnId], keys: &'k [RowKey]) -> Vec<&'k [RowKey]> {
        let arity = key_columns.len().max(1);
        let per_batch = (self.batch_size / arity).max(1);
        keys.chunks(per_batch).collect()
    }
}

impl<C: Connection> RowSource for SqlRowFetcher<C> {
    fn fetch_where(
        &mut self,
        table: &Table,
        fragment: &str,
        params: &[SqlValue],
    ) -> Result<Vec<Row>> {
        self.cancel.check()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.select_list(table),
            self.conn.dialect().quote_ident(&table.name),
            fragment
        );
        debug!(table = %table.name, "seed fetch");
        self.conn.query(&sql, params)
    }

    fn fetch_matching(
        &mut self,
        table: &Table,
        key_columns: &[ColumnId],
        keys: &[RowKey],
    ) -> Result<Vec<Row>> {
        let keys: Vec<RowKey> = keys.iter().filter(|k| !k.has_null()).cloned().collect();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        for batch in self.batches(key_columns, &keys) {
            self.cancel.check()?;
            let (predicate, params) = self.key_predicate(table, key_columns, batch);
            let sql = format!(
                "SELECT {} FROM {} WHERE {}",
                self.select_list(table),
                self.conn.dialect().quote_ident(&table.name),
                predicate
            );
            rows.extend(self.conn.query(&sql, &params)?);
        }
        debug!(
            table = %table.name,
            keys = keys.len(),
            rows = rows.len(),
            "batched fetch"
        );
        Ok(rows)
    }

    fn fetch_matching_chunked(
        &mut self,
        table: &Table,
        key_columns: &[ColumnId],
        keys: &[RowKey],
        chunk_size: usize,
        on_chunk: &mut dyn FnMut(Vec<Row>) -> Result<()>,
    ) -> Result<()> {
        let keys: Vec<RowKey> = keys.iter().filter(|k| !k.has_null()).cloned().collect();
        if keys.is_empty() {
            return Ok(());
        }

        for batch in self.batches(key_columns, &keys) {
            self.cancel.check()?;
            let (predicate, params) = self.key_predicate(table, key_columns, batch);
            let sql = format!(
                "SELECT {} FROM {} WHERE {}",
                self.select_list(table),
                self.conn.dialect().quote_ident(&table.name),
                predicate
            );
            self.conn
                .query_chunked(&sql, &params, chunk_size.max(1), on_chunk)?;
        }
        Ok(())
    }

    fn fetch_all(&mut self, table: &Table) -> Result<Vec<Row>> {
        self.cancel.check()?;
        let sql = format!(
            "SELECT {} FROM {}",
            self.select_list(table),
            self.conn.dialect().quote_ident(&table.name)
        );
        self.conn.query(&sql, &[])
    }
}
