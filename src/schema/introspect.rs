//! Catalog introspection: builds the schema model from a live connection,
//! then merges user-declared virtual foreign keys.
//!
//! Column/PK/table listings come from `information_schema`; foreign keys
//! come from `pg_constraint` with `unnest(conkey, confkey) WITH ORDINALITY`
//! so composite FKs pair source and target columns correctly instead of
//! producing a cross product.

use crate::db::{Connection, SqlDialect, SqlValue};
use crate::error::{Result, SubsetError};
use crate::schema::{Column, EdgeId, FkEdge, Schema, SensitivityTag, SqlType, Table, TableId};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const COLUMNS_SQL: &str = "\
SELECT table_name, column_name, data_type, is_nullable
FROM information_schema.columns
WHERE table_schema = $1
ORDER BY table_name, ordinal_position";

const PRIMARY_KEYS_SQL: &str = "\
SELECT tc.table_name, kcu.column_name
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
    ON tc.constraint_name = kcu.constraint_name
    AND tc.table_schema = kcu.table_schema
WHERE tc.constraint_type = 'PRIMARY KEY'
  AND tc.table_schema = $1
ORDER BY tc.table_name, kcu.ordinal_position";

const TABLES_SQL: &str = "\
SELECT table_name
FROM information_schema.tables
WHERE table_schema = $1
  AND table_type = 'BASE TABLE'
ORDER BY table_name";

// conname is only unique per owning table, so rows are keyed and ordered
// by the constraint oid; ordering by name alone could interleave two
// same-named constraints from different tables.
const FOREIGN_KEYS_SQL: &str = "\
SELECT
    c.oid AS constraint_oid,
    c.conname AS constraint_name,
    source_cls.relname AS source_table,
    a_source.attname AS source_column,
    target_cls.relname AS target_table,
    a_target.attname AS target_column,
    NOT a_source.attnotnull AS is_nullable
FROM pg_constraint c
JOIN pg_class source_cls ON c.conrelid = source_cls.oid
JOIN pg_class target_cls ON c.confrelid = target_cls.oid
JOIN pg_namespace ns ON source_cls.relnamespace = ns.oid
CROSS JOIN LATERAL unnest(c.conkey, c.confkey)
    WITH ORDINALITY AS u(source_attnum, target_attnum, ord)
JOIN pg_attribute a_source
    ON a_source.attrelid = c.conrelid
    AND a_source.attnum = u.source_attnum
JOIN pg_attribute a_target
    ON a_target.attrelid = c.confrelid
    AND a_target.attnum = u.target_attnum
WHERE c.contype = 'f'
  AND ns.nspname = $1
ORDER BY c.oid, u.ord";

/// User-declared FK edge, as it appears in configuration.
///
/// `target_columns` defaults to the target table's primary key. Several
/// specs may share `source_table`/`source_columns` while naming different
/// targets; each becomes an independent edge (polymorphic references).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtualFkSpec {
    #[serde(default)]
    pub name: Option<String>,
    pub source_table: String,
    pub source_columns: Vec<String>,
    pub target_table: String,
    #[serde(default)]
    pub target_columns: Option<Vec<String>>,
}

/// Build the schema model for `schema_name` from the connection's catalog.
pub fn introspect(conn: &mut dyn Connection, schema_name: &str) -> Result<Schema> {
    if conn.dialect() != SqlDialect::Postgres {
        return Err(SubsetError::UnsupportedDialect(conn.dialect().to_string()));
    }

    let param = [SqlValue::Text(schema_name.to_string())];

    let column_rows = conn
        .query(COLUMNS_SQL, &param)
        .map_err(catalog_error("columns"))?;
    let pk_rows = conn
        .query(PRIMARY_KEYS_SQL, &param)
        .map_err(catalog_error("primary keys"))?;
    let table_rows = conn
        .query(TABLES_SQL, &param)
        .map_err(catalog_error("tables"))?;
    let fk_rows = conn
        .query(FOREIGN_KEYS_SQL, &param)
        .map_err(catalog_error("foreign keys"))?;

    let mut columns_by_table: AHashMap<String, Vec<Column>> = AHashMap::new();
    for row in &column_rows {
        let table = text_at(row, 0, "table_name")?;
        let name = text_at(row, 1, "column_name")?;
        let data_type = text_at(row, 2, "data_type")?;
        let nullable = text_at(row, 3, "is_nullable")? == "YES";
        let cols = columns_by_table.entry(table.to_string()).or_default();
        cols.push(Column {
            name: name.to_string(),
            sql_type: SqlType::from_pg_type(data_type),
            ordinal: super::ColumnId(cols.len() as u16),
            nullable,
            sensitivity: SensitivityTag::None,
        });
    }

    let mut pks_by_table: AHashMap<String, Vec<String>> = AHashMap::new();
    for row in &pk_rows {
        let table = text_at(row, 0, "table_name")?;
        let column = text_at(row, 1, "column_name")?;
        pks_by_table
            .entry(table.to_string())
            .or_default()
            .push(column.to_string());
    }

    let mut schema = Schema::new();
    for row in &table_rows {
        let name = text_at(row, 0, "table_name")?;
        let mut table = Table::new(name.to_string(), TableId(0));
        table.columns = columns_by_table.remove(name).unwrap_or_default();
        if let Some(pk_names) = pks_by_table.remove(name) {
            for pk_name in pk_names {
                let id = table.column_id(&pk_name).ok_or_else(|| {
                    SubsetError::schema(format!(
                        "primary key column '{}' missing from table '{}'",
                        pk_name, name
                    ))
                })?;
                table.primary_key.push(id);
            }
        } else {
            debug!(table = name, "table has no primary key");
        }
        schema.add_table(table);
    }

    // FK rows arrive ordered by (constraint oid, column position); group
    // on the oid, which stays unique when constraint names collide across
    // tables.
    let mut grouped: Vec<(i64, RawFk)> = Vec::new();
    for row in &fk_rows {
        let oid = int_at(row, 0, "constraint_oid")?;
        let name = text_at(row, 1, "constraint_name")?;
        let source_table = text_at(row, 2, "source_table")?;
        let source_column = text_at(row, 3, "source_column")?;
        let target_table = text_at(row, 4, "target_table")?;
        let target_column = text_at(row, 5, "target_column")?;
        let nullable = row.values[6].as_bool().unwrap_or(false);

        match grouped.last_mut() {
            Some((id, raw)) if *id == oid => {
                raw.source_columns.push(source_column.to_string());
                raw.target_columns.push(target_column.to_string());
                raw.nullable |= nullable;
            }
            _ => grouped.push((
                oid,
                RawFk {
                    name: name.to_string(),
                    source_table: source_table.to_string(),
                    source_columns: vec![source_column.to_string()],
                    target_table: target_table.to_string(),
                    target_columns: vec![target_column.to_string()],
                    nullable,
                },
            )),
        }
    }

    for (_, raw) in grouped {
        let name = raw.name;
        let Some(source) = schema.table_id(&raw.source_table) else {
            warn!(constraint = %name, table = %raw.source_table, "FK source outside schema, skipped");
            continue;
        };
        let Some(target) = schema.table_id(&raw.target_table) else {
            warn!(constraint = %name, table = %raw.target_table, "FK target outside schema, skipped");
            continue;
        };
        let source_columns = resolve_columns(&schema, source, &raw.source_columns, &name)?;
        let target_columns = resolve_columns(&schema, target, &raw.target_columns, &name)?;
        schema.add_edge(FkEdge {
            id: EdgeId(0),
            name,
            source_table: source,
            source_columns,
            target_table: target,
            target_columns,
            nullable: raw.nullable,
            is_virtual: false,
        });
    }

    info!(
        tables = schema.len(),
        foreign_keys = schema.edges().count(),
        schema = schema_name,
        "schema introspection complete"
    );
    Ok(schema)
}

struct RawFk {
    name: String,
    source_table: String,
    source_columns: Vec<String>,
    target_table: String,
    target_columns: Vec<String>,
    nullable: bool,
}

/// Merge virtual FK declarations into the schema, validating that every
/// referenced table and column exists and that column arities match.
/// Finalizes the adjacency ordering; call exactly once, after [`introspect`].
pub fn apply_virtual_fks(schema: &mut Schema, specs: &[VirtualFkSpec]) -> Result<()> {
    for spec in specs {
        let label = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("virtual_{}_{}", spec.source_table, spec.target_table));

        let source = schema.table_id(&spec.source_table).ok_or_else(|| {
            SubsetError::schema(format!(
                "virtual FK '{}': unknown source table '{}'",
                label, spec.source_table
            ))
        })?;
        let target = schema.table_id(&spec.target_table).ok_or_else(|| {
            SubsetError::schema(format!(
                "virtual FK '{}': unknown target table '{}'",
                label, spec.target_table
            ))
        })?;

        let source_columns = resolve_columns(schema, source, &spec.source_columns, &label)?;

        let target_columns = match &spec.target_columns {
            Some(names) => resolve_columns(schema, target, names, &label)?,
            None => {
                let pk = &schema.table(target).primary_key;
                if pk.is_empty() {
                    return Err(SubsetError::schema(format!(
                        "virtual FK '{}': target table '{}' has no primary key and no \
                         target_columns were given",
                        label, spec.target_table
                    )));
                }
                pk.clone()
            }
        };

        if source_columns.len() != target_columns.len() {
            return Err(SubsetError::schema(format!(
                "virtual FK '{}': source has {} column(s) but target has {}",
                label,
                source_columns.len(),
                target_columns.len()
            )));
        }

        // Virtual references are nullable whenever any source column is.
        let nullable = source_columns
            .iter()
            .any(|c| schema.table(source).column(*c).map(|c| c.nullable).unwrap_or(true));

        schema.add_edge(FkEdge {
            id: EdgeId(0),
            name: label,
            source_table: source,
            source_columns,
            target_table: target,
            target_columns,
            nullable,
            is_virtual: true,
        });
    }

    schema.finalize();
    Ok(())
}

fn resolve_columns(
    schema: &Schema,
    table: TableId,
    names: &[String],
    context: &str,
) -> Result<Vec<super::ColumnId>> {
    names
        .iter()
        .map(|name| {
            schema.table(table).column_id(name).ok_or_else(|| {
                SubsetError::schema(format!(
                    "'{}': column '{}' not found in table '{}'",
                    context,
                    name,
                    schema.table(table).name
                ))
            })
        })
        .collect()
}

fn text_at<'a>(row: &'a crate::db::Row, idx: usize, what: &str) -> Result<&'a str> {
    row.values
        .get(idx)
        .and_then(SqlValue::as_text)
        .ok_or_else(|| SubsetError::schema(format!("catalog row missing {}", what)))
}

fn int_at(row: &crate::db::Row, idx: usize, what: &str) -> Result<i64> {
    match row.values.get(idx) {
        Some(SqlValue::Int(i)) => Ok(*i),
        _ => Err(SubsetError::schema(format!("catalog row missing {}", what))),
    }
}

fn catalog_error(what: &'static str) -> impl Fn(SubsetError) -> SubsetError {
    move |e| SubsetError::schema(format!("introspecting {}: {}", what, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Connection, Row, SqlDialect, SqlValue};
    use std::collections::VecDeque;

    /// Replays canned result sets, one per query, in call order.
    struct ScriptedConnection {
        results: VecDeque<Vec<Row>>,
    }

    impl ScriptedConnection {
        fn new(results: Vec<Vec<Row>>) -> Self {
            Self {
                results: results.into(),
            }
        }
    }

    impl Connection for ScriptedConnection {
        fn dialect(&self) -> SqlDialect {
            SqlDialect::Postgres
        }

        fn query(&mut self, _sql: &str, _params: &[SqlValue]) -> crate::error::Result<Vec<Row>> {
            Ok(self.results.pop_front().expect("scripted result"))
        }

        fn query_chunked(
            &mut self,
            sql: &str,
            params: &[SqlValue],
            _chunk_size: usize,
            on_chunk: &mut dyn FnMut(Vec<Row>) -> crate::error::Result<()>,
        ) -> crate::error::Result<()> {
            let rows = self.query(sql, params)?;
            on_chunk(rows)
        }
    }

    fn text_row(values: &[&str]) -> Row {
        Row::new(values.iter().map(|v| SqlValue::Text(v.to_string())).collect())
    }

    fn fk_row(vals: (i64, &str, &str, &str, &str, &str, bool)) -> Row {
        Row::new(vec![
            SqlValue::Int(vals.0),
            SqlValue::Text(vals.1.to_string()),
            SqlValue::Text(vals.2.to_string()),
            SqlValue::Text(vals.3.to_string()),
            SqlValue::Text(vals.4.to_string()),
            SqlValue::Text(vals.5.to_string()),
            SqlValue::Bool(vals.6),
        ])
    }

    fn scripted_users_orders() -> ScriptedConnection {
        ScriptedConnection::new(vec![
            // columns
            vec![
                text_row(&["orders", "id", "integer", "NO"]),
                text_row(&["orders", "user_id", "integer", "NO"]),
                text_row(&["users", "id", "integer", "NO"]),
                text_row(&["users", "email", "text", "YES"]),
            ],
            // primary keys
            vec![text_row(&["orders", "id"]), text_row(&["users", "id"])],
            // tables
            vec![text_row(&["orders"]), text_row(&["users"])],
            // foreign keys
            vec![fk_row((
                16400,
                "orders_user_id_fkey",
                "orders",
                "user_id",
                "users",
                "id",
                false,
            ))],
        ])
    }

    #[test]
    fn introspect_builds_tables_and_edges() {
        let mut conn = scripted_users_orders();
        let schema = introspect(&mut conn, "public").unwrap();

        assert_eq!(schema.len(), 2);
        let orders = schema.table_by_name("orders").unwrap();
        assert_eq!(orders.columns.len(), 2);
        assert!(orders.has_primary_key());

        let edges: Vec<_> = schema.edges().collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].name, "orders_user_id_fkey");
        assert!(!edges[0].nullable);
        assert!(!edges[0].is_virtual);
    }

    #[test]
    fn introspect_groups_composite_fk_columns() {
        let mut conn = ScriptedConnection::new(vec![
            vec![
                text_row(&["line_items", "order_id", "integer", "NO"]),
                text_row(&["line_items", "line_no", "integer", "NO"]),
                text_row(&["order_lines", "order_id", "integer", "NO"]),
                text_row(&["order_lines", "line_no", "integer", "NO"]),
            ],
            vec![
                text_row(&["order_lines", "order_id"]),
                text_row(&["order_lines", "line_no"]),
            ],
            vec![text_row(&["line_items"]), text_row(&["order_lines"])],
            vec![
                fk_row((16500, "li_fkey", "line_items", "order_id", "order_lines", "order_id", true)),
                fk_row((16500, "li_fkey", "line_items", "line_no", "order_lines", "line_no", false)),
            ],
        ]);
        let schema = introspect(&mut conn, "public").unwrap();

        let edges: Vec<_> = schema.edges().collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_columns.len(), 2);
        assert_eq!(edges[0].target_columns.len(), 2);
        // any nullable source column makes the edge nullable
        assert!(edges[0].nullable);
    }

    #[test]
    fn same_named_constraints_on_different_tables_stay_separate() {
        // conname is only unique per table; two FKs may share a name
        let mut conn = ScriptedConnection::new(vec![
            vec![
                text_row(&["accounts", "id", "integer", "NO"]),
                text_row(&["invoices", "id", "integer", "NO"]),
                text_row(&["invoices", "account_id", "integer", "NO"]),
                text_row(&["payments", "id", "integer", "NO"]),
                text_row(&["payments", "account_id", "integer", "NO"]),
            ],
            vec![
                text_row(&["accounts", "id"]),
                text_row(&["invoices", "id"]),
                text_row(&["payments", "id"]),
            ],
            vec![
                text_row(&["accounts"]),
                text_row(&["invoices"]),
                text_row(&["payments"]),
            ],
            vec![
                fk_row((16601, "owner_fkey", "invoices", "account_id", "accounts", "id", false)),
                fk_row((16602, "owner_fkey", "payments", "account_id", "accounts", "id", true)),
            ],
        ]);
        let schema = introspect(&mut conn, "public").unwrap();

        let edges: Vec<_> = schema.edges().collect();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.name == "owner_fkey"));
        assert!(edges.iter().all(|e| e.source_columns.len() == 1));
        assert_ne!(edges[0].source_table, edges[1].source_table);
        assert_ne!(edges[0].nullable, edges[1].nullable);
    }

    #[test]
    fn virtual_fk_defaults_target_to_primary_key() {
        let mut conn = scripted_users_orders();
        let mut schema = introspect(&mut conn, "public").unwrap();

        apply_virtual_fks(
            &mut schema,
            &[VirtualFkSpec {
                name: None,
                source_table: "orders".to_string(),
                source_columns: vec!["user_id".to_string()],
                target_table: "users".to_string(),
                target_columns: None,
            }],
        )
        .unwrap();

        let edge = schema.edges().find(|e| e.is_virtual).unwrap();
        assert_eq!(
            edge.target_columns,
            schema.table_by_name("users").unwrap().primary_key
        );
    }

    #[test]
    fn virtual_fk_unknown_table_is_schema_error() {
        let mut conn = scripted_users_orders();
        let mut schema = introspect(&mut conn, "public").unwrap();

        let err = apply_virtual_fks(
            &mut schema,
            &[VirtualFkSpec {
                name: Some("bad".to_string()),
                source_table: "nope".to_string(),
                source_columns: vec!["x".to_string()],
                target_table: "users".to_string(),
                target_columns: None,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, SubsetError::Schema(_)));
    }

    #[test]
    fn virtual_fk_arity_mismatch_is_schema_error() {
        let mut conn = scripted_users_orders();
        let mut schema = introspect(&mut conn, "public").unwrap();

        let err = apply_virtual_fks(
            &mut schema,
            &[VirtualFkSpec {
                name: Some("bad_arity".to_string()),
                source_table: "orders".to_string(),
                source_columns: vec!["user_id".to_string(), "id".to_string()],
                target_table: "users".to_string(),
                target_columns: Some(vec!["id".to_string()]),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, SubsetError::Schema(_)));
    }
}
