//! Inspect command: print the schema graph as the extractor sees it.

use crate::config::FileConfig;
use crate::db::postgres::PgConnection;
use crate::schema::{apply_virtual_fks, introspect, plan_insert_order};
use anyhow::{Context, Result};
use std::path::Path;

pub fn run(url: &str, schema_name: &str, config: Option<&Path>) -> Result<()> {
    let file = match config {
        Some(path) => FileConfig::load(path).context("loading config file")?,
        None => FileConfig::default(),
    };

    let mut conn = PgConnection::connect(url, Some(schema_name))?;
    let mut schema = introspect(&mut conn, schema_name)?;
    apply_virtual_fks(&mut schema, &file.virtual_foreign_keys)?;

    println!(
        "Schema '{}': {} tables, {} foreign keys",
        schema_name,
        schema.len(),
        schema.edges().count()
    );
    println!();

    for table in schema.tables() {
        let pk: Vec<&str> = table
            .primary_key
            .iter()
            .filter_map(|c| table.column(*c).map(|c| c.name.as_str()))
            .collect();
        let pk_desc = if pk.is_empty() {
            "no primary key".to_string()
        } else {
            format!("pk: {}", pk.join(", "))
        };
        println!("{} ({} columns, {})", table.name, table.columns.len(), pk_desc);

        for &eid in schema.edges_where_child(table.id) {
            println!("  -> {}", schema.describe_edge(eid));
        }
    }

    // Order preview assumes one row per table; counts only matter for
    // choosing which edge to defer.
    let counts = schema.tables().map(|t| (t.id, 1usize)).collect();
    match plan_insert_order(&schema, &counts) {
        Ok(plan) => {
            println!("\nInsert order:");
            for (i, &table) in plan.ordered.iter().enumerate() {
                println!("  {}. {}", i + 1, schema.table(table).name);
            }
            if !plan.deferred.is_empty() {
                println!("\nEdges deferred to break cycles:");
                for &edge in &plan.deferred {
                    println!("  - {}", schema.describe_edge(edge));
                }
            }
        }
        Err(err) => println!("\nNo insert order exists: {}", err),
    }

    Ok(())
}
