//! Traversal engine behavior: direction semantics, depth bounds, cycles,
//! virtual edges, and null handling.

mod common;

use common::*;
use dbsubset::db::SqlValue;
use dbsubset::fetch::RowSource;
use dbsubset::schema::{RowKey, Schema, SqlType};
use dbsubset::seed;
use dbsubset::traverse::{Direction, TraversalOptions, TraversalOutcome, Traverser};

fn run_traversal<S: RowSource>(
    schema: &Schema,
    source: &mut S,
    seeds: &[&str],
    depth: u32,
    direction: Direction,
) -> TraversalOutcome {
    let opts = TraversalOptions {
        max_depth: depth,
        direction,
        ..TraversalOptions::default()
    };
    let seeds: Vec<_> = seeds.iter().map(|s| seed::parse(s).unwrap()).collect();
    let mut traverser = Traverser::new(schema, source, opts);
    traverser.run(&seeds).unwrap()
}

fn collected_ints(outcome: &TraversalOutcome, schema: &Schema, table: &str) -> Vec<i64> {
    let id = schema.table_id(table).unwrap();
    let mut values: Vec<i64> = outcome
        .collected
        .table(id)
        .map(|rows| {
            rows.keys
                .iter()
                .map(|k| match &k.0[0] {
                    SqlValue::Int(i) => *i,
                    other => panic!("expected int key, got {other:?}"),
                })
                .collect()
        })
        .unwrap_or_default();
    values.sort();
    values
}

fn table_count(outcome: &TraversalOutcome) -> usize {
    outcome.collected.table_ids().count()
}

#[test]
fn chain_seed_collects_parent_only() {
    let schema = users_orders_schema();
    let mut source = users_orders_source();

    let outcome = run_traversal(&schema, &mut source, &["orders.id=10"], 3, Direction::Both);

    assert_eq!(collected_ints(&outcome, &schema, "orders"), vec![10]);
    assert_eq!(collected_ints(&outcome, &schema, "users"), vec![1]);
}

#[test]
fn down_traversal_collects_children() {
    let schema = users_orders_schema();
    let mut source = users_orders_source();

    let outcome = run_traversal(&schema, &mut source, &["users.id=1"], 3, Direction::Down);

    assert_eq!(collected_ints(&outcome, &schema, "users"), vec![1]);
    assert_eq!(collected_ints(&outcome, &schema, "orders"), vec![10]);
}

#[test]
fn up_only_ignores_sibling_orders() {
    let schema = users_orders_schema();
    let mut source = users_orders_source();

    let outcome = run_traversal(&schema, &mut source, &["orders.id=10"], 3, Direction::Up);

    assert_eq!(collected_ints(&outcome, &schema, "orders"), vec![10]);
    assert_eq!(collected_ints(&outcome, &schema, "users"), vec![1]);
    assert_eq!(table_count(&outcome), 2);
}

#[test]
fn polymorphic_virtual_edges_are_followed_independently() {
    let mut schema = Schema::new();
    schema.add_table(table(
        "notifications",
        &[("id", SqlType::Int, false), ("object_id", SqlType::Int, true)],
        &["id"],
    ));
    schema.add_table(table("users", &[("id", SqlType::Int, false)], &["id"]));
    schema.add_table(table("orders", &[("id", SqlType::Int, false)], &["id"]));
    add_fk(
        &mut schema,
        "virtual_notifications_users",
        "notifications",
        &["object_id"],
        "users",
        &["id"],
        true,
        true,
    );
    add_fk(
        &mut schema,
        "virtual_notifications_orders",
        "notifications",
        &["object_id"],
        "orders",
        &["id"],
        true,
        true,
    );
    schema.finalize();

    let mut source = MemoryRowSource::new();
    source.insert("notifications", vec![row(vec![int(1), int(10)])]);
    source.insert("users", vec![row(vec![int(10)])]);
    source.insert("orders", vec![row(vec![int(10)])]);

    let outcome = run_traversal(
        &schema,
        &mut source,
        &["notifications.id=1"],
        3,
        Direction::Up,
    );

    assert_eq!(collected_ints(&outcome, &schema, "notifications"), vec![1]);
    assert_eq!(collected_ints(&outcome, &schema, "users"), vec![10]);
    assert_eq!(collected_ints(&outcome, &schema, "orders"), vec![10]);
}

#[test]
fn depth_zero_collects_seed_rows_only() {
    let schema = users_orders_schema();
    let mut source = users_orders_source();

    let outcome = run_traversal(&schema, &mut source, &["orders.id=10"], 0, Direction::Both);

    assert_eq!(collected_ints(&outcome, &schema, "orders"), vec![10]);
    assert_eq!(table_count(&outcome), 1);
}

#[test]
fn depth_bounds_hop_count() {
    let mut schema = Schema::new();
    schema.add_table(table("regions", &[("id", SqlType::Int, false)], &["id"]));
    schema.add_table(table(
        "cities",
        &[("id", SqlType::Int, false), ("region_id", SqlType::Int, false)],
        &["id"],
    ));
    schema.add_table(table(
        "shops",
        &[("id", SqlType::Int, false), ("city_id", SqlType::Int, false)],
        &["id"],
    ));
    add_fk(&mut schema, "cities_region_fkey", "cities", &["region_id"], "regions", &["id"], false, false);
    add_fk(&mut schema, "shops_city_fkey", "shops", &["city_id"], "cities", &["id"], false, false);
    schema.finalize();

    let mut source = MemoryRowSource::new();
    source.insert("regions", vec![row(vec![int(1)])]);
    source.insert("cities", vec![row(vec![int(5), int(1)])]);
    source.insert("shops", vec![row(vec![int(9), int(5)])]);

    let outcome = run_traversal(&schema, &mut source, &["shops.id=9"], 1, Direction::Up);

    assert_eq!(collected_ints(&outcome, &schema, "shops"), vec![9]);
    assert_eq!(collected_ints(&outcome, &schema, "cities"), vec![5]);
    // regions is two hops away, past the depth budget
    assert_eq!(table_count(&outcome), 2);
}

#[test]
fn self_referential_chain_terminates() {
    let mut schema = Schema::new();
    schema.add_table(table(
        "employees",
        &[("id", SqlType::Int, false), ("manager_id", SqlType::Int, true)],
        &["id"],
    ));
    add_fk(
        &mut schema,
        "employees_manager_fkey",
        "employees",
        &["manager_id"],
        "employees",
        &["id"],
        true,
        false,
    );
    schema.finalize();

    let mut source = MemoryRowSource::new();
    source.insert(
        "employees",
        vec![
            row(vec![int(1), int(2)]),
            row(vec![int(2), int(3)]),
            row(vec![int(3), null()]),
        ],
    );

    let outcome = run_traversal(&schema, &mut source, &["employees.id=1"], 10, Direction::Up);
    assert_eq!(collected_ints(&outcome, &schema, "employees"), vec![1, 2, 3]);
}

#[test]
fn mutual_references_terminate_in_both_directions() {
    let mut schema = Schema::new();
    schema.add_table(table(
        "departments",
        &[("id", SqlType::Int, false), ("manager_id", SqlType::Int, true)],
        &["id"],
    ));
    schema.add_table(table(
        "employees",
        &[("id", SqlType::Int, false), ("department_id", SqlType::Int, false)],
        &["id"],
    ));
    add_fk(&mut schema, "departments_manager_fkey", "departments", &["manager_id"], "employees", &["id"], true, false);
    add_fk(&mut schema, "employees_department_fkey", "employees", &["department_id"], "departments", &["id"], false, false);
    schema.finalize();

    let mut source = MemoryRowSource::new();
    source.insert("departments", vec![row(vec![int(1), int(7)])]);
    source.insert("employees", vec![row(vec![int(7), int(1)])]);

    let outcome = run_traversal(
        &schema,
        &mut source,
        &["departments.id=1"],
        10,
        Direction::Both,
    );
    assert_eq!(collected_ints(&outcome, &schema, "departments"), vec![1]);
    assert_eq!(collected_ints(&outcome, &schema, "employees"), vec![7]);
}

#[test]
fn null_fk_component_enqueues_no_neighbor() {
    let schema = users_orders_schema();
    let mut source = MemoryRowSource::new();
    source.insert("users", vec![row(vec![int(1), text("a@b.c")])]);
    source.insert("orders", vec![row(vec![int(12), null()])]);

    let outcome = run_traversal(&schema, &mut source, &["orders.id=12"], 3, Direction::Up);

    assert_eq!(collected_ints(&outcome, &schema, "orders"), vec![12]);
    assert_eq!(table_count(&outcome), 1);
    // the seed fetch is the only query; an all-null frontier is dropped
    assert_eq!(source.fetch_calls, 1);
}

#[test]
fn excluded_tables_are_never_entered() {
    let schema = users_orders_schema();
    let mut source = users_orders_source();

    let opts = TraversalOptions {
        max_depth: 3,
        direction: Direction::Both,
        exclude: [schema.table_id("users").unwrap()].into_iter().collect(),
        ..TraversalOptions::default()
    };
    let seeds = vec![seed::parse("orders.id=10").unwrap()];
    let mut traverser = Traverser::new(&schema, &mut source, opts);
    let outcome = traverser.run(&seeds).unwrap();

    assert_eq!(collected_ints(&outcome, &schema, "orders"), vec![10]);
    assert_eq!(table_count(&outcome), 1);
}

#[test]
fn composite_fk_projects_whole_tuples() {
    let mut schema = Schema::new();
    schema.add_table(table(
        "order_lines",
        &[("order_id", SqlType::Int, false), ("line_no", SqlType::Int, false)],
        &["order_id", "line_no"],
    ));
    schema.add_table(table(
        "shipments",
        &[
            ("id", SqlType::Int, false),
            ("order_id", SqlType::Int, false),
            ("line_no", SqlType::Int, false),
        ],
        &["id"],
    ));
    add_fk(
        &mut schema,
        "shipments_line_fkey",
        "shipments",
        &["order_id", "line_no"],
        "order_lines",
        &["order_id", "line_no"],
        false,
        false,
    );
    schema.finalize();

    let mut source = MemoryRowSource::new();
    source.insert(
        "order_lines",
        vec![row(vec![int(1), int(1)]), row(vec![int(1), int(2)])],
    );
    source.insert("shipments", vec![row(vec![int(100), int(1), int(2)])]);

    let outcome = run_traversal(&schema, &mut source, &["shipments.id=100"], 3, Direction::Up);

    let lines = schema.table_id("order_lines").unwrap();
    let rows = outcome.collected.table(lines).unwrap();
    assert_eq!(rows.keys.len(), 1);
    assert!(rows.contains(&RowKey::from_values([int(1), int(2)])));
}

#[test]
fn multiple_seeds_union_their_row_sets() {
    let schema = users_orders_schema();
    let mut source = users_orders_source();

    let outcome = run_traversal(
        &schema,
        &mut source,
        &["orders.id=10", "orders.id=11"],
        3,
        Direction::Up,
    );

    assert_eq!(collected_ints(&outcome, &schema, "orders"), vec![10, 11]);
    assert_eq!(collected_ints(&outcome, &schema, "users"), vec![1, 2]);
}

#[test]
fn seed_matching_zero_rows_is_empty_success() {
    let schema = users_orders_schema();
    let mut source = users_orders_source();

    let outcome = run_traversal(&schema, &mut source, &["users.id=99"], 3, Direction::Both);
    assert_eq!(outcome.collected.total_rows(), 0);
}

#[test]
fn passthrough_tables_are_collected_in_full() {
    let mut schema = Schema::new();
    schema.add_table(table("users", &[("id", SqlType::Int, false)], &["id"]));
    schema.add_table(table(
        "countries",
        &[("code", SqlType::Text, false)],
        &["code"],
    ));
    schema.finalize();

    let mut source = MemoryRowSource::new();
    source.insert("users", vec![row(vec![int(1)])]);
    source.insert(
        "countries",
        vec![row(vec![text("no")]), row(vec![text("se")])],
    );

    let opts = TraversalOptions {
        max_depth: 3,
        direction: Direction::Both,
        passthrough: vec![schema.table_id("countries").unwrap()],
        ..TraversalOptions::default()
    };
    let seeds = vec![seed::parse("users.id=1").unwrap()];
    let mut traverser = Traverser::new(&schema, &mut source, opts);
    let outcome = traverser.run(&seeds).unwrap();

    let countries = schema.table_id("countries").unwrap();
    assert_eq!(outcome.collected.table(countries).unwrap().len(), 2);
    assert!(outcome.path.iter().any(|p| p.starts_with("passthrough:")));
}

#[test]
fn traversal_path_records_provenance() {
    let schema = users_orders_schema();
    let mut source = users_orders_source();

    let outcome = run_traversal(&schema, &mut source, &["orders.id=10"], 3, Direction::Up);

    assert!(outcome.path[0].starts_with("seed: orders"));
    assert!(outcome
        .path
        .iter()
        .any(|p| p.contains("orders --(orders_user_id_fkey)--> users (1 rows)")));
}
