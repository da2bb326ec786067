//! Extraction orchestration.
//!
//! Wires the pipeline together: introspection, virtual-FK merge,
//! sensitivity tagging, seed validation, BFS traversal, insert-order
//! planning, referential validation, and emission. [`run_with_source`]
//! is the driver-independent half; [`extract`] binds it to a live
//! connection through the SQL fetcher.

use crate::anonymize::{self, AnonymizeConfig, Anonymizer};
use crate::config::{PerformanceConfig, DEFAULT_DEPTH};
use crate::db::{CancelToken, Connection, SqlDialect};
use crate::emit::{self, EmitInput, EmitStats, OutputOptions};
use crate::error::{Result, SubsetError};
use crate::fetch::{RowSource, SqlRowFetcher};
use crate::schema::{
    apply_virtual_fks, introspect, plan_insert_order, Schema, TableId, VirtualFkSpec,
};
use crate::seed::SeedPredicate;
use crate::traverse::{is_traversal_leaf, Direction, TraversalOptions, Traverser};
use crate::validate::{validate, ValidationReport};
use ahash::AHashSet;
use tracing::{info, warn};

/// Progress callback: `(stage, message)`.
pub type ProgressFn<'a> = dyn Fn(&str, &str) + 'a;

/// Fully resolved options for one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub seeds: Vec<SeedPredicate>,
    pub depth: u32,
    pub direction: Direction,
    pub exclude_tables: Vec<String>,
    pub passthrough_tables: Vec<String>,
    pub validate: bool,
    pub fail_on_validation_error: bool,
    pub anonymize: AnonymizeConfig,
    pub output: OutputOptions,
    pub performance: PerformanceConfig,
    pub virtual_foreign_keys: Vec<VirtualFkSpec>,
    pub dry_run: bool,
    pub cancel: CancelToken,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            depth: DEFAULT_DEPTH,
            direction: Direction::Both,
            exclude_tables: Vec::new(),
            passthrough_tables: Vec::new(),
            validate: true,
            fail_on_validation_error: false,
            anonymize: AnonymizeConfig::default(),
            output: OutputOptions::default(),
            performance: PerformanceConfig::default(),
            virtual_foreign_keys: Vec::new(),
            dry_run: false,
            cancel: CancelToken::new(),
        }
    }
}

/// What one run produced, for reporting.
#[derive(Debug, Default)]
pub struct ExtractionReport {
    /// Tables in insert order with their collected row counts
    pub table_counts: Vec<(String, usize)>,
    pub insert_order: Vec<String>,
    /// Human-readable descriptions of deferred (cycle-breaking) edges
    pub deferred_edges: Vec<String>,
    pub traversal_path: Vec<String>,
    pub validation: Option<ValidationReport>,
    pub emit: Option<EmitStats>,
    pub dry_run: bool,
    pub total_rows: usize,
}

/// Run a full extraction against a live connection.
///
/// The connection is owned for the duration of the run and released on
/// every exit path when the fetcher drops.
pub fn extract<C: Connection>(
    mut conn: C,
    schema_name: &str,
    opts: &ExtractOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ExtractionReport> {
    let dialect = conn.dialect();

    report(progress, "schema", "Introspecting database schema...");
    let mut schema = introspect(&mut conn, schema_name)?;
    apply_virtual_fks(&mut schema, &opts.virtual_foreign_keys)?;
    anonymize::tag_schema(&mut schema, &opts.anonymize);
    report(
        progress,
        "schema",
        &format!(
            "Found {} tables, {} foreign keys",
            schema.len(),
            schema.edges().count()
        ),
    );

    let mut fetcher =
        SqlRowFetcher::new(conn, opts.performance.batch_size, opts.cancel.clone());
    run_with_source(&schema, dialect, &mut fetcher, opts, progress)
}

/// Driver-independent extraction over an already-built schema model.
pub fn run_with_source<S: RowSource>(
    schema: &Schema,
    dialect: SqlDialect,
    source: &mut S,
    opts: &ExtractOptions,
    progress: Option<&ProgressFn<'_>>,
) -> Result<ExtractionReport> {
    let exclude = resolve_tables(schema, &opts.exclude_tables, "exclude_tables");
    let passthrough: Vec<TableId> =
        resolve_tables(schema, &opts.passthrough_tables, "passthrough_tables")
            .into_iter()
            .collect();

    validate_seeds(schema, &opts.seeds, &exclude)?;

    let traversal_opts = TraversalOptions {
        max_depth: opts.depth,
        direction: opts.direction,
        exclude,
        passthrough,
        stream_leaves: opts.performance.streaming.enabled,
    };

    report(
        progress,
        "traverse",
        &format!(
            "Traversing from {} seed(s), depth {}, direction {}",
            opts.seeds.len(),
            opts.depth,
            opts.direction
        ),
    );
    let mut outcome = {
        let mut traverser = Traverser::new(schema, source, traversal_opts.clone());
        traverser.run(&opts.seeds)?
    };
    report(
        progress,
        "traverse",
        &format!(
            "Collected {} rows across {} tables",
            outcome.collected.total_rows(),
            outcome.collected.table_ids().count()
        ),
    );

    // Leaf tables past the streaming threshold free their values now and
    // stream back through a cursor at emit time.
    let threshold = opts.performance.streaming.threshold;
    if !opts.performance.streaming.enabled && threshold > 0 && !opts.dry_run {
        let oversized: Vec<TableId> = outcome
            .collected
            .table_ids()
            .filter(|&t| {
                outcome.collected.table(t).map(|r| r.len()).unwrap_or(0) >= threshold
                    && is_traversal_leaf(schema, &traversal_opts, t)
            })
            .collect();
        for table in oversized {
            info!(table = %schema.table(table).name, "leaf table over streaming threshold");
            outcome.collected.drop_values(table);
        }
    }

    opts.cancel.check()?;
    report(progress, "sort", "Sorting tables by dependencies...");
    let row_counts = outcome.collected.row_counts();
    let plan = plan_insert_order(schema, &row_counts)?;

    let mut result = ExtractionReport {
        insert_order: plan
            .ordered
            .iter()
            .map(|&t| schema.table(t).name.clone())
            .collect(),
        table_counts: plan
            .ordered
            .iter()
            .map(|&t| {
                (
                    schema.table(t).name.clone(),
                    row_counts.get(&t).copied().unwrap_or(0),
                )
            })
            .collect(),
        deferred_edges: plan
            .deferred
            .iter()
            .map(|&e| schema.describe_edge(e))
            .collect(),
        traversal_path: std::mem::take(&mut outcome.path),
        total_rows: outcome.collected.total_rows(),
        dry_run: opts.dry_run,
        ..ExtractionReport::default()
    };

    if !result.deferred_edges.is_empty() {
        report(
            progress,
            "cycles",
            &format!(
                "Breaking {} circular reference(s) via deferred updates",
                result.deferred_edges.len()
            ),
        );
    }

    if opts.dry_run {
        report(
            progress,
            "dry-run",
            &format!(
                "Would extract {} rows across {} tables",
                result.total_rows,
                result.table_counts.len()
            ),
        );
        return Ok(result);
    }

    if opts.validate {
        report(progress, "validate", "Checking referential integrity...");
        let validation = validate(schema, &outcome.collected, &plan.deferred);
        if validation.is_valid() {
            report(progress, "validate", "Validation passed");
        } else {
            warn!(
                orphans = validation.violations.len(),
                "validation found orphaned references"
            );
            report(
                progress,
                "validate",
                &format!(
                    "Validation failed: {} orphaned reference(s)",
                    validation.violations.len()
                ),
            );
            if opts.fail_on_validation_error {
                return Err(SubsetError::Validation {
                    orphans: validation.violations.len(),
                    report: validation.format_report(),
                });
            }
        }
        result.validation = Some(validation);
    }

    let mut anonymizer = build_anonymizer(schema, &opts.anonymize);

    opts.cancel.check()?;
    report(progress, "emit", "Writing output...");
    let input = EmitInput {
        schema,
        collected: &outcome.collected,
        plan: &plan,
        dialect,
        chunk_size: opts.performance.streaming.chunk_size,
    };
    let stats = emit::emit(&input, &mut anonymizer, source, &opts.output)?;
    report(
        progress,
        "emit",
        &format!("Wrote {} rows", stats.total_rows),
    );
    result.emit = Some(stats);

    Ok(result)
}

fn build_anonymizer(schema: &Schema, config: &AnonymizeConfig) -> Option<Anonymizer> {
    if !config.enabled {
        return None;
    }
    let seed = config.seed.clone().unwrap_or_else(|| {
        let seed = anonymize::random_seed();
        warn!("anonymize.seed not set; using a random per-run seed (cross-run determinism lost)");
        seed
    });
    Some(Anonymizer::new(schema, seed))
}

fn resolve_tables(schema: &Schema, names: &[String], what: &str) -> AHashSet<TableId> {
    let mut ids = AHashSet::new();
    for name in names {
        match schema.table_id(name) {
            Some(id) => {
                ids.insert(id);
            }
            None => warn!(table = %name, "unknown table in {}, ignored", what),
        }
    }
    ids
}

fn validate_seeds(
    schema: &Schema,
    seeds: &[SeedPredicate],
    exclude: &AHashSet<TableId>,
) -> Result<()> {
    for seed in seeds {
        let Some(table_id) = schema.table_id(&seed.table) else {
            let mut reason = format!("unknown table '{}'", seed.table);
            let suggestions = schema.similar_tables(&seed.table, 3);
            if !suggestions.is_empty() {
                reason.push_str(&format!(". Did you mean: {}?", suggestions.join(", ")));
            }
            return Err(SubsetError::invalid_seed(&seed.source, reason));
        };
        if exclude.contains(&table_id) {
            return Err(SubsetError::invalid_seed(
                &seed.source,
                format!("table '{}' is excluded from traversal", seed.table),
            ));
        }
        if !schema.table(table_id).has_primary_key() {
            return Err(SubsetError::invalid_seed(
                &seed.source,
                format!("table '{}' has no primary key", seed.table),
            ));
        }
    }
    Ok(())
}

fn report(progress: Option<&ProgressFn<'_>>, stage: &str, message: &str) {
    if let Some(f) = progress {
        f(stage, message);
    }
}
