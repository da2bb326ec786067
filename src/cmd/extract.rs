//! Extract command: merges file config with flags and drives the engine.

use crate::config::{FileConfig, DEFAULT_DEPTH, MAX_DEPTH};
use crate::db::postgres::PgConnection;
use crate::emit::{JsonMode, OutputFormat};
use crate::extract::{extract, ExtractOptions};
use crate::seed;
use crate::traverse::Direction;
use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Duration;

pub struct ExtractArgs {
    pub url: String,
    pub seeds: Vec<String>,
    pub schema: String,
    pub depth: Option<u32>,
    pub direction: Option<String>,
    pub exclude: Option<String>,
    pub passthrough: Option<String>,
    pub config: Option<PathBuf>,
    pub out_file: Option<PathBuf>,
    pub format: Option<String>,
    pub transaction: bool,
    pub drop_tables: bool,
    pub disable_fk_checks: bool,
    pub json_mode: Option<String>,
    pub json_pretty: bool,
    pub anonymize: bool,
    pub anonymize_seed: Option<String>,
    pub stream: bool,
    pub no_validate: bool,
    pub fail_on_validation_error: bool,
    pub dry_run: bool,
    pub verbose: bool,
    pub progress: bool,
}

pub fn run(args: ExtractArgs) -> Result<()> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path).context("loading config file")?,
        None => FileConfig::default(),
    };
    let opts = build_options(&args, file)?;

    let conn = PgConnection::connect(&args.url, Some(&args.schema))?;

    let bar = if args.progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{prefix}] {msg}")
                .expect("static template"),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Some(bar)
    } else {
        None
    };

    let callback = |stage: &str, message: &str| {
        if let Some(bar) = &bar {
            bar.set_prefix(stage.to_string());
            bar.set_message(message.to_string());
        }
    };

    let result = extract(conn, &args.schema, &opts, Some(&callback));

    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    let report = result?;

    if report.dry_run {
        eprintln!(
            "Dry run: {} rows across {} tables would be extracted.",
            report.total_rows,
            report.table_counts.len()
        );
    } else {
        eprintln!(
            "Extracted {} rows across {} tables.",
            report.total_rows,
            report.table_counts.len()
        );
    }

    for (table, count) in &report.table_counts {
        eprintln!("  {}: {} rows", table, count);
    }

    if !report.deferred_edges.is_empty() {
        eprintln!("\nDeferred FK edges (restored by UPDATE after insert):");
        for edge in &report.deferred_edges {
            eprintln!("  - {}", edge);
        }
    }

    if let Some(validation) = &report.validation {
        if !validation.is_valid() {
            eprintln!(
                "\nWarning: {} orphaned reference(s) detected:",
                validation.violations.len()
            );
            eprintln!("{}", validation.format_report());
        }
    }

    if args.verbose && !report.traversal_path.is_empty() {
        eprintln!("\nTraversal path:");
        for entry in &report.traversal_path {
            eprintln!("  {}", entry);
        }
    }

    Ok(())
}

fn build_options(args: &ExtractArgs, file: FileConfig) -> Result<ExtractOptions> {
    let mut opts = ExtractOptions {
        seeds: seed::parse_all(&args.seeds)?,
        depth: args
            .depth
            .or(file.default_depth)
            .unwrap_or(DEFAULT_DEPTH),
        direction: match &args.direction {
            Some(raw) => raw.parse::<Direction>().map_err(anyhow::Error::msg)?,
            None => file.direction.unwrap_or_default(),
        },
        exclude_tables: merge_list(super::parse_table_list(&args.exclude), file.exclude_tables),
        passthrough_tables: merge_list(
            super::parse_table_list(&args.passthrough),
            file.passthrough_tables,
        ),
        validate: !args.no_validate && file.validate.unwrap_or(true),
        fail_on_validation_error: args.fail_on_validation_error
            || file.fail_on_validation_error.unwrap_or(false),
        anonymize: file.anonymize,
        output: file.output,
        performance: file.performance,
        virtual_foreign_keys: file.virtual_foreign_keys,
        dry_run: args.dry_run,
        cancel: Default::default(),
    };

    if opts.depth < 1 {
        bail!("--depth must be at least 1");
    }
    if opts.depth > MAX_DEPTH {
        bail!(
            "--depth must be at most {} (every extra hop multiplies the load on the source database)",
            MAX_DEPTH
        );
    }

    if args.anonymize {
        opts.anonymize.enabled = true;
    }
    if let Some(seed) = &args.anonymize_seed {
        opts.anonymize.enabled = true;
        opts.anonymize.seed = Some(seed.clone());
    }

    if let Some(format) = &args.format {
        opts.output.format = format.parse::<OutputFormat>().map_err(anyhow::Error::msg)?;
    }
    if let Some(mode) = &args.json_mode {
        opts.output.json_mode = mode.parse::<JsonMode>().map_err(anyhow::Error::msg)?;
    }
    if args.out_file.is_some() {
        opts.output.out_file = args.out_file.clone();
    }
    opts.output.include_transaction |= args.transaction;
    opts.output.include_drop_tables |= args.drop_tables;
    opts.output.disable_fk_checks |= args.disable_fk_checks;
    opts.output.json_pretty |= args.json_pretty;
    opts.performance.streaming.enabled |= args.stream;

    Ok(opts)
}

fn merge_list(flag: Vec<String>, file: Vec<String>) -> Vec<String> {
    if flag.is_empty() {
        file
    } else {
        flag
    }
}
