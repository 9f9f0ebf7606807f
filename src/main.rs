use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pregame_features::aggregate::{AggregateOptions, aggregate, bounded_parallelism};
use pregame_features::config::StoreConfig;
use pregame_features::export::{ExportFormat, export_table};
use pregame_features::sqlite_store::SqliteStore;

const DEFAULT_OUT: &str = "features.parquet";

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let config_path = arg_value(&args, "--config").map(PathBuf::from);
    let cfg = StoreConfig::load(config_path.as_deref())?;
    let host = cfg.resolve_host_alias(arg_value(&args, "--db-host").as_deref())?;
    let db_name = arg_value(&args, "--db").unwrap_or_else(|| cfg.features_db.clone());

    // Fail on bad output flags before touching the store.
    let out_path = arg_value(&args, "--out")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUT));
    let format = match arg_value(&args, "--format") {
        Some(raw) => ExportFormat::parse(&raw)
            .with_context(|| format!("unknown export format `{raw}`"))?,
        None => ExportFormat::from_path(&out_path).with_context(|| {
            format!(
                "cannot infer export format from {} (use --format)",
                out_path.display()
            )
        })?,
    };

    let store = SqliteStore::connect(&cfg, &host, &db_name)?;
    let opts = AggregateOptions {
        limit: usize_arg(&args, "--limit")?,
        parallelism: usize_arg(&args, "--parallelism")?
            .or_else(parallelism_from_env)
            .map(bounded_parallelism),
    };
    info!(host = %host, db = %db_name, store = store.location(), "aggregating features");

    let table = aggregate(&store, &opts)?;
    let report = export_table(&table, &out_path, format)?;

    println!("Feature aggregation complete");
    println!("Store: {} ({host}/{db_name})", store.location());
    println!("Output: {} ({:?})", out_path.display(), format);
    println!("Rows: {} x {} columns", report.rows, report.columns);
    println!("Null cells: {}", report.null_cells);
    println!("Unresolved features: {}", table.misses.len());
    if has_flag(&args, "--misses") {
        for miss in &table.misses {
            println!("   - game {}: {}", miss.game_id, miss.kind);
        }
    } else {
        for miss in table.misses.iter().take(6) {
            println!("   - game {}: {}", miss.game_id, miss.kind);
        }
    }

    Ok(())
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn usize_arg(args: &[String], name: &str) -> Result<Option<usize>> {
    arg_value(args, name)
        .map(|raw| {
            raw.parse::<usize>()
                .with_context(|| format!("{name} expects a non-negative integer, got `{raw}`"))
        })
        .transpose()
}

fn parallelism_from_env() -> Option<usize> {
    std::env::var("FEATURES_PARALLELISM")
        .ok()
        .and_then(|val| val.parse::<usize>().ok())
}
