use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use pregame_features::config::StoreConfig;
use pregame_features::sqlite_store::{Collection, SqliteStore};

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
    let dump_dir = parse_dir_arg(&args)
        .context("usage: ingest <dump-dir> [--db-host alias] [--db name] [--config path]")?;
    if !dump_dir.is_dir() {
        return Err(anyhow!("dump directory {} not found", dump_dir.display()));
    }

    let config_path = arg_value(&args, "--config").map(PathBuf::from);
    let cfg = StoreConfig::load(config_path.as_deref())?;
    let host = cfg.resolve_host_alias(arg_value(&args, "--db-host").as_deref())?;
    let db_name = arg_value(&args, "--db").unwrap_or_else(|| cfg.features_db.clone());
    let store = SqliteStore::connect(&cfg, &host, &db_name)?;

    println!("Ingest into {} ({host}/{db_name})", store.location());
    let mut loaded_any = false;
    for collection in Collection::ALL {
        let path = dump_dir.join(format!("{}.jsonl", collection.name()));
        if !path.is_file() {
            warn!(path = %path.display(), "collection dump missing, skipped");
            continue;
        }
        loaded_any = true;
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        let summary = store.insert_jsonl(collection, &raw)?;
        println!(
            "{}: inserted={} skipped={} total={}",
            collection.name(),
            summary.inserted,
            summary.skipped,
            store.count(collection)?
        );
        if !summary.errors.is_empty() {
            println!("  errors: {}", summary.errors.len());
            for err in summary.errors.iter().take(6) {
                println!("   - {err}");
            }
        }
    }
    if !loaded_any {
        return Err(anyhow!(
            "no games.jsonl, market_odds.jsonl or team_sheets.jsonl in {}",
            dump_dir.display()
        ));
    }

    Ok(())
}

fn parse_dir_arg(args: &[String]) -> Option<PathBuf> {
    let mut skip_next = false;
    for arg in args {
        if skip_next {
            skip_next = false;
            continue;
        }
        if matches!(arg.as_str(), "--db-host" | "--db" | "--config") {
            skip_next = true;
            continue;
        }
        if arg.starts_with("--") {
            continue;
        }
        return Some(PathBuf::from(arg));
    }
    None
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
