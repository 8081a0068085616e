//! Estimate Ingest (bayline-ei) - Main entry point
//!
//! Command-line importer for collision estimate exports. Walks the given
//! paths, classifies each file as BMS or EMS, parses it into the canonical
//! payload, and merges it into the shop database. Re-running the importer
//! over the same files is safe; the merge converges instead of duplicating.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use walkdir::WalkDir;

use bayline_common::config::Config;
use bayline_ei::batch::{BatchConfig, BatchRunner, BatchSummary};
use bayline_ei::detect::FileFormat;
use bayline_ei::merge::MergeEngine;

/// Command-line arguments for bayline-ei.
///
/// Unset arguments fall back to `BAYLINE_*` environment variables and the
/// config file, in that order.
#[derive(Parser, Debug)]
#[command(name = "bayline-ei")]
#[command(about = "Estimate importer for Bayline shop management")]
#[command(version)]
struct Args {
    /// Estimate files or directories to import
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Shop the imports belong to
    #[arg(short, long)]
    shop: Option<String>,

    /// Force a wire format instead of detecting per file
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// Files imported concurrently
    #[arg(short, long)]
    concurrency: Option<usize>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum FormatArg {
    Bms,
    Ems,
}

impl From<FormatArg> for FileFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Bms => FileFormat::Bms,
            FormatArg::Ems => FileFormat::Ems,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bayline_ei=info,bayline_common=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = Config::load(args.database).context("failed to load configuration")?;
    if let Some(shop) = args.shop {
        config.shop_name = shop;
    }
    if let Some(n) = args.concurrency {
        config.import.concurrency = n.max(1);
    }

    let files = collect_files(&args.paths)?;
    if files.is_empty() {
        bail!("no estimate files found under the given paths");
    }
    info!(
        files = files.len(),
        database = %config.database_path.display(),
        shop = %config.shop_name,
        "starting import"
    );

    let pool = bayline_common::db::init_database(&config.database_path)
        .await
        .context("failed to open database")?;

    let batch = BatchConfig {
        format_hint: args.format.map(FileFormat::from),
        ..BatchConfig::from(&config.import)
    };
    let engine = MergeEngine::new(pool, config.shop_name);
    let runner = BatchRunner::new(engine, batch);

    let outcomes = runner.run(files).await;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(merge) => info!(
                file = %outcome.path.display(),
                action = merge.action.as_history_str(),
                job = %merge.job_number,
                "imported"
            ),
            Err(err) => error!(file = %outcome.path.display(), error = %err, "import failed"),
        }
    }

    let summary = BatchSummary::tally(&outcomes);
    info!(
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        failed = summary.failed,
        "import finished"
    );

    if summary.failed > 0 {
        bail!(
            "{} of {} files failed to import",
            summary.failed,
            summary.total()
        );
    }
    Ok(())
}

/// Expand files and directories into the list of importable files.
///
/// Directories are walked recursively and filtered to extensions a vendor
/// export would use; explicitly named files are taken as-is.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    const IMPORT_EXTENSIONS: &[&str] = &["xml", "bms", "ems", "txt", "csv"];

    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.is_dir() {
            bail!("path does not exist: {}", path.display());
        }
        for entry in WalkDir::new(path).follow_links(true) {
            let entry = entry.with_context(|| format!("walking {}", path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let importable = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMPORT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if importable {
                files.push(entry.path().to_path_buf());
            }
        }
    }
    files.sort();
    Ok(files)
}
