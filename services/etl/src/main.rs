//! ETL Service - Builds the sales star schema from raw extracts
//!
//! Responsibilities:
//! - Read Clients.csv, Produits.csv and Ventes.csv (quoted lines, BOM)
//! - Clean, coerce and deduplicate every extract
//! - Build Dim_Clients, Dim_Produits, Dim_Temps and Fact_Ventes
//! - Persist the four tables, all or nothing
//!
//! CRITICAL: This service must be DETERMINISTIC
//! Same extracts = byte-identical warehouse tables

mod extract;
mod star;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warehouse::{store, Warehouse};

#[derive(Parser, Debug)]
#[command(name = "etl", about = "Builds the sales star schema from raw extracts")]
struct Args {
    /// Directory holding Clients.csv, Produits.csv and Ventes.csv
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Directory receiving the Dim_* and Fact_* tables
    #[arg(long)]
    warehouse_dir: Option<PathBuf>,

    /// Dry run - build the tables but don't write them
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Verify mode - check the persisted tables match a fresh build
    #[arg(long, default_value = "false")]
    verify: bool,
}

#[derive(Debug, Clone)]
struct Config {
    input_dir: PathBuf,
    warehouse_dir: PathBuf,
}

impl Config {
    fn from_env() -> Self {
        Self {
            input_dir: PathBuf::from(
                std::env::var("ETL_INPUT_DIR").unwrap_or_else(|_| ".".to_string()),
            ),
            warehouse_dir: PathBuf::from(
                std::env::var("WAREHOUSE_DIR").unwrap_or_else(|_| ".".to_string()),
            ),
        }
    }

    /// Command-line flags win over the environment
    fn with_args(mut self, args: &Args) -> Self {
        if let Some(dir) = &args.input_dir {
            self.input_dir = dir.clone();
        }
        if let Some(dir) = &args.warehouse_dir {
            self.warehouse_dir = dir.clone();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write,
    DryRun,
    Verify,
}

/// Extract and build the whole warehouse in memory
fn build(input_dir: &Path) -> warehouse::Result<(Warehouse, star::Orphans)> {
    let extracts = extract::extract_all(input_dir)?;
    Ok(star::build_warehouse(extracts))
}

/// Tables whose persisted bytes differ from a fresh build.
/// A missing table counts as differing.
fn verify(dir: &Path, built: &Warehouse) -> warehouse::Result<Vec<&'static str>> {
    let mut differing = Vec::new();
    for (file, expected) in store::render_warehouse(built)? {
        match fs::read(dir.join(file)) {
            Ok(actual) if actual == expected => {}
            Ok(_) => differing.push(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => differing.push(file),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(differing)
}

fn run(config: &Config, mode: Mode) -> Result<()> {
    info!(input = %config.input_dir.display(), "extracting");
    let (built, _orphans) = build(&config.input_dir).context("Warehouse construction aborted")?;

    match mode {
        Mode::DryRun => {
            info!("dry run - no tables written");
        }
        Mode::Verify => {
            let differing = verify(&config.warehouse_dir, &built)
                .context("Failed to read persisted warehouse")?;
            if !differing.is_empty() {
                anyhow::bail!(
                    "Warehouse in {} does not match a fresh build: {}",
                    config.warehouse_dir.display(),
                    differing.join(", ")
                );
            }
            info!("warehouse matches a fresh build");
        }
        Mode::Write => {
            store::write_warehouse(&config.warehouse_dir, &built)
                .context("Failed to write warehouse tables")?;
            info!(
                dir = %config.warehouse_dir.display(),
                "ETL complete, Dim_* and Fact_* tables ready for the API"
            );
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("etl=info".parse()?)
                .add_directive("warehouse=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env().with_args(&args);

    let mode = match (args.dry_run, args.verify) {
        (true, true) => anyhow::bail!("--dry-run and --verify are mutually exclusive"),
        (true, false) => Mode::DryRun,
        (false, true) => Mode::Verify,
        (false, false) => Mode::Write,
    };

    if let Err(e) = run(&config, mode) {
        warn!("ETL failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

// =============================================================================
// TESTS - end to end over real files
// =============================================================================
