//! Sigsleuth - file format identification for digital preservation triage
//!
//! Point it at files or directories and it reports what they are, using
//! a compiled catalogue of byte-pattern and container signatures rather
//! than trusting extensions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use walkdir::WalkDir;

use sigsleuth::catalogue::FormatCatalogue;
use sigsleuth::config::Config;
use sigsleuth::identify::container::ContainerFileDef;
use sigsleuth::identify::{
    FormatIdentifier, IdentificationRequest, IdentificationResultCollection, MatchStrategy,
};

#[derive(Debug, Parser)]
#[command(name = "sigsleuth", version, about = "Identify file formats by signature")]
struct Cli {
    /// Files or directories to identify
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Binary signature file (JSON)
    #[arg(short, long)]
    signatures: Option<PathBuf>,

    /// Container signature file (JSON)
    #[arg(short = 'c', long)]
    containers: Option<PathBuf>,

    /// Match strategy
    #[arg(long, value_enum)]
    strategy: Option<MatchStrategy>,

    /// Bytes scanned from each end of a file (negative = unlimited)
    #[arg(long)]
    max_bytes: Option<i64>,

    /// Report every format registered for an extension, not only the
    /// signature-less fallbacks
    #[arg(long)]
    all_extensions: bool,

    /// Emit results as JSON lines
    #[arg(long)]
    json: bool,

    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(serde::Serialize)]
struct FileReport {
    path: String,
    #[serde(flatten)]
    results: IdentificationResultCollection,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::from_default_env().add_directive("sigsleuth=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    let Some(signature_file) = cli
        .signatures
        .clone()
        .or_else(|| config.signatures.signature_file.clone())
    else {
        bail!("no signature file given; pass --signatures or set one in the config");
    };
    let catalogue = Arc::new(
        FormatCatalogue::load(&signature_file)
            .with_context(|| format!("loading {}", signature_file.display()))?,
    );

    let max_bytes = cli.max_bytes.unwrap_or(config.scan.max_bytes_to_scan);
    let mut identifier = FormatIdentifier::new(catalogue, max_bytes);

    let container_file = cli
        .containers
        .clone()
        .or_else(|| config.signatures.container_file.clone());
    if let Some(path) = container_file {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let def: ContainerFileDef = serde_json::from_str(&text)
            .with_context(|| format!("parsing {}", path.display()))?;
        identifier.register_containers(&def)?;
    }

    let strategy = cli.strategy.unwrap_or(config.scan.strategy);
    let all_extensions = cli.all_extensions || config.scan.all_extensions;

    if config.scan.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.scan.workers)
            .build_global()
            .context("building worker pool")?;
    }

    let files = collect_files(&cli.paths);
    if files.is_empty() {
        bail!("no files found under the given paths");
    }

    let bar = if cli.json || files.len() == 1 {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(files.len() as u64)
            .with_style(ProgressStyle::with_template("{wide_bar} {pos}/{len} {eta}")?)
    };

    let reports: Vec<FileReport> = files
        .par_iter()
        .progress_with(bar)
        .filter_map(|path| match identify_one(&identifier, strategy, path, all_extensions) {
            Ok(results) => Some(FileReport {
                path: path.display().to_string(),
                results,
            }),
            Err(error) => {
                warn!(path = %path.display(), %error, "identification failed");
                None
            }
        })
        .collect();

    for report in &reports {
        if cli.json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            print_text(report);
        }
    }

    Ok(())
}

fn identify_one(
    identifier: &FormatIdentifier,
    strategy: MatchStrategy,
    path: &PathBuf,
    all_extensions: bool,
) -> Result<IdentificationResultCollection> {
    let request = IdentificationRequest::open(path)?;
    let results = strategy.run(identifier, &request, all_extensions)?;
    Ok(results)
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn print_text(report: &FileReport) {
    if report.results.is_empty() {
        println!("{}: no identification", report.path);
        return;
    }
    for result in &report.results.results {
        let mismatch = if report.results.extension_mismatch {
            " [extension mismatch]"
        } else {
            ""
        };
        println!(
            "{}: {} {} ({}){}",
            report.path, result.puid, result.name, result.method, mismatch
        );
    }
}
