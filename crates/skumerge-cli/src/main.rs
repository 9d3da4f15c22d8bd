use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use skumerge_core::{
    DedupError, Deduplicator, ParquetSink, ParquetSource, RunSummary, SimilarityMetric,
    SkumergeConfig, export_csv,
};

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "skumerge",
    about = "Product catalog deduplication — exact IDs plus fuzzy title matching",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting SKUMERGE_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Deduplicate a Parquet catalog into a new Parquet file.
    Dedupe {
        input: PathBuf,
        output: PathBuf,
        /// Fuzzy title threshold, 0–100.
        #[arg(long)]
        similarity: Option<f64>,
        /// Rows per ingestion chunk.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Threads used for block matching.
        #[arg(long)]
        workers: Option<usize>,
        /// Title characters in the blocking key.
        #[arg(long)]
        prefix_length: Option<usize>,
        /// token_set, token_sort or levenshtein.
        #[arg(long)]
        metric: Option<SimilarityMetric>,
        #[arg(long, action = ArgAction::Append)]
        id_column: Vec<String>,
        #[arg(long)]
        brand_column: Option<String>,
        #[arg(long, action = ArgAction::Append)]
        title_column: Vec<String>,
        /// Config file to use instead of the default location.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Convert a Parquet file to CSV.
    ToCsv {
        input: PathBuf,
        /// Defaults to the input path with a .csv extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = "50000")]
        chunk_size: usize,
    },

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show version information.
    Version,
}

// ─── Config Actions ──────────────────────────────────────────────────────────

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective config.
    Show,
    /// Print the config file location.
    Path,
    /// Write the default config file.
    Init {
        #[arg(long)]
        force: bool,
    },
}

// ─── Main ────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let start = Instant::now();
    let cli = Cli::parse();

    // ── Env var overrides ──────────────────────────────────────────────────
    let json_output = cli.json || std::env::var("SKUMERGE_JSON").as_deref() == Ok("1");

    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        // ── Dedupe ─────────────────────────────────────────────────────────

        Commands::Dedupe {
            input,
            output,
            similarity,
            chunk_size,
            workers,
            prefix_length,
            metric,
            id_column,
            brand_column,
            title_column,
            config,
        } => {
            let mut cfg = match &config {
                Some(path) => SkumergeConfig::load_from(path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => SkumergeConfig::load().context("loading config")?,
            };
            if let Some(v) = similarity {
                cfg.matching.similarity_threshold = v;
            }
            if let Some(v) = prefix_length {
                cfg.matching.blocking_prefix_length = v;
            }
            if let Some(v) = metric {
                cfg.matching.metric = v;
            }
            if let Some(v) = chunk_size {
                cfg.pipeline.chunk_size = v;
            }
            if let Some(v) = workers {
                cfg.pipeline.worker_count = v;
            }
            if !id_column.is_empty() {
                cfg.columns.identifier = id_column;
            }
            if let Some(v) = brand_column {
                cfg.columns.brand = v;
            }
            if !title_column.is_empty() {
                cfg.columns.title = title_column;
            }

            match run_dedupe(cfg, &input, &output) {
                Ok(summary) => {
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({
                            "status": "ok",
                            "data": {
                                "input": input,
                                "output": output,
                                "summary": summary,
                            },
                            "meta": { "duration_ms": dur }
                        }))?;
                    } else {
                        println!(
                            "{} records → {} unique products ({} duplicates removed)",
                            summary.input_records,
                            summary.output_records,
                            summary.duplicates_removed()
                        );
                        println!("  Written to: {}", output.display());
                        println!(
                            "  Chunks: {}  Blocks: {}  Comparisons: {}",
                            summary.chunks, summary.blocks, summary.comparisons
                        );
                    }
                }
                Err(e) => fail(json_output, start, &e),
            }
        }

        // ── To CSV ─────────────────────────────────────────────────────────

        Commands::ToCsv {
            input,
            output,
            chunk_size,
        } => {
            let output = output.unwrap_or_else(|| input.with_extension("csv"));
            match export_csv(&input, &output, chunk_size) {
                Ok(rows) => {
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({
                            "status": "ok",
                            "data": { "input": input, "output": output, "rows": rows },
                            "meta": { "duration_ms": dur }
                        }))?;
                    } else {
                        println!("Converted {rows} rows → {}", output.display());
                    }
                }
                Err(e) => fail(json_output, start, &e),
            }
        }

        // ── Config ─────────────────────────────────────────────────────────

        Commands::Config { action } => {
            let path = SkumergeConfig::config_path();
            match action {
                ConfigAction::Show => {
                    let cfg = SkumergeConfig::load()
                        .with_context(|| format!("loading config {}", path.display()))?;
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":cfg,"meta":{"duration_ms":dur}}))?;
                    } else {
                        print!("{}", cfg.to_toml()?);
                    }
                }
                ConfigAction::Path => {
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({
                            "status":"ok",
                            "data":{"path":path,"exists":path.exists()},
                            "meta":{"duration_ms":dur}
                        }))?;
                    } else {
                        println!("{}", path.display());
                    }
                }
                ConfigAction::Init { force } => {
                    if path.exists() && !force {
                        eprintln!("Config already exists: {} (use --force to overwrite)", path.display());
                        std::process::exit(1);
                    }
                    SkumergeConfig::default()
                        .save_to(&path)
                        .with_context(|| format!("writing config {}", path.display()))?;
                    let dur = start.elapsed().as_millis();
                    if json_output {
                        print_json(&serde_json::json!({"status":"ok","data":{"path":path},"meta":{"duration_ms":dur}}))?;
                    } else {
                        println!("✓ Config written to {}", path.display());
                    }
                }
            }
        }

        // ── Version ────────────────────────────────────────────────────────

        Commands::Version => {
            let version = env!("CARGO_PKG_VERSION");
            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({"status":"ok","data":{"version":version},"meta":{"duration_ms":dur}}))?;
            } else {
                println!("skumerge v{version}");
            }
        }
    }

    Ok(())
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn run_dedupe(config: SkumergeConfig, input: &Path, output: &Path) -> skumerge_core::Result<RunSummary> {
    let dedup = Deduplicator::new(config)?;
    info!(
        input = %input.display(),
        output = %output.display(),
        threshold = dedup.config().matching.similarity_threshold,
        workers = dedup.config().pipeline.worker_count,
        "starting deduplication"
    );
    let mut source = ParquetSource::open(input, dedup.config().pipeline.chunk_size)?;
    let mut sink = ParquetSink::create(output, source.arrow_schema())?;
    dedup.run(&mut source, &mut sink)
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Report a library error and exit with its code.
fn fail(json_output: bool, start: Instant, err: &DedupError) -> ! {
    let dur = start.elapsed().as_millis();
    debug!(kind = error_kind(err), error = ?err, "command failed");
    if json_output {
        let envelope = serde_json::json!({
            "status": "error",
            "error": error_kind(err),
            "message": err.to_string(),
            "meta": { "duration_ms": dur }
        });
        if let Ok(text) = serde_json::to_string_pretty(&envelope) {
            println!("{text}");
        }
    } else {
        eprintln!("Error: {err}");
    }
    std::process::exit(err.exit_code() as i32);
}

fn error_kind(err: &DedupError) -> &'static str {
    match err {
        DedupError::InvalidConfig(_) => "invalid_config",
        DedupError::MissingColumn(_) => "missing_column",
        DedupError::UnsupportedColumn { .. } => "unsupported_column",
        DedupError::SchemaMismatch { .. } => "schema_mismatch",
        DedupError::BlockFailed { .. } => "block_failed",
        DedupError::Io(_) | DedupError::Persist(_) => "io",
        _ => "internal",
    }
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}
