//! memtrace: ingest, inspect and query instruction and memory access traces

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use memtrace::dump::dump_file;
use memtrace::ingest::{ingest_file, IngestConfig};
use memtrace::sqlite::{CommitMode, SqliteWriter, TraceStore};
use memtrace::timeline::Timeline;
use memtrace::trace::parse_address;
use memtrace::view::{IndexLoader, Viewport};

#[derive(Parser)]
#[command(name = "memtrace")]
#[command(about = "Capture, store and explore instruction and memory access traces")]
#[command(version)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a binary trace into a SQLite store
    Ingest {
        /// Binary trace produced by the capture side
        trace: PathBuf,

        /// SQLite store to create
        database: PathBuf,

        /// JSON ingest configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Rows buffered before a bulk insert
        #[arg(long)]
        batch_size: Option<usize>,

        /// Commit at every batch instead of once at the end
        #[arg(long)]
        batched: bool,

        /// Replace the database if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a binary trace as text
    Dump {
        trace: PathBuf,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show metadata and row counts of a store
    Stats {
        database: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the reconstructed event sequence
    Timeline {
        database: PathBuf,

        /// Stop after this many events
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Describe the event at an address and time
    Probe {
        database: PathBuf,

        /// Real address, hexadecimal
        #[arg(short, long, value_parser = parse_hex)]
        address: u64,

        /// Timeline position
        #[arg(short, long)]
        time: u64,

        /// Dump this many bytes (at most 1024) instead of describing an event
        #[arg(long)]
        dump: Option<u64>,
    },
}

fn parse_hex(s: &str) -> Result<u64, String> {
    parse_address(s).ok_or_else(|| format!("invalid hexadecimal address '{s}'"))
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Run the ingest command
fn run_ingest(
    trace: &Path,
    database: &Path,
    config: Option<&Path>,
    batch_size: Option<usize>,
    batched: bool,
    force: bool,
) -> Result<()> {
    let mut ingest_config = match config {
        Some(path) => IngestConfig::from_json_file(path)?,
        None => IngestConfig::default(),
    };
    if let Some(batch_size) = batch_size {
        ingest_config.batch_size = batch_size;
    }
    if batched {
        ingest_config.commit_mode = CommitMode::Batched;
    }

    if database.exists() {
        if !force {
            bail!(
                "{} already exists, use --force to replace it",
                database.display()
            );
        }
        fs::remove_file(database)
            .with_context(|| format!("Failed to remove {}", database.display()))?;
    }

    let writer = SqliteWriter::create(
        database,
        ingest_config.commit_mode,
        ingest_config.batch_size,
    )?;
    let report = ingest_file(trace, writer, &ingest_config)
        .with_context(|| format!("Failed to ingest {}", trace.display()))?;

    if !report.diagnostics.is_empty() {
        warn!("{} diagnostics raised during ingestion", report.diagnostics.len());
    }
    if report.suspect() {
        warn!("Disassembly disagreed with the trace, results may be wrong");
    }
    println!("{report}");
    Ok(())
}

/// Run the dump command
fn run_dump(trace: &Path, output: Option<&Path>) -> Result<()> {
    let max_frame_len = IngestConfig::default().max_frame_len;
    let summary = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            dump_file(trace, max_frame_len, &mut BufWriter::new(file))?
        }
        None => {
            let stdout = io::stdout();
            dump_file(trace, max_frame_len, &mut stdout.lock())?
        }
    };
    if !summary.diagnostics.is_empty() {
        warn!("{} diagnostics raised while dumping", summary.diagnostics.len());
    }
    Ok(())
}

/// Run the stats command
fn run_stats(database: &Path, json: bool) -> Result<()> {
    let store = TraceStore::open(database)?;
    let stats = store.stats()?;
    if json {
        let metadata: serde_json::Map<String, serde_json::Value> = store
            .metadata()?
            .into_iter()
            .map(|info| (info.key, serde_json::Value::String(info.value)))
            .collect();
        let out = serde_json::json!({ "info": metadata, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    for info in store.metadata()? {
        println!("{}: {}", info.key, info.value);
    }
    println!();
    println!("{stats}");
    Ok(())
}

/// Run the timeline command
fn run_timeline(database: &Path, limit: Option<usize>) -> Result<()> {
    let store = TraceStore::open(database)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let events = Timeline::new(&store).take(limit.unwrap_or(usize::MAX));
    for event in events {
        let event = event?;
        let ids: Vec<String> = event.ids.iter().map(|id| id.to_string()).collect();
        writeln!(
            out,
            "{:>10} {:<11} {:#018x} {:>6} {}",
            event.time,
            format!("{:?}", event.kind),
            event.address,
            event.size,
            ids.join(",")
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Run the probe command
fn run_probe(database: &Path, address: u64, time: u64, dump: Option<u64>) -> Result<()> {
    let store = TraceStore::open(database)?;
    if let Some(size) = dump {
        print!("{}", store.memory_dump(address, size, time)?);
        return Ok(());
    }

    let loader = IndexLoader::open_store(database.to_path_buf())?;
    let mut viewport = Viewport::new(1, 1);
    let index = loader.wait(&mut viewport)?;
    match index.find_event(address, address, time, time) {
        Some(event) => print!("{}", store.describe_event(event)?),
        None => println!("No event at {address:#x}, time {time}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ingest {
            trace,
            database,
            config,
            batch_size,
            batched,
            force,
        } => run_ingest(
            &trace,
            &database,
            config.as_deref(),
            batch_size,
            batched,
            force,
        ),
        Commands::Dump { trace, output } => run_dump(&trace, output.as_deref()),
        Commands::Stats { database, json } => run_stats(&database, json),
        Commands::Timeline { database, limit } => run_timeline(&database, limit),
        Commands::Probe {
            database,
            address,
            time,
            dump,
        } => run_probe(&database, address, time, dump),
    }
}
