//! backboard-sync - load lecture definitions and raw event exports into
//! the analytics store
//!
//! Lectures arrive as a JSON array, events as JSONL (one raw client event
//! per line). Events run through the ingest pipeline: malformed lines and
//! rejected events are reported, never fatal.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/backboard/analytics.db
//! - Logs: $XDG_STATE_HOME/backboard/backboard.log
//! - Config: $XDG_CONFIG_HOME/backboard/config.toml

use anyhow::{Context, Result};
use backboard_core::types::{Lecture, RawEvent};
use backboard_core::{Config, Database, IngestPipeline};
use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "backboard-sync")]
#[command(about = "Load lecture definitions and event exports into the analytics store")]
#[command(version)]
struct Args {
    /// Event export to ingest, JSONL with one raw event per line
    events: Option<PathBuf>,

    /// Lecture definitions to load first, JSON array
    #[arg(long)]
    lectures: Option<PathBuf>,

    /// Database path (defaults to the XDG data dir)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Verbose output (-v lists every rejected event)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        backboard_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("backboard-sync starting");

    let db_path = args.db.clone().unwrap_or_else(Config::database_path);
    tracing::info!(path = %db_path.display(), "Opening database");

    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    println!("Database: {}", db_path.display());

    if let Some(lectures_path) = &args.lectures {
        let content = std::fs::read_to_string(lectures_path)
            .with_context(|| format!("failed to read {}", lectures_path.display()))?;
        let lectures: Vec<Lecture> =
            serde_json::from_str(&content).context("failed to parse lecture definitions")?;

        for lecture in &lectures {
            db.upsert_lecture(lecture)
                .with_context(|| format!("failed to store lecture {}", lecture.id))?;
        }
        println!("Loaded {} lecture(s)", lectures.len());
        tracing::info!(count = lectures.len(), "Lectures loaded");
    }

    let Some(events_path) = &args.events else {
        if args.lectures.is_none() {
            println!("Nothing to do: pass an event export and/or --lectures");
        }
        return Ok(());
    };

    let content = std::fs::read_to_string(events_path)
        .with_context(|| format!("failed to read {}", events_path.display()))?;

    let mut events = Vec::new();
    let mut unparseable = 0usize;
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RawEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => {
                unparseable += 1;
                tracing::warn!(line = lineno + 1, error = %e, "Unparseable event line");
                if args.verbose >= 1 {
                    println!("  line {}: unparseable: {}", lineno + 1, e);
                }
            }
        }
    }

    let pipeline = IngestPipeline::new(db);
    let result = pipeline.ingest_batch(&events).context("ingest failed")?;

    println!("\nSync complete:");
    println!("  Events accepted:  {}", result.accepted);
    println!("  Duplicates:       {}", result.duplicates);
    println!("  Rejected:         {}", result.rejected.len());
    if unparseable > 0 {
        println!("  Unparseable lines: {}", unparseable);
    }

    if args.verbose >= 1 && !result.rejected.is_empty() {
        println!("\nRejected events:");
        for (event_id, reason) in &result.rejected {
            println!("  {}: {}", event_id, reason);
        }
    }

    tracing::info!(
        accepted = result.accepted,
        duplicates = result.duplicates,
        rejected = result.rejected.len(),
        unparseable,
        "backboard-sync complete"
    );

    Ok(())
}
