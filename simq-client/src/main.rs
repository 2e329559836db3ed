//! simq-replay - offline replay of recorded query sessions
//!
//! Feeds a recorded message stream (JSON lines of inbound messages) or a stored
//! session snapshot through the query service and prints the ranked results.
//!
//! **Usage:**
//! ```bash
//! simq-replay --messages session.jsonl [--score-function average] [--limit 20] [--json]
//! simq-replay --snapshot session.json
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use simq_client::results::{RankedObject, RankedSegment};
use simq_client::{QueryService, ResultsSnapshot};
use simq_common::config::Settings;
use simq_common::messages::ApiMessage;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Replay recorded similarity query sessions
#[derive(Parser, Debug)]
#[clap(name = "simq-replay")]
#[clap(about = "Replay a recorded query session and print the ranked results")]
struct Args {
    /// JSON-lines file of inbound messages
    #[clap(long, value_name = "FILE", conflicts_with = "snapshot")]
    messages: Option<PathBuf>,

    /// Session snapshot (JSON)
    #[clap(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Score function (AVERAGE, MAXPOOL, TEMPORAL); overrides configuration
    #[clap(long)]
    score_function: Option<String>,

    /// Number of segments and objects to print
    #[clap(long, default_value = "10")]
    limit: usize,

    /// Config file (falls back to SIMQ_CONFIG, then the user config dir)
    #[clap(short, long)]
    config: Option<String>,

    /// Print JSON instead of a table
    #[clap(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report {
    query_id: Option<String>,
    segments: Vec<RankedSegment>,
    objects: Vec<RankedObject>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("simq_client=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    info!("Starting simq-replay v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load_or_default(args.config.as_deref());
    let service = QueryService::new(settings);
    if let Some(name) = &args.score_function {
        service
            .set_score_function(name)
            .await
            .with_context(|| format!("Invalid --score-function {name}"))?;
    }

    match (&args.messages, &args.snapshot) {
        (Some(path), None) => replay_messages(&service, path).await?,
        (None, Some(path)) => load_snapshot(&service, path).await?,
        _ => bail!("Exactly one of --messages or --snapshot is required"),
    }
    service.flush().await;

    let views = service.subscribe_views().borrow().clone();
    let Some(views) = views else {
        bail!("Replay produced no session (no QR_START for the recorded messages?)");
    };
    let mut segments = views.segments.borrow().clone();
    segments.truncate(args.limit);
    let mut objects = views.objects.borrow().clone();
    objects.truncate(args.limit);

    let report = Report {
        query_id: service.query_id().await,
        segments,
        objects,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn replay_messages(service: &QueryService, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut replayed = 0usize;
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match ApiMessage::from_json(line) {
            Ok(message) => {
                service.dispatch(message).await;
                replayed += 1;
            }
            Err(e) => warn!(line = number + 1, error = %e, "Skipping undecodable message"),
        }
    }
    info!(path = %path.display(), replayed, "Replayed messages");
    Ok(())
}

async fn load_snapshot(service: &QueryService, path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let snapshot = ResultsSnapshot::from_json(&text)
        .with_context(|| format!("Invalid snapshot {}", path.display()))?;
    if !service.load(&snapshot).await {
        bail!("Snapshot {} could not be loaded", path.display());
    }
    Ok(())
}

fn print_report(report: &Report) {
    println!("Session: {}", report.query_id.as_deref().unwrap_or("-"));

    println!("\nSegments:");
    for (rank, segment) in report.segments.iter().enumerate() {
        println!(
            "{:>4}. {:<32} {:<24} {:>8.4}  [{:.2}s - {:.2}s]",
            rank + 1,
            segment.segment_id,
            segment.object_id,
            segment.score,
            segment.startabs,
            segment.endabs
        );
    }

    println!("\nObjects:");
    for (rank, object) in report.objects.iter().enumerate() {
        println!(
            "{:>4}. {:<32} {:<10} {:>8.4}  {} segment(s)  {}",
            rank + 1,
            object.object_id,
            object.mediatype.map(|m| m.as_str()).unwrap_or("-"),
            object.score,
            object.segment_ids.len(),
            object.name.as_deref().unwrap_or("")
        );
    }
}
