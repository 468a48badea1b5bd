//! visit-tracker CLI entry point
//!
//! Replays recorded detection batches (one JSON document per line) through
//! the tracker and session aggregator and delivers the resulting anonymous
//! session payloads.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use visit_tracker::emitter::{HttpSink, JsonLinesSink};
use visit_tracker::{Detection, FrameProcessor, OutboundQueue, Settings};

/// Edge visit tracker: detections in, anonymous sessions out
#[derive(Parser, Debug)]
#[command(name = "visit-tracker", version, about)]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Detection batches as JSON lines, `-` for stdin
    #[arg(short, long)]
    input: PathBuf,

    /// Override the configured device id
    #[arg(long)]
    device_id: Option<u32>,

    /// Where session payloads go
    #[arg(long, value_enum, default_value_t = Output::Stdout)]
    output: Output,

    /// Emit sessions still active when the input ends
    #[arg(long)]
    flush_on_exit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// One JSON payload per line on stdout
    Stdout,
    /// POST to the configured ingestion API
    Http,
}

/// One input line
#[derive(Debug, Deserialize)]
struct FrameRecord {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    detections: Vec<Vec<f64>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(device_id) = cli.device_id {
        settings.device.device_id = device_id;
        settings.validate().context("Invalid --device-id")?;
    }

    // Logs go to stderr; stdout may carry payloads
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let capacity = settings.ingest.queue_capacity;
    let queue = match cli.output {
        Output::Stdout => OutboundQueue::spawn(JsonLinesSink::new(io::stdout()), capacity)?,
        Output::Http => {
            let sink = HttpSink::new(
                &settings.ingest.url,
                &settings.ingest.api_key,
                settings.ingest.timeout(),
            );
            info!(endpoint = sink.endpoint(), "delivering sessions over HTTP");
            OutboundQueue::spawn(sink, capacity)?
        }
    };

    let mut processor = FrameProcessor::from_settings(&settings)?.with_queue(queue);

    info!(
        device_id = settings.device.device_id,
        max_age = settings.tracker.max_age,
        min_hits = settings.tracker.min_hits,
        session_timeout = settings.session.timeout_secs,
        "visit-tracker started"
    );

    let reader: Box<dyn BufRead> = if cli.input.as_os_str() == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(&cli.input)
            .with_context(|| format!("Failed to open {}", cli.input.display()))?;
        Box::new(BufReader::new(file))
    };

    let mut frames = 0_u64;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }

        let record: FrameRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = idx + 1, error = %e, "skipping malformed frame");
                continue;
            }
        };

        let detections: Vec<Detection> = record
            .detections
            .iter()
            .filter_map(|row| match Detection::from_row(row) {
                Ok(det) => Some(det),
                Err(e) => {
                    warn!(line = idx + 1, error = %e, "skipping detection");
                    None
                }
            })
            .collect();

        processor.process_frame(&detections, record.timestamp);
        frames += 1;
    }

    let stats = processor.session_stats();
    let report = processor.shutdown(cli.flush_on_exit);

    info!(
        frames,
        emitted = stats.emitted_sessions + report.flushed.len() as u64,
        discarded = stats.discarded_sessions,
        rejected = stats.rejected_sessions,
        lost = report.lost_sessions,
        "input finished"
    );
    if let Some(queue) = report.queue {
        info!(
            delivered = queue.delivered,
            failed = queue.failed,
            dropped = queue.dropped,
            "outbound queue drained"
        );
    }

    Ok(())
}
