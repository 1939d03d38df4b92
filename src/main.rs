//! OBS Chronicle - Binary Entry Point
//!
//! Reads raw OBS events as JSON lines from stdin and ingests them until EOF
//! or Ctrl+C, then prints the JSON export of the log to stdout.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use obs_chronicle::config::EventSourcingConfig;
use obs_chronicle::event_store::ExportFormat;
use obs_chronicle::logging;
use obs_chronicle::system::EventSourcingSystem;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EventSourcingConfig::from_env();
    logging::init(&config.log)?;

    let system = EventSourcingSystem::open(config)?;
    system.start();

    let interrupted = Arc::new(Notify::new());
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.notify_one())?;
    }

    let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
    let mut ingested = 0usize;
    let mut skipped = 0usize;

    loop {
        let line = tokio::select! {
            _ = interrupted.notified() => {
                info!("interrupted, shutting down");
                break;
            }
            line = lines.next() => line,
        };

        let line = match line {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                warn!(error = %e, "failed to read stdin");
                break;
            }
            None => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str(&line) {
            Ok(value) => match system.ingest_raw(&value) {
                Ok(()) => ingested += 1,
                Err(_) => skipped += 1,
            },
            Err(e) => {
                warn!(error = %e, "skipping malformed line");
                skipped += 1;
            }
        }
    }

    system.stop().await;

    let stats = system.statistics()?;
    info!(
        ingested,
        skipped,
        total_events = stats.total_events,
        aggregates = stats.aggregates,
        "session complete"
    );

    println!("{}", system.export_events(ExportFormat::Json, None, None)?);
    Ok(())
}
