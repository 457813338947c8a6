//! Watch command: track activity events streamed on stdin.
//!
//! Each stdin line is one JSON [`ActivityEvent`]. Tracking stops at EOF or
//! ctrl-c, after which the session is folded into the stored totals.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use ustat_core::{ActivityEvent, LedgerView, StatsStore, UsageLedger};

use crate::Config;
use crate::commands::status;
use crate::tracker::{Tracker, TrackerSettings};

/// Inbound events buffered before the reader waits for the tracker.
const EVENT_BUFFER: usize = 1_024;

/// Runs the watch command.
pub fn run(config: &Config, live: bool) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(track(config, BufReader::new(tokio::io::stdin()), live));

    // The stdin reader may still be parked in a blocking read after ctrl-c.
    runtime.shutdown_timeout(Duration::from_millis(100));
    Ok(())
}

/// Tracks events read from `input` and returns the ledger after the final
/// save.
pub async fn track<R>(config: &Config, input: R, live: bool) -> UsageLedger
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let ledger = UsageLedger::initialize(StatsStore::new(&config.stats_path));
    let live_summary = live.then(|| spawn_live_summary(ledger.subscribe()));

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let shutdown = CancellationToken::new();
    let reader = tokio::spawn(read_events(input, tx));
    let interrupt = tokio::spawn(cancel_on_ctrl_c(shutdown.clone()));

    tracing::info!(path = %config.stats_path.display(), "tracking usage");
    let ledger = Tracker::new(ledger, TrackerSettings::from_config(config))
        .run(rx, shutdown)
        .await;

    reader.abort();
    interrupt.abort();
    if let Some(task) = live_summary {
        task.abort();
        eprintln!();
    }
    ledger
}

/// Forwards parsed events until EOF, skipping malformed lines.
///
/// Lines are read as raw bytes so one line that isn't UTF-8 is dropped on
/// its own instead of ending the stream.
async fn read_events<R>(mut input: R, tx: mpsc::Sender<ActivityEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match input.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "failed to read activity events");
                break;
            }
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim(),
            Err(e) => {
                tracing::warn!(error = %e, "skipping event line that is not UTF-8");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        match ActivityEvent::parse_line(line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "skipping malformed event line"),
        }
    }
}

async fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        return;
    }
    tracing::info!("interrupted, saving usage totals");
    shutdown.cancel();
}

fn spawn_live_summary(mut changes: watch::Receiver<LedgerView>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let line = status::summary_line(&changes.borrow_and_update());
            eprint!("\r{line}");
        }
    })
}
