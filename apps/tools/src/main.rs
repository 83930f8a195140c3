use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use bridge_core::{
    dispatcher::EventPump, headless::HeadlessMapSurface, Bridge, BridgeConfig, BridgeServices,
};
use clap::{Parser, Subcommand};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{CommandEnvelope, OutboundEvent, OutboundFrame},
};
use tokio::sync::broadcast;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs a JSONL command script against a headless bridge with map 0
    /// attached and prints every reply and event as a JSON line.
    Replay {
        script: PathBuf,
        #[arg(long, default_value = "./assets")]
        asset_root: PathBuf,
        /// Time to wait for animated camera moves before the final drain.
        #[arg(long, default_value_t = 0)]
        settle_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay {
            script,
            asset_root,
            settle_ms,
        } => {
            let raw = tokio::fs::read_to_string(&script)
                .await
                .with_context(|| format!("failed to read script '{}'", script.display()))?;
            let stdout = io::stdout();
            let summary = replay(
                &raw,
                &asset_root,
                Duration::from_millis(settle_ms),
                &mut stdout.lock(),
            )
            .await?;
            eprintln!(
                "replayed {} commands ({} failed), {} events",
                summary.commands, summary.failures, summary.events
            );
        }
    }

    Ok(())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ReplaySummary {
    commands: usize,
    failures: usize,
    events: usize,
}

struct Session {
    bridge: Arc<Bridge>,
    pump: EventPump,
    events: broadcast::Receiver<OutboundEvent>,
}

impl Session {
    async fn drain(&mut self, out: &mut impl Write) -> Result<usize> {
        self.pump.pump_pending().await;
        let mut written = 0;
        loop {
            match self.events.try_recv() {
                Ok(event) => {
                    write_frame(out, &OutboundFrame::Event(event))?;
                    written += 1;
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    debug!(skipped, "replay output lagged behind the event bus");
                }
                Err(_) => break,
            }
        }
        Ok(written)
    }
}

/// Replies carry the 1-based script line as their id.
async fn replay(
    script: &str,
    asset_root: &Path,
    settle: Duration,
    out: &mut impl Write,
) -> Result<ReplaySummary> {
    let services = BridgeServices::headless(asset_root);
    let (bridge, pump) = Bridge::new(services, BridgeConfig::default());
    let events = bridge.subscribe_events();
    let map_id = bridge
        .attach_map(Arc::new(HeadlessMapSurface::new()))
        .await;
    debug!(map_id = %map_id, "replay map attached");

    let mut session = Session {
        bridge,
        pump,
        events,
    };
    let mut summary = ReplaySummary::default();

    for (index, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let id = index as u64 + 1;
        summary.commands += 1;
        let frame = match serde_json::from_str::<CommandEnvelope>(line) {
            Ok(envelope) => OutboundFrame::from_reply(id, session.bridge.handle(envelope).await),
            Err(err) => OutboundFrame::Error {
                id,
                error: ApiError::new(ErrorCode::InvalidArgument, err.to_string()),
            },
        };
        if matches!(frame, OutboundFrame::Error { .. }) {
            summary.failures += 1;
        }
        write_frame(out, &frame)?;
        summary.events += session.drain(out).await?;
    }

    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    summary.events += session.drain(out).await?;
    out.flush()?;
    Ok(summary)
}

fn write_frame(out: &mut impl Write, frame: &OutboundFrame) -> Result<()> {
    serde_json::to_writer(&mut *out, frame)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/replay_tests.rs"]
mod tests;
