mod workload;

use anyhow::{Context, Result};
use globalfifo_channel::{BoundedChannel, ChannelConfig, MEM_CLEAR, OpenOptions, SeekMode};
use globalfifo_config::GlobalFifoConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => GlobalFifoConfig::load(path.as_str())
            .with_context(|| format!("failed to load config from {path}"))?,
        None => GlobalFifoConfig::default(),
    };
    init_tracing(&config.log_level);

    let chan = BoundedChannel::new(ChannelConfig::new(config.capacity));
    info!(capacity = chan.capacity(), "GLOBALFIFO: channel ready");

    let summary = workload::run(&chan, &config.workload).context("workload failed")?;
    info!(
        bytes = summary.bytes,
        reads = summary.reads,
        elapsed = ?summary.elapsed,
        "GLOBALFIFO: workload done (~{:.1} MiB/s)",
        summary.mib_per_sec()
    );

    exercise_controls(&chan).context("control pass failed")?;

    let stats = chan.stats();
    info!(
        len = stats.len,
        open_handles = stats.open_handles,
        "GLOBALFIFO: shutting down"
    );
    Ok(())
}

/// Runs the clear command and the cursor once against the live channel.
fn exercise_controls(chan: &BoundedChannel) -> Result<()> {
    let mut handle = chan.open_with(OpenOptions::new().non_blocking(true));

    handle.write(b"scratch")?;
    handle.control(MEM_CLEAR)?;

    // Clearing zeroes the bytes but keeps the queued length.
    let stale = chan.len();
    if stale > 0 {
        warn!(stale_len = stale, "draining zeroed bytes left queued by clear");
        let drained = handle.read_to_vec(stale)?;
        if drained.iter().any(|&b| b != 0) {
            warn!("clear left non-zero bytes behind");
        }
    }

    let end = i64::try_from(chan.capacity()).context("capacity does not fit a seek offset")?;
    let position = handle.seek(end, SeekMode::Absolute)?;
    info!(position, "cursor parked at end of buffer");

    handle.close();
    Ok(())
}
