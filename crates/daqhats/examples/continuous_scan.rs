//! Continuous MCC 118 scan fanned out through a `ScanStream`.
//!
//! A display sink prints one line per batch while a deliberately small
//! logger sink shows how full sinks drop batches instead of stalling the
//! scan.
//!
//! Usage:
//! ```bash
//! cargo run -p daqhats --example continuous_scan
//! ```

use std::sync::Arc;
use std::time::Duration;

use daqhats::mcc118::Mcc118;
use daqhats::scan::ScanOptions;
use daqhats::sim::SimulatedStack;
use daqhats::stream::{ScanStream, StreamSettings};
use daqhats::transport::BusTransport;
use daqhats::HatConfig;
use tracing_subscriber::EnvFilter;

const ADDRESS: u8 = 0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HatConfig::load()?;
    let stack = Arc::new(SimulatedStack::new());
    stack.add_mcc118(ADDRESS);
    let transport = Arc::new(BusTransport::new(stack, &config.bus));

    let board = Arc::new(Mcc118::new(transport, config.scan.clone()));
    board.open(ADDRESS)?;
    board.a_in_scan_start(ADDRESS, 0b1111, 0, 5000.0, ScanOptions::CONTINUOUS)?;

    let stream = ScanStream::new(
        Arc::clone(&board),
        ADDRESS,
        StreamSettings {
            batch_scans: 500,
            ..StreamSettings::default()
        },
    );
    let mut display = stream.add_sink("display", 8)?;
    let _logger = stream.add_sink("logger", 1)?;
    stream.start()?;

    let run = tokio::time::sleep(Duration::from_secs(3));
    tokio::pin!(run);
    loop {
        tokio::select! {
            _ = &mut run => break,
            batch = display.recv() => {
                let Some(batch) = batch else { break };
                let ch0 = batch.channel_data(0);
                let mean = ch0.iter().sum::<f64>() / ch0.len().max(1) as f64;
                println!(
                    "batch {:>3}: {} scans, ch0 mean {:+.4} V{}",
                    batch.sequence,
                    batch.n_scans(),
                    mean,
                    if batch.overflow_before { " (overrun)" } else { "" }
                );
            }
        }
    }

    stream.stop();
    let stats = stream.stats();
    println!(
        "{} batches, {} scans read, {} samples dropped by full sinks",
        stats.batches_produced, stats.scans_read, stats.samples_dropped
    );

    board.a_in_scan_stop(ADDRESS)?;
    board.a_in_scan_cleanup(ADDRESS)?;
    board.close(ADDRESS)?;
    Ok(())
}
