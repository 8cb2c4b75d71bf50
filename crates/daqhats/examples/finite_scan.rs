//! Finite MCC 118 scan on the simulated stack.
//!
//! Lists the boards, runs a 1000-scan acquisition on two channels and
//! prints per-channel statistics.
//!
//! Usage:
//! ```bash
//! RUST_LOG=daqhats=debug cargo run -p daqhats --example finite_scan
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use daqhats::info::{hat_list, HatId};
use daqhats::mcc118::Mcc118;
use daqhats::scan::{ReadCount, ReadTimeout, ScanOptions};
use daqhats::sim::SimulatedStack;
use daqhats::transport::BusTransport;
use daqhats::HatConfig;
use tracing_subscriber::EnvFilter;

const ADDRESS: u8 = 0;
const CHANNEL_MASK: u32 = 0b0000_0011;
const SCANS: u32 = 1000;
const RATE: f64 = 1000.0;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HatConfig::load().context("loading daqhats.toml")?;
    config.validate()?;

    let stack = Arc::new(SimulatedStack::new());
    stack.add_mcc118(ADDRESS);
    let transport = Arc::new(BusTransport::new(stack, &config.bus));

    println!("Boards on the stack:");
    for board in hat_list(&transport, HatId::Any)? {
        println!("  {}: {} ({})", board.address, board.id, board.product_name);
    }

    let board = Mcc118::new(Arc::clone(&transport), config.scan.clone());
    board.open(ADDRESS)?;
    println!("Serial {}", board.serial(ADDRESS)?);

    let actual = Mcc118::a_in_scan_actual_rate(CHANNEL_MASK.count_ones() as usize, RATE)?;
    println!("Scanning {SCANS} scans at {actual} S/s per channel");
    board.a_in_scan_start(ADDRESS, CHANNEL_MASK, SCANS, RATE, ScanOptions::empty())?;

    let (read, samples) = board.a_in_scan_read_vec(
        ADDRESS,
        ReadCount::Exactly(SCANS as usize),
        ReadTimeout::Wait(Duration::from_secs(5)),
    )?;
    if read.status.overrun() {
        println!("Overrun: {:?}", read.status);
    }

    let channels = board.a_in_scan_channel_count(ADDRESS)?;
    for channel in 0..channels {
        let values: Vec<f64> = samples.iter().skip(channel).step_by(channels).copied().collect();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len().max(1) as f64;
        println!("  ch{channel}: min {min:+.4} V  max {max:+.4} V  mean {mean:+.4} V");
    }

    board.a_in_scan_cleanup(ADDRESS)?;
    board.close(ADDRESS)?;
    Ok(())
}
