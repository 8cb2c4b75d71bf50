//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use daqhats::config::{BusConfig, ScanConfig};
use daqhats::sim::SimulatedStack;
use daqhats::transport::BusTransport;
use tempfile::TempDir;

/// A simulated stack behind a transport whose lock files live in a
/// private temporary directory.
pub struct Fixture {
    pub stack: Arc<SimulatedStack>,
    pub transport: Arc<BusTransport>,
    _lock_dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let lock_dir = TempDir::new().expect("create lock dir");
        let config = BusConfig {
            lock_dir: lock_dir.path().to_path_buf(),
            lock_timeout_ms: 2000,
        };
        let stack = Arc::new(SimulatedStack::new());
        let raw: Arc<dyn daqhats::RawBus> = stack.clone();
        let transport = Arc::new(BusTransport::new(raw, &config));
        Self {
            stack,
            transport,
            _lock_dir: lock_dir,
        }
    }
}

/// Scan timing with a short start timeout so failing starts return quickly.
pub fn fast_scan_config() -> ScanConfig {
    ScanConfig {
        start_timeout_min_ms: 200,
        ..ScanConfig::default()
    }
}

/// Poll `condition` until it holds or `limit` passes.
pub fn wait_for(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
