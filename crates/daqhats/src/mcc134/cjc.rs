//! Cold junction compensation sensor and its background monitor.
//!
//! The sensor sits on SPI bus 1. A monitor thread samples it at a fixed
//! interval and keeps a moving average that thermocouple reads use as the
//! reference junction temperature.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::CjcConfig;
use crate::error::{HatError, Result};
use crate::transport::{Bus, BusTransport};

const REG_CONFIG: u8 = 0x01;
const REG_TEMP: u8 = 0x02;
const REG_ID: u8 = 0x03;
const READ: u8 = 0x40;

const ID_MASK: u8 = 0xF8;
const ID_VALUE: u8 = 0xC0;
/// 16-bit resolution, continuous conversion.
const CONFIG_VALUE: u8 = 0xC0;

const RESET_SETTLE: Duration = Duration::from_micros(600);
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Temperature sensor register access.
#[derive(Debug)]
pub(crate) struct CjcSensor {
    transport: Arc<BusTransport>,
    address: u8,
}

impl CjcSensor {
    pub(crate) fn new(transport: Arc<BusTransport>, address: u8) -> Self {
        Self { transport, address }
    }

    fn send(&self, tx: &[u8]) -> Result<Vec<u8>> {
        self.transport.transfer(self.address, Bus::Spi1, tx, tx.len())
    }

    /// Reset the serial interface, check the ID and configure.
    pub(crate) fn init(&self) -> Result<()> {
        let _board = self.transport.lock_board(self.address)?;
        // 32 ones resets the serial interface
        self.send(&[0xFF; 4])?;
        thread::sleep(RESET_SETTLE);

        let rx = self.send(&[(REG_ID << 3) | READ, 0])?;
        let found = rx[1] & ID_MASK;
        if found != ID_VALUE {
            return Err(HatError::InvalidDevice {
                address: self.address,
                expected: u16::from(ID_VALUE),
                found: u16::from(found),
            });
        }

        self.send(&[REG_CONFIG << 3, CONFIG_VALUE])?;
        debug!(address = self.address, "CJC sensor configured");
        Ok(())
    }

    /// One temperature reading, °C.
    pub(crate) fn read_temperature(&self) -> Result<f64> {
        let _board = self.transport.lock_board(self.address)?;
        let rx = self.send(&[(REG_TEMP << 3) | READ, 0, 0])?;
        Ok(f64::from(i16::from_be_bytes([rx[1], rx[2]])) / 128.0)
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    samples: VecDeque<f64>,
    average: Option<f64>,
    stop: bool,
}

#[derive(Debug, Default)]
struct MonitorShared {
    state: Mutex<MonitorState>,
    changed: Condvar,
}

impl MonitorShared {
    /// Sleep up to `duration`, returning early with `true` on stop.
    fn idle(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut state = self.state.lock();
        while !state.stop {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.stop
    }
}

/// Background averaging of the CJC sensor.
#[derive(Debug)]
pub(crate) struct CjcMonitor {
    address: u8,
    shared: Arc<MonitorShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    ready_timeout: Duration,
}

impl CjcMonitor {
    /// Start sampling `sensor`.
    pub(crate) fn spawn(address: u8, sensor: CjcSensor, config: &CjcConfig) -> Result<Self> {
        let shared = Arc::new(MonitorShared::default());
        let thread_shared = Arc::clone(&shared);
        let startup = config.startup();
        let interval = config.interval();
        let average_count = config.average_count.max(1);

        let thread = thread::Builder::new()
            .name(format!("daqhats-cjc-{address}"))
            .spawn(move || run(address, sensor, thread_shared, startup, interval, average_count))
            .map_err(|e| HatError::unavailable(format!("failed to spawn CJC thread: {e}")))?;

        info!(address, ?interval, average_count, "CJC monitor started");
        Ok(Self {
            address,
            shared,
            thread: Mutex::new(Some(thread)),
            ready_timeout: config.ready_timeout(),
        })
    }

    /// Current average, waiting for the first sample if needed.
    pub(crate) fn temperature(&self) -> Result<f64> {
        let deadline = Instant::now() + self.ready_timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(average) = state.average {
                return Ok(average);
            }
            if state.stop {
                return Err(HatError::unavailable("CJC monitor has stopped"));
            }
            if self
                .shared
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.average.ok_or_else(|| {
                    HatError::timeout(format!(
                        "no CJC reading on address {} within {:?}",
                        self.address, self.ready_timeout
                    ))
                });
            }
        }
    }

    /// Stop and join the thread.
    pub(crate) fn shutdown(&self) {
        self.shared.state.lock().stop = true;
        self.shared.changed.notify_all();
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(address = self.address, "CJC thread panicked");
            }
        }
    }
}

impl Drop for CjcMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    address: u8,
    sensor: CjcSensor,
    shared: Arc<MonitorShared>,
    startup: Duration,
    interval: Duration,
    average_count: usize,
) {
    if shared.idle(startup) {
        return;
    }
    let mut failures: u64 = 0;
    loop {
        match sensor.read_temperature() {
            Ok(temperature) => {
                if failures > 0 {
                    debug!(address, failures, "CJC read recovered");
                    failures = 0;
                }
                let mut state = shared.state.lock();
                state.samples.push_back(temperature);
                while state.samples.len() > average_count {
                    state.samples.pop_front();
                }
                let sum: f64 = state.samples.iter().sum();
                state.average = Some(sum / state.samples.len() as f64);
                drop(state);
                shared.changed.notify_all();
                if shared.idle(interval) {
                    break;
                }
            }
            Err(e) => {
                // the bus may be held by another process; keep trying
                if failures == 0 {
                    warn!(address, error = %e, "CJC read failed, retrying");
                }
                failures += 1;
                if shared.idle(RETRY_INTERVAL) {
                    break;
                }
            }
        }
    }
    debug!(address, "CJC monitor exiting");
}
