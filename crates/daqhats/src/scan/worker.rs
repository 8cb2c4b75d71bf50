//! Acquisition thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::{SampleConverter, ScanRequest, ScanShared, ScanSource, ScanState, ScanStatus, SourceStatus};
use crate::config::ScanConfig;
use crate::error::{HatError, Result};

/// Device drain passes after a stop before giving up on leftovers.
const MAX_DRAIN_PASSES: usize = 16;

/// Timing derived from the request.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanPlan {
    pub(crate) start_timeout: Duration,
    pub(crate) poll_interval: Duration,
    /// Codes to read for a finite scan
    pub(crate) total_codes: Option<u64>,
}

impl ScanPlan {
    pub(crate) fn new(request: &ScanRequest, settings: &ScanConfig) -> Self {
        let min = settings.start_timeout_min();
        // Allow a few sample periods for slow rates to produce the first scan.
        let start_timeout = if request.sample_rate > 0.0 {
            Duration::try_from_secs_f64(4.0 / request.sample_rate)
                .map_or(min, |periods| periods.max(min))
        } else {
            min
        };
        let total_codes = (!request.is_continuous()).then(|| {
            u64::from(request.samples_per_channel) * request.channel_count() as u64
        });
        Self {
            start_timeout,
            poll_interval: settings.poll_interval(request.aggregate_rate()),
            total_codes,
        }
    }
}

enum Exit {
    StopRequested,
    CountReached,
    DeviceEnded,
}

pub(crate) struct Worker {
    pub(crate) address: u8,
    pub(crate) request: ScanRequest,
    pub(crate) source: Arc<dyn ScanSource>,
    pub(crate) converter: SampleConverter,
    pub(crate) shared: Arc<ScanShared>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) plan: ScanPlan,
}

impl Worker {
    pub(crate) fn run(self, started: SyncSender<Result<()>>) {
        if let Err(e) = self.start_device() {
            self.terminate(Some(e.clone()));
            let _ = started.send(Err(e));
            return;
        }
        self.set_state(ScanState::Running);
        let _ = started.send(Ok(()));

        let mut carry = Vec::with_capacity(self.converter.channels());
        let result = self.acquire(&mut carry);

        match result {
            Ok(Exit::StopRequested) => {
                self.set_state(ScanState::Stopping);
                let drained = self
                    .source
                    .stop()
                    .and_then(|()| self.drain(&mut carry));
                self.terminate(drained.err());
            }
            Ok(Exit::CountReached) | Ok(Exit::DeviceEnded) => self.terminate(None),
            Err(e) => {
                error!(address = self.address, error = %e, "Acquisition failed");
                if let Err(stop_err) = self.source.stop() {
                    debug!(address = self.address, error = %stop_err, "Stop after failure also failed");
                }
                self.terminate(Some(e));
            }
        }
    }

    /// Arm the device and wait for it to report running.
    fn start_device(&self) -> Result<()> {
        self.source.start(&self.request)?;

        let deadline = Instant::now() + self.plan.start_timeout;
        loop {
            let status = self.source.status()?;
            if status.running || status.available > 0 {
                self.publish_flags(&status);
                return Ok(());
            }
            if Instant::now() >= deadline {
                if let Err(stop_err) = self.source.stop() {
                    debug!(address = self.address, error = %stop_err, "Stop after start timeout failed");
                }
                return Err(HatError::timeout(format!(
                    "scan on address {} did not start within {:?}",
                    self.address, self.plan.start_timeout
                )));
            }
            thread::sleep(self.plan.poll_interval);
        }
    }

    fn acquire(&self, carry: &mut Vec<f64>) -> Result<Exit> {
        let mut remaining = self.plan.total_codes;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(Exit::StopRequested);
            }

            let status = self.source.status()?;
            let mut want = status.available.min(status.max_read);
            if let Some(left) = remaining {
                want = want.min(usize::try_from(left).unwrap_or(usize::MAX));
            }

            if want == 0 {
                self.publish_flags(&status);
                if !status.running {
                    info!(address = self.address, "Device ended scan");
                    return Ok(Exit::DeviceEnded);
                }
                thread::sleep(self.plan.poll_interval);
                continue;
            }

            let got = self.read_into(want, carry, &status)?;
            if let Some(left) = remaining.as_mut() {
                *left = left.saturating_sub(got as u64);
                if *left == 0 {
                    debug!(address = self.address, "Finite scan complete");
                    return Ok(Exit::CountReached);
                }
            }
        }
    }

    /// Collect what the device still holds after a stop.
    fn drain(&self, carry: &mut Vec<f64>) -> Result<()> {
        for _ in 0..MAX_DRAIN_PASSES {
            let status = self.source.status()?;
            let want = status.available.min(status.max_read);
            if want == 0 {
                return Ok(());
            }
            self.read_into(want, carry, &status)?;
        }
        warn!(address = self.address, "Device still had data after drain");
        Ok(())
    }

    /// Read `want` codes, convert them and push whole scans.
    fn read_into(&self, want: usize, carry: &mut Vec<f64>, status: &SourceStatus) -> Result<usize> {
        let codes = self.source.read_codes(want)?;
        if codes.is_empty() {
            return Err(HatError::undefined(format!(
                "device on address {} returned no data with {want} codes available",
                self.address
            )));
        }

        let channels = self.converter.channels();
        self.converter.convert_into(&codes, carry.len(), carry);
        let whole = carry.len() / channels * channels;

        let mut inner = self.shared.inner.lock();
        let dropped = inner.ring.push_scans(&carry[..whole]);
        if dropped > 0 {
            if !inner.flags.contains(ScanStatus::BUFFER_OVERRUN) {
                warn!(address = self.address, dropped, "Scan buffer overrun");
            }
            inner.flags.insert(ScanStatus::BUFFER_OVERRUN);
            inner.scans_dropped += dropped as u64;
        }
        if status.triggered {
            inner.flags.insert(ScanStatus::TRIGGERED);
        }
        if status.hw_overrun {
            if !inner.flags.contains(ScanStatus::HW_OVERRUN) {
                warn!(address = self.address, "Hardware overrun");
            }
            inner.flags.insert(ScanStatus::HW_OVERRUN);
        } else {
            inner.flags.remove(ScanStatus::HW_OVERRUN);
        }
        drop(inner);
        self.shared.data_ready.notify_all();

        carry.drain(..whole);
        trace!(address = self.address, codes = codes.len(), "Read codes");
        Ok(codes.len())
    }

    fn publish_flags(&self, status: &SourceStatus) {
        let mut inner = self.shared.inner.lock();
        if status.triggered {
            inner.flags.insert(ScanStatus::TRIGGERED);
        }
        if status.hw_overrun {
            inner.flags.insert(ScanStatus::HW_OVERRUN);
        }
    }

    fn set_state(&self, state: ScanState) {
        self.shared.inner.lock().state = state;
        self.shared.data_ready.notify_all();
    }

    fn terminate(&self, failure: Option<HatError>) {
        let mut inner = self.shared.inner.lock();
        inner.state = ScanState::Terminated;
        if let Some(e) = failure {
            inner.error = Some(e);
        }
        let written = inner.ring.total_written();
        drop(inner);
        self.shared.data_ready.notify_all();
        debug!(address = self.address, samples = written, "Acquisition thread exiting");
    }
}
