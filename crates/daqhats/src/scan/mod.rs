//! Hardware-paced scan engine.
//!
//! A scan runs on its own acquisition thread. The thread talks to the board
//! through a [`ScanSource`], converts raw codes, and appends whole scans to a
//! [`SampleRing`]. Callers read from the ring with a bounded or unbounded wait.
//!
//! # Architecture
//!
//! ```text
//!   caller                    ScanEngine                 acquisition thread
//!   ──────                    ──────────                 ──────────────────
//!   start ──────────────────▶ allocate ring
//!                             spawn ───────────────────▶ source.start()
//!                             wait for outcome ◀──────── poll until running
//!   read ───▶ lock ring ◀──────────────────────────────── status / read_codes
//!             wait on condvar ◀───── notify ──────────── convert, push scans
//!   stop ───▶ stop flag ─────────────────────────────────▶ source.stop(), drain
//!   cleanup ▶ join ◀──────────────────────────────────── Terminated
//! ```
//!
//! Bus I/O never happens under the ring lock; readers only contend with the
//! thread for the copy in and out.
//!
//! # Example
//!
//! ```no_run
//! use daqhats::mcc118::Mcc118;
//! use daqhats::scan::{ReadCount, ReadTimeout, ScanOptions};
//! use std::time::Duration;
//!
//! # fn example(board: &Mcc118) -> anyhow::Result<()> {
//! board.open(0)?;
//! board.a_in_scan_start(0, 0b0011, 1000, 10_000.0, ScanOptions::empty())?;
//!
//! let mut samples = vec![0.0; 2 * 1000];
//! let read = board.a_in_scan_read(
//!     0,
//!     ReadCount::Exactly(1000),
//!     ReadTimeout::Wait(Duration::from_secs(5)),
//!     &mut samples,
//! )?;
//! assert_eq!(read.samples_per_channel, 1000);
//!
//! board.a_in_scan_cleanup(0)?;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod convert;
mod options;
mod state;
mod worker;

pub use buffer::SampleRing;
pub use convert::{InputRange, SampleConverter};
pub use options::{ScanOptions, ScanStatus, TriggerMode};
pub use state::ScanState;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::config::ScanConfig;
use crate::error::{HatError, Result};

/// Device side of a scan.
///
/// Implemented by board drivers on top of their bus protocol. Calls come
/// only from the acquisition thread.
pub trait ScanSource: Send + Sync + 'static {
    /// Configure and arm the device.
    fn start(&self, request: &ScanRequest) -> Result<()>;
    /// Query the device's scan state.
    fn status(&self) -> Result<SourceStatus>;
    /// Read `count` raw codes from the device FIFO, oldest first.
    fn read_codes(&self, count: usize) -> Result<Vec<u16>>;
    /// Stop the device scan. Codes already in the FIFO stay readable.
    fn stop(&self) -> Result<()>;
}

/// Device-reported scan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceStatus {
    /// The device is acquiring or armed
    pub running: bool,
    /// The device FIFO overflowed
    pub hw_overrun: bool,
    /// The trigger condition occurred
    pub triggered: bool,
    /// Codes waiting in the device FIFO
    pub available: usize,
    /// Most codes a single read may request
    pub max_read: usize,
}

/// Validated scan parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Scanned channels, ascending
    pub channels: Vec<u8>,
    /// Samples per channel; buffer-size hint for continuous scans
    pub samples_per_channel: u32,
    /// Samples per second per channel; 0 allowed only with an external clock
    pub sample_rate: f64,
    /// Scan options
    pub options: ScanOptions,
}

impl ScanRequest {
    /// Build from a channel bit mask (bit 0 = channel 0).
    pub fn from_mask(
        channel_mask: u32,
        channel_limit: usize,
        samples_per_channel: u32,
        sample_rate: f64,
        options: ScanOptions,
    ) -> Result<Self> {
        if channel_mask == 0 {
            return Err(HatError::bad_parameter("channel mask is empty"));
        }
        if channel_limit == 0 {
            return Err(HatError::bad_parameter("board has no scannable channels"));
        }
        if channel_limit < 32 && channel_mask >> channel_limit != 0 {
            return Err(HatError::bad_parameter(format!(
                "channel mask {channel_mask:#x} selects channels beyond {}",
                channel_limit - 1
            )));
        }
        let channels = (0..32u8)
            .filter(|bit| channel_mask & (1 << bit) != 0)
            .collect();

        let request = Self {
            channels,
            samples_per_channel,
            sample_rate,
            options,
        };
        request.validate()?;
        Ok(request)
    }

    /// Check the timing parameters.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(HatError::bad_parameter("at least one channel is required"));
        }
        if !self.is_continuous() && self.samples_per_channel == 0 {
            return Err(HatError::bad_parameter(
                "finite scan needs samples_per_channel > 0",
            ));
        }
        if !self.sample_rate.is_finite() || self.sample_rate < 0.0 {
            return Err(HatError::bad_parameter(format!(
                "invalid sample rate {}",
                self.sample_rate
            )));
        }
        if self.sample_rate == 0.0 && !self.options.contains(ScanOptions::EXT_CLOCK) {
            return Err(HatError::bad_parameter(
                "sample rate must be > 0 unless an external clock is used",
            ));
        }
        Ok(())
    }

    /// Channels per scan.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Channel bit mask.
    pub fn channel_mask(&self) -> u32 {
        self.channels.iter().fold(0, |mask, &ch| mask | (1 << ch))
    }

    /// Runs until stopped.
    pub fn is_continuous(&self) -> bool {
        self.options.contains(ScanOptions::CONTINUOUS)
    }

    /// Combined sample rate across channels.
    pub fn aggregate_rate(&self) -> f64 {
        self.sample_rate * self.channels.len() as f64
    }

    /// Buffer size in scans.
    ///
    /// Finite scans hold exactly the requested count. Continuous scans use
    /// the larger of the request and a rate-based floor.
    pub fn buffer_scans(&self) -> usize {
        let requested = self.samples_per_channel as usize;
        if !self.is_continuous() {
            return requested;
        }
        let floor = if self.sample_rate == 0.0 {
            10_000
        } else if self.sample_rate <= 100.0 {
            1_000
        } else if self.sample_rate <= 10_000.0 {
            10_000
        } else {
            100_000
        };
        requested.max(floor)
    }
}

/// How many samples per channel a read should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCount {
    /// Report status only; consume nothing
    StatusOnly,
    /// Everything buffered now, without waiting
    Available,
    /// Exactly this many, waiting up to the timeout
    Exactly(usize),
}

impl ReadCount {
    /// Decode the C convention: -1 all available, 0 status only, n > 0 exact.
    pub fn from_raw(samples_per_channel: i32) -> Result<Self> {
        match samples_per_channel {
            -1 => Ok(Self::Available),
            0 => Ok(Self::StatusOnly),
            n if n > 0 => Ok(Self::Exactly(n as usize)),
            n => Err(HatError::bad_parameter(format!("invalid samples_per_channel {n}"))),
        }
    }
}

/// How long a read may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeout {
    /// Return at once with what is available
    Immediate,
    /// Wait up to this long
    Wait(Duration),
    /// Wait until the request is satisfied or the scan ends
    Forever,
}

impl ReadTimeout {
    /// Decode seconds using the C convention: negative waits forever, 0 returns at once.
    pub fn from_secs(timeout: f64) -> Result<Self> {
        if timeout.is_nan() {
            return Err(HatError::bad_parameter("timeout is NaN"));
        }
        if timeout < 0.0 {
            Ok(Self::Forever)
        } else if timeout == 0.0 {
            Ok(Self::Immediate)
        } else {
            Duration::try_from_secs_f64(timeout)
                .map(Self::Wait)
                .or(Ok(Self::Forever))
        }
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            Self::Wait(d) => Instant::now().checked_add(d),
            Self::Immediate => Some(Instant::now()),
            Self::Forever => None,
        }
    }
}

/// Result of a scan read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRead {
    /// Status at the time of the read
    pub status: ScanStatus,
    /// Scans copied to the output buffer
    pub samples_per_channel: usize,
    /// The wait ended before the requested count arrived
    pub timed_out: bool,
}

/// Ring plus the flags the acquisition thread publishes.
#[derive(Debug)]
pub(crate) struct ScanInner {
    pub(crate) ring: SampleRing,
    pub(crate) state: ScanState,
    pub(crate) flags: ScanStatus,
    pub(crate) error: Option<HatError>,
    pub(crate) scans_dropped: u64,
}

impl ScanInner {
    fn status(&self) -> ScanStatus {
        let mut status = self.flags;
        status.set(ScanStatus::RUNNING, self.state.is_active());
        status
    }
}

/// State shared between the engine and the acquisition thread.
#[derive(Debug)]
pub(crate) struct ScanShared {
    pub(crate) inner: Mutex<ScanInner>,
    pub(crate) data_ready: Condvar,
}

struct ActiveScan {
    shared: Arc<ScanShared>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    channels: usize,
    buffer_size: usize,
}

impl ActiveScan {
    fn join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if let Err(e) = handle.join() {
                error!("Acquisition thread panicked: {:?}", e);
            }
        }
    }
}

/// One scan slot for one board.
pub struct ScanEngine {
    address: u8,
    settings: ScanConfig,
    active: Mutex<Option<ActiveScan>>,
}

impl std::fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEngine")
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

impl ScanEngine {
    /// Create an idle engine for the board at `address`.
    pub fn new(address: u8, settings: ScanConfig) -> Self {
        Self {
            address,
            settings,
            active: Mutex::new(None),
        }
    }

    /// Start a scan.
    ///
    /// Returns once the device reports running. A failure while starting
    /// leaves no scan behind.
    pub fn start(
        &self,
        request: &ScanRequest,
        source: Arc<dyn ScanSource>,
        converter: SampleConverter,
    ) -> Result<()> {
        request.validate()?;
        if converter.channels() != request.channel_count() {
            return Err(HatError::bad_parameter(format!(
                "converter covers {} channels, scan has {}",
                converter.channels(),
                request.channel_count()
            )));
        }

        let mut active = self.active.lock();
        if active.is_some() {
            return Err(HatError::busy(format!(
                "a scan is already allocated on address {}",
                self.address
            )));
        }

        let channels = request.channel_count();
        let ring = SampleRing::new(request.buffer_scans(), channels)?;
        let buffer_size = ring.capacity();

        let shared = Arc::new(ScanShared {
            inner: Mutex::new(ScanInner {
                ring,
                state: ScanState::Starting,
                flags: ScanStatus::empty(),
                error: None,
                scans_dropped: 0,
            }),
            data_ready: Condvar::new(),
        });
        let stop = Arc::new(AtomicBool::new(false));

        let plan = worker::ScanPlan::new(request, &self.settings);
        let worker = worker::Worker {
            address: self.address,
            request: request.clone(),
            source,
            converter,
            shared: Arc::clone(&shared),
            stop: Arc::clone(&stop),
            plan,
        };

        let (started_tx, started_rx) = sync_channel(1);
        let handle = thread::Builder::new()
            .name(format!("daqhats-scan-{}", self.address))
            .spawn(move || worker.run(started_tx))
            .map_err(|e| HatError::unavailable(format!("cannot spawn acquisition thread: {e}")))?;

        let outcome = started_rx.recv().unwrap_or_else(|_| {
            Err(HatError::undefined("acquisition thread exited before starting"))
        });

        let mut scan = ActiveScan {
            shared,
            stop,
            thread: Some(handle),
            channels,
            buffer_size,
        };

        if let Err(e) = outcome {
            scan.join();
            error!(address = self.address, error = %e, "Scan failed to start");
            return Err(e);
        }

        info!(
            address = self.address,
            channels,
            rate = request.sample_rate,
            samples_per_channel = request.samples_per_channel,
            continuous = request.is_continuous(),
            buffer_size,
            "Started scan"
        );
        *active = Some(scan);
        Ok(())
    }

    /// Read scans into `out`.
    pub fn read(&self, count: ReadCount, timeout: ReadTimeout, out: &mut [f64]) -> Result<ScanRead> {
        let (shared, channels) = {
            let active = self.active.lock();
            let scan = active.as_ref().ok_or_else(|| self.no_scan())?;
            (Arc::clone(&scan.shared), scan.channels)
        };

        let mut inner = shared.inner.lock();

        let wanted = match count {
            ReadCount::StatusOnly => {
                return Ok(ScanRead {
                    status: inner.status(),
                    samples_per_channel: 0,
                    timed_out: false,
                });
            }
            ReadCount::Available => usize::MAX,
            // A short output buffer caps the request at what fits.
            ReadCount::Exactly(n) => n.min(out.len() / channels),
        };

        let deadline = match count {
            ReadCount::Available => Some(Instant::now()),
            _ => timeout.deadline(),
        };

        let mut copied = 0usize;
        let mut timed_out = false;
        loop {
            copied += inner
                .ring
                .pop_scans(&mut out[copied * channels..], wanted - copied);
            if copied == wanted || !inner.state.is_active() {
                break;
            }
            match deadline {
                None => shared.data_ready.wait(&mut inner),
                Some(deadline) => {
                    if Instant::now() >= deadline
                        || shared.data_ready.wait_until(&mut inner, deadline).timed_out()
                    {
                        copied += inner
                            .ring
                            .pop_scans(&mut out[copied * channels..], wanted - copied);
                        timed_out = matches!(count, ReadCount::Exactly(_))
                            && copied < wanted
                            && inner.state.is_active();
                        break;
                    }
                }
            }
        }

        if copied == 0 && inner.ring.is_empty() {
            if let Some(e) = inner.error.clone() {
                return Err(e);
            }
        }

        let status = inner.status();
        if copied > 0 {
            inner.flags.remove(ScanStatus::BUFFER_OVERRUN);
        }

        Ok(ScanRead {
            status,
            samples_per_channel: copied,
            timed_out,
        })
    }

    /// Ask the acquisition thread to stop. Buffered data stays readable.
    pub fn stop(&self) -> Result<()> {
        let active = self.active.lock();
        let scan = active.as_ref().ok_or_else(|| self.no_scan())?;
        scan.stop.store(true, Ordering::SeqCst);
        debug!(address = self.address, "Stop requested");
        Ok(())
    }

    /// Stop, join the thread and free the buffer. A no-op with no scan.
    pub fn cleanup(&self) -> Result<()> {
        let mut active = self.active.lock();
        if let Some(mut scan) = active.take() {
            scan.join();
            let inner = scan.shared.inner.lock();
            info!(
                address = self.address,
                samples = inner.ring.total_written(),
                scans_dropped = inner.scans_dropped,
                "Cleaned up scan"
            );
        }
        Ok(())
    }

    /// Whether a scan exists (running or awaiting cleanup).
    pub fn is_allocated(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Buffer size in samples.
    pub fn buffer_size(&self) -> Result<usize> {
        self.active
            .lock()
            .as_ref()
            .map(|scan| scan.buffer_size)
            .ok_or_else(|| self.no_scan())
    }

    /// Channels in the current scan, 0 without one.
    pub fn channel_count(&self) -> usize {
        self.active.lock().as_ref().map_or(0, |scan| scan.channels)
    }

    /// Lifecycle state.
    pub fn state(&self) -> ScanState {
        self.active
            .lock()
            .as_ref()
            .map_or(ScanState::Idle, |scan| scan.shared.inner.lock().state)
    }

    fn no_scan(&self) -> HatError {
        HatError::unavailable(format!("no scan on address {}", self.address))
    }
}

impl Drop for ScanEngine {
    fn drop(&mut self) {
        if let Some(mut scan) = self.active.get_mut().take() {
            scan.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Coefficient;

    const RANGE: InputRange = InputRange {
        codes: 4096,
        min_voltage: 0.0,
        max_voltage: 4096.0,
    };

    /// Endless counting source that fails on demand.
    #[derive(Default)]
    struct CountingSource {
        state: Mutex<CountingState>,
    }

    #[derive(Default)]
    struct CountingState {
        start_error: Option<HatError>,
        /// Status fails once this many codes have been read
        fail_after: Option<usize>,
        /// Armed but never reports running
        idle: bool,
        stop_error: Option<HatError>,
        stop_calls: usize,
        produced: usize,
        stopped: bool,
    }

    impl CountingSource {
        fn failing_start(e: HatError) -> Self {
            let source = Self::default();
            source.state.lock().start_error = Some(e);
            source
        }

        fn failing_after(codes: usize) -> Self {
            let source = Self::default();
            source.state.lock().fail_after = Some(codes);
            source
        }

        fn never_running(stop_error: HatError) -> Self {
            let source = Self::default();
            {
                let mut state = source.state.lock();
                state.idle = true;
                state.stop_error = Some(stop_error);
            }
            source
        }

        fn produced(&self) -> usize {
            self.state.lock().produced
        }
    }

    impl ScanSource for CountingSource {
        fn start(&self, _request: &ScanRequest) -> Result<()> {
            self.state.lock().start_error.clone().map_or(Ok(()), Err)
        }

        fn status(&self) -> Result<SourceStatus> {
            let state = self.state.lock();
            if state.fail_after.is_some_and(|limit| state.produced >= limit) {
                return Err(HatError::undefined("reply checksum mismatch"));
            }
            let active = !state.stopped && !state.idle;
            Ok(SourceStatus {
                running: active,
                available: if active { 64 } else { 0 },
                max_read: 4,
                ..SourceStatus::default()
            })
        }

        fn read_codes(&self, count: usize) -> Result<Vec<u16>> {
            let mut state = self.state.lock();
            let first = state.produced;
            state.produced += count;
            Ok((first..first + count).map(|code| code as u16).collect())
        }

        fn stop(&self) -> Result<()> {
            let mut state = self.state.lock();
            state.stop_calls += 1;
            state.stopped = true;
            state.stop_error.clone().map_or(Ok(()), Err)
        }
    }

    fn request(samples_per_channel: u32, options: ScanOptions) -> ScanRequest {
        ScanRequest::from_mask(0b11, 8, samples_per_channel, 1000.0, options).unwrap()
    }

    fn raw_converter() -> SampleConverter {
        SampleConverter::new(
            vec![Coefficient::new(1.0, 0.0); 2],
            ScanOptions::NO_SCALE_DATA,
            RANGE,
        )
    }

    #[test]
    fn test_from_mask_rejects_bad_masks() {
        let opts = ScanOptions::empty();
        assert!(ScanRequest::from_mask(0, 8, 10, 100.0, opts).unwrap_err().is_bad_parameter());
        assert!(ScanRequest::from_mask(0x100, 8, 10, 100.0, opts).unwrap_err().is_bad_parameter());
        assert!(ScanRequest::from_mask(0x1, 0, 10, 100.0, opts).unwrap_err().is_bad_parameter());

        let req = ScanRequest::from_mask(0b1010, 8, 10, 100.0, opts).unwrap();
        assert_eq!(req.channels, vec![1, 3]);
        assert_eq!(req.channel_mask(), 0b1010);
    }

    #[test]
    fn test_start_error_is_synchronous_and_leaves_idle() {
        let engine = ScanEngine::new(0, ScanConfig::default());
        let source = Arc::new(CountingSource::failing_start(HatError::busy("device scan running")));

        let err = engine
            .start(&request(10, ScanOptions::empty()), source, raw_converter())
            .unwrap_err();
        assert!(err.is_busy());
        assert_eq!(engine.state(), ScanState::Idle);
        assert!(!engine.is_allocated());

        let mut out = [0.0; 2];
        let err = engine
            .read(ReadCount::Available, ReadTimeout::Immediate, &mut out)
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_start_timeout_survives_failed_stop() {
        let settings = ScanConfig {
            start_timeout_min_ms: 20,
            ..ScanConfig::default()
        };
        let engine = ScanEngine::new(5, settings);
        let source = Arc::new(CountingSource::never_running(HatError::undefined("no reply")));

        let err = engine
            .start(
                &request(10, ScanOptions::empty()),
                Arc::clone(&source) as Arc<dyn ScanSource>,
                raw_converter(),
            )
            .unwrap_err();
        assert!(err.is_timeout(), "{err}");
        assert_eq!(source.state.lock().stop_calls, 1);
        assert_eq!(engine.state(), ScanState::Idle);
    }

    #[test]
    fn test_mid_scan_error_surfaces_after_data() {
        let engine = ScanEngine::new(1, ScanConfig::default());
        let source = Arc::new(CountingSource::failing_after(8));
        engine
            .start(&request(10, ScanOptions::CONTINUOUS), source, raw_converter())
            .unwrap();

        let mut out = vec![0.0; 200];
        let read = engine
            .read(ReadCount::Exactly(100), ReadTimeout::Forever, &mut out)
            .unwrap();
        assert_eq!(read.samples_per_channel, 4);
        assert!(!read.timed_out);
        assert!(!read.status.contains(ScanStatus::RUNNING));
        assert_eq!(&out[..8], &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        let err = engine
            .read(ReadCount::Available, ReadTimeout::Immediate, &mut out)
            .unwrap_err();
        assert!(matches!(err, HatError::Undefined { .. }));
        // parked, not consumed
        assert!(engine
            .read(ReadCount::Exactly(1), ReadTimeout::Immediate, &mut out)
            .is_err());

        engine.cleanup().unwrap();
        assert_eq!(engine.state(), ScanState::Idle);
    }

    #[test]
    fn test_finite_scan_stops_at_requested_count() {
        let engine = ScanEngine::new(2, ScanConfig::default());
        let source = Arc::new(CountingSource::default());
        engine
            .start(
                &request(5, ScanOptions::empty()),
                Arc::clone(&source) as Arc<dyn ScanSource>,
                raw_converter(),
            )
            .unwrap();

        let mut out = vec![0.0; 40];
        let read = engine
            .read(ReadCount::Exactly(20), ReadTimeout::Forever, &mut out)
            .unwrap();
        assert_eq!(read.samples_per_channel, 5);
        assert!(!read.status.contains(ScanStatus::RUNNING));
        assert_eq!(engine.state(), ScanState::Terminated);
        // the source still claims running with data queued
        assert_eq!(source.produced(), 10);
        assert_eq!(out[9], 9.0);

        engine.cleanup().unwrap();
    }

    #[test]
    fn test_status_only_consumes_nothing() {
        let engine = ScanEngine::new(3, ScanConfig::default());
        let source = Arc::new(CountingSource::default());
        engine
            .start(&request(4, ScanOptions::empty()), source, raw_converter())
            .unwrap();

        let mut out = vec![0.0; 8];
        // wait for the finite scan to finish filling the ring
        while engine.state() != ScanState::Terminated {
            std::thread::sleep(Duration::from_millis(1));
        }
        let status = engine
            .read(ReadCount::StatusOnly, ReadTimeout::Immediate, &mut out)
            .unwrap();
        assert_eq!(status.samples_per_channel, 0);

        let read = engine
            .read(ReadCount::Available, ReadTimeout::Immediate, &mut out)
            .unwrap();
        assert_eq!(read.samples_per_channel, 4);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_read_and_stop_after_cleanup() {
        let engine = ScanEngine::new(4, ScanConfig::default());
        engine
            .start(
                &request(4, ScanOptions::empty()),
                Arc::new(CountingSource::default()),
                raw_converter(),
            )
            .unwrap();
        engine.cleanup().unwrap();

        let mut out = [0.0; 8];
        assert!(engine
            .read(ReadCount::Available, ReadTimeout::Immediate, &mut out)
            .unwrap_err()
            .is_unavailable());
        assert!(engine.stop().unwrap_err().is_unavailable());
        assert!(engine.buffer_size().unwrap_err().is_unavailable());
        // a second cleanup is harmless
        engine.cleanup().unwrap();
    }
}
