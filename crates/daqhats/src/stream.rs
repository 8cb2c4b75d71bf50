//! Pull-based scan subscriber with multi-sink fan-out.
//!
//! A [`ScanStream`] owns a reader thread that drains an MCC 118 scan on its
//! own cadence with [`Mcc118::a_in_scan_read`], cuts the data into
//! fixed-size [`SampleBatch`]es and offers each batch to every registered
//! sink. Sinks are bounded tokio channels; a full sink drops the batch and
//! the drop is counted rather than stalling the scan.
//!
//! ```text
//!   acquisition thread ──► scan buffer ──► ScanStream reader
//!                                              │
//!                          ┌───────────────────┼──────────────┐
//!                          ▼                   ▼              ▼
//!                       display             logger         analysis
//! ```
//!
//! The stream only reads. Starting, stopping and cleaning up the scan stay
//! with the caller.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use daqhats::mcc118::Mcc118;
//! use daqhats::stream::{ScanStream, StreamSettings};
//!
//! # async fn example(board: Arc<Mcc118>) -> anyhow::Result<()> {
//! let stream = ScanStream::new(board, 0, StreamSettings::default());
//! let mut display = stream.add_sink("display", 16)?;
//! stream.start()?;
//!
//! while let Some(batch) = display.recv().await {
//!     println!("batch {} with {} scans", batch.sequence, batch.n_scans());
//! }
//! stream.stop();
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::error::{HatError, Result};
use crate::mcc118::Mcc118;
use crate::scan::{ReadCount, ReadTimeout, ScanStatus};

/// A run of whole scans.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    /// Interleaved samples, `[scan0_ch0, scan0_ch1, ..., scan1_ch0, ...]`
    pub data: Vec<f64>,
    /// Channels per scan
    pub n_channels: usize,
    /// When the batch was cut
    pub timestamp: Instant,
    /// Position in the stream, from 0
    pub sequence: u64,
    /// Whether the scan reported an overrun while this batch filled
    pub overflow_before: bool,
}

impl SampleBatch {
    /// Whole scans in the batch.
    pub fn n_scans(&self) -> usize {
        if self.n_channels > 0 {
            self.data.len() / self.n_channels
        } else {
            0
        }
    }

    /// Samples of one channel, in scan order.
    pub fn channel_data(&self, channel: usize) -> Vec<f64> {
        if channel >= self.n_channels {
            return Vec::new();
        }
        self.data
            .iter()
            .skip(channel)
            .step_by(self.n_channels)
            .copied()
            .collect()
    }

    /// One vector per channel.
    pub fn deinterleave(&self) -> Vec<Vec<f64>> {
        if self.n_channels == 0 {
            return Vec::new();
        }
        let mut channels = vec![Vec::with_capacity(self.n_scans()); self.n_channels];
        for (i, &v) in self.data.iter().enumerate() {
            channels[i % self.n_channels].push(v);
        }
        channels
    }
}

/// Receiver handle for a sink.
pub type SinkReceiver = mpsc::Receiver<SampleBatch>;

/// Reader cadence.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Scans per batch
    pub batch_scans: usize,
    /// Longest a read waits for a full batch
    pub read_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            batch_scans: 1000,
            read_timeout: Duration::from_millis(100),
        }
    }
}

struct Sink {
    sender: mpsc::Sender<SampleBatch>,
    drops: AtomicU64,
}

/// Stream counters.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Batches cut
    pub batches_produced: u64,
    /// Scans read from the board
    pub scans_read: u64,
    /// Samples dropped by full sinks, summed over sinks
    pub samples_dropped: u64,
    /// Overrun onsets seen in scan status
    pub overflow_events: u64,
    /// Batches dropped per sink
    pub sink_drops: HashMap<String, u64>,
}

#[derive(Default)]
struct Counters {
    sequence: AtomicU64,
    batches_produced: AtomicU64,
    scans_read: AtomicU64,
    samples_dropped: AtomicU64,
    overflow_events: AtomicU64,
}

/// Subscriber on one board's scan.
pub struct ScanStream {
    board: Arc<Mcc118>,
    address: u8,
    settings: StreamSettings,
    sinks: Arc<RwLock<HashMap<String, Sink>>>,
    running: Arc<AtomicBool>,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for ScanStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanStream")
            .field("address", &self.address)
            .field("settings", &self.settings)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ScanStream {
    /// Create a stream over the scan on `address`.
    pub fn new(board: Arc<Mcc118>, address: u8, settings: StreamSettings) -> Self {
        Self {
            board,
            address,
            settings,
            sinks: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            reader_thread: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Register a sink holding up to `capacity` batches.
    pub fn add_sink(&self, name: &str, capacity: usize) -> Result<SinkReceiver> {
        if capacity == 0 {
            return Err(HatError::bad_parameter("sink capacity must be at least 1"));
        }
        let mut sinks = self.sinks.write();
        if sinks.contains_key(name) {
            return Err(HatError::bad_parameter(format!("sink '{name}' already exists")));
        }
        let (tx, rx) = mpsc::channel(capacity);
        sinks.insert(
            name.to_string(),
            Sink {
                sender: tx,
                drops: AtomicU64::new(0),
            },
        );
        debug!(name, capacity, "Added sink");
        Ok(rx)
    }

    /// Remove a sink. Returns whether it existed.
    pub fn remove_sink(&self, name: &str) -> bool {
        self.sinks.write().remove(name).is_some()
    }

    /// Registered sink names.
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.read().keys().cloned().collect()
    }

    /// Start the reader thread.
    pub fn start(&self) -> Result<()> {
        if self.settings.batch_scans == 0 {
            return Err(HatError::bad_parameter("batch size must be at least 1 scan"));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HatError::busy("stream is already running"));
        }
        // a reader that ended on its own still needs joining
        if let Some(stale) = self.reader_thread.lock().take() {
            let _ = stale.join();
        }

        let reader = Reader {
            board: Arc::clone(&self.board),
            address: self.address,
            settings: self.settings.clone(),
            sinks: Arc::clone(&self.sinks),
            running: Arc::clone(&self.running),
            counters: Arc::clone(&self.counters),
        };
        let handle = thread::Builder::new()
            .name(format!("daqhats-stream-{}", self.address))
            .spawn(move || reader.run())
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HatError::unavailable(format!("failed to spawn stream thread: {e}"))
            })?;
        *self.reader_thread.lock() = Some(handle);

        info!(address = self.address, batch_scans = self.settings.batch_scans, "Started scan stream");
        Ok(())
    }

    /// Stop reading and join the thread. The scan itself keeps running.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader_thread.lock().take() {
            if handle.join().is_err() {
                error!(address = self.address, "Stream reader panicked");
            }
        }
        let stats = self.stats();
        info!(
            address = self.address,
            batches = stats.batches_produced,
            drops = stats.samples_dropped,
            overflows = stats.overflow_events,
            "Stopped scan stream"
        );
    }

    /// Whether the reader is active. It also ends on its own when the scan
    /// finishes.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current counters.
    pub fn stats(&self) -> StreamStats {
        let sink_drops = self
            .sinks
            .read()
            .iter()
            .map(|(name, sink)| (name.clone(), sink.drops.load(Ordering::SeqCst)))
            .collect();
        StreamStats {
            batches_produced: self.counters.batches_produced.load(Ordering::SeqCst),
            scans_read: self.counters.scans_read.load(Ordering::SeqCst),
            samples_dropped: self.counters.samples_dropped.load(Ordering::SeqCst),
            overflow_events: self.counters.overflow_events.load(Ordering::SeqCst),
            sink_drops,
        }
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        if self.reader_thread.lock().is_some() {
            self.stop();
        }
    }
}

struct Reader {
    board: Arc<Mcc118>,
    address: u8,
    settings: StreamSettings,
    sinks: Arc<RwLock<HashMap<String, Sink>>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl Reader {
    fn run(self) {
        let mut pending: Vec<f64> = Vec::new();
        let mut overflow = false;
        let mut last_overrun = false;

        while self.running.load(Ordering::SeqCst) {
            let read = self.board.a_in_scan_read_vec(
                self.address,
                ReadCount::Exactly(self.settings.batch_scans),
                ReadTimeout::Wait(self.settings.read_timeout),
            );
            let (status, data) = match read {
                Ok((read, data)) => (read.status, data),
                Err(e) => {
                    error!(address = self.address, error = %e, "Stream read failed");
                    break;
                }
            };
            let channels = self.board.a_in_scan_channel_count(self.address).unwrap_or(0);

            let overrun = status.overrun();
            if overrun && !last_overrun {
                self.counters.overflow_events.fetch_add(1, Ordering::SeqCst);
                warn!(address = self.address, ?status, "Scan overrun seen by stream");
            }
            last_overrun = overrun;
            overflow |= overrun;

            if channels > 0 {
                self.counters
                    .scans_read
                    .fetch_add((data.len() / channels) as u64, Ordering::SeqCst);
                pending.extend_from_slice(&data);
                let batch_len = self.settings.batch_scans * channels;
                while pending.len() >= batch_len {
                    let rest = pending.split_off(batch_len);
                    let full = std::mem::replace(&mut pending, rest);
                    self.dispatch(full, channels, std::mem::take(&mut overflow));
                }
            }

            if !status.contains(ScanStatus::RUNNING) && data.is_empty() {
                if channels > 0 && !pending.is_empty() {
                    self.dispatch(std::mem::take(&mut pending), channels, overflow);
                }
                debug!(address = self.address, "Scan finished, stream ending");
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!(address = self.address, "Stream reader exiting");
    }

    fn dispatch(&self, data: Vec<f64>, n_channels: usize, overflow_before: bool) {
        let samples = data.len() as u64;
        let batch = SampleBatch {
            data,
            n_channels,
            timestamp: Instant::now(),
            sequence: self.counters.sequence.fetch_add(1, Ordering::SeqCst),
            overflow_before,
        };

        for (name, sink) in self.sinks.read().iter() {
            match sink.sender.try_send(batch.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sink.drops.fetch_add(1, Ordering::SeqCst);
                    self.counters
                        .samples_dropped
                        .fetch_add(samples, Ordering::SeqCst);
                    trace!(sink = %name, "Dropped batch (sink full)");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(sink = %name, "Sink closed");
                }
            }
        }
        self.counters.batches_produced.fetch_add(1, Ordering::SeqCst);
    }
}
