//! Circular buffer of interleaved scan samples.
//!
//! Positions are monotonic sample counters: `write_head` only ever grows and
//! `read_tail` never passes it. The slot for a counter value is
//! `position % capacity`. Data moves in whole scans only, so the read tail is
//! always on a channel-0 sample.

use crate::error::{HatError, Result};

/// Fixed-capacity scan ring.
#[derive(Debug)]
pub struct SampleRing {
    data: Vec<f64>,
    channels: usize,
    write_head: u64,
    read_tail: u64,
}

impl SampleRing {
    /// Allocate room for `scans` scans of `channels` samples each.
    ///
    /// Allocation failure is reported as [`HatError::ResourceUnavailable`]
    /// instead of aborting.
    pub fn new(scans: usize, channels: usize) -> Result<Self> {
        if scans == 0 || channels == 0 {
            return Err(HatError::bad_parameter(format!(
                "ring needs at least one scan and one channel, got {scans}x{channels}"
            )));
        }
        let capacity = scans.checked_mul(channels).ok_or_else(|| {
            HatError::unavailable(format!("ring of {scans} scans x {channels} channels overflows"))
        })?;

        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        data.resize(capacity, 0.0);

        Ok(Self {
            data,
            channels,
            write_head: 0,
            read_tail: 0,
        })
    }

    /// Capacity in samples.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Samples per scan.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Unread samples.
    pub fn len(&self) -> usize {
        (self.write_head - self.read_tail) as usize
    }

    /// True when nothing is waiting to be read.
    pub fn is_empty(&self) -> bool {
        self.write_head == self.read_tail
    }

    /// Unread whole scans.
    pub fn available_scans(&self) -> usize {
        self.len() / self.channels
    }

    /// Scans that can still be stored.
    pub fn free_scans(&self) -> usize {
        (self.capacity() - self.len()) / self.channels
    }

    /// Samples ever written.
    pub fn total_written(&self) -> u64 {
        self.write_head
    }

    /// Append whole scans from `samples`, dropping the ones that do not fit.
    ///
    /// Returns the number of scans dropped. Stored samples keep their order.
    /// `samples.len()` must be a multiple of the channel count; a trailing
    /// partial scan is ignored.
    pub fn push_scans(&mut self, samples: &[f64]) -> usize {
        let offered = samples.len() / self.channels;
        let accepted = offered.min(self.free_scans());
        let count = accepted * self.channels;

        let capacity = self.capacity();
        let start = (self.write_head % capacity as u64) as usize;
        let first = count.min(capacity - start);
        self.data[start..start + first].copy_from_slice(&samples[..first]);
        self.data[..count - first].copy_from_slice(&samples[first..count]);

        self.write_head += count as u64;
        offered - accepted
    }

    /// Copy up to `max_scans` scans into `out` and consume them.
    ///
    /// Copies no more than `out` can hold in whole scans. Returns the number
    /// of scans copied.
    pub fn pop_scans(&mut self, out: &mut [f64], max_scans: usize) -> usize {
        let scans = self
            .available_scans()
            .min(max_scans)
            .min(out.len() / self.channels);
        let count = scans * self.channels;

        let capacity = self.capacity();
        let start = (self.read_tail % capacity as u64) as usize;
        let first = count.min(capacity - start);
        out[..first].copy_from_slice(&self.data[start..start + first]);
        out[first..count].copy_from_slice(&self.data[..count - first]);

        self.read_tail += count as u64;
        scans
    }
}
