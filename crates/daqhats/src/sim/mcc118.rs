//! Simulated MCC 118 microcontroller.
//!
//! Answers the command protocol with a time-paced scan: codes become
//! available at the programmed clock rate, accumulate in a bounded FIFO and
//! overflow it if nobody reads. Sample values are a deterministic function
//! of channel and scan index so tests can check ordering.

use std::time::Instant;

use parking_lot::Mutex;
use tracing::trace;

use super::faults::{FaultConfig, FaultScenario};
use crate::error::Result;
use crate::info::HatId;
use crate::mcc118::protocol::{
    self, Command, IdReply, ReplyStatus, ScanStart, ScanStatusReply,
};
use crate::mcc118::{CLOCK_TIMEBASE, NUM_CHANNELS};
use crate::scan::{ScanOptions, TriggerMode};

/// Codes the simulated FIFO holds before a hardware overrun.
pub const FIFO_CAPACITY: u64 = 16_384;

/// Largest data read the simulated firmware accepts.
pub const MAX_READ: u16 = 1024;

/// Firmware version reported.
pub const FIRMWARE_VERSION: u16 = 0x0104;

/// Bootloader version reported.
pub const BOOTLOADER_VERSION: u16 = 0x0103;

/// Code produced for `channel` in scan number `scan`.
pub fn expected_code(channel: u8, scan: u64) -> u16 {
    ((u64::from(channel) * 512 + scan * 7) % 4096) as u16
}

#[derive(Debug)]
struct SimScan {
    channels: Vec<u8>,
    /// 0 for continuous
    total_codes: u64,
    scan_rate: f64,
    waiting_for_trigger: bool,
    origin: Option<Instant>,
    stopped_at: Option<u64>,
    consumed: u64,
    hw_overrun: bool,
}

impl SimScan {
    fn produced(&self, now: Instant) -> u64 {
        if let Some(frozen) = self.stopped_at {
            return frozen;
        }
        let Some(origin) = self.origin else {
            return 0;
        };
        let scans = (now.duration_since(origin).as_secs_f64() * self.scan_rate).floor() as u64;
        let codes = scans.saturating_mul(self.channels.len() as u64);
        if self.total_codes > 0 {
            codes.min(self.total_codes)
        } else {
            codes
        }
    }

    fn acquiring(&self, now: Instant) -> bool {
        if self.stopped_at.is_some() || self.hw_overrun {
            return false;
        }
        self.waiting_for_trigger || self.total_codes == 0 || self.produced(now) < self.total_codes
    }

    /// Advance the FIFO model, latching an overrun when it fills.
    fn update(&mut self, now: Instant) {
        if self.hw_overrun || self.stopped_at.is_some() {
            return;
        }
        let produced = self.produced(now);
        if produced - self.consumed > FIFO_CAPACITY {
            self.hw_overrun = true;
            self.stopped_at = Some(self.consumed + FIFO_CAPACITY);
        }
    }

    fn available(&self, now: Instant) -> u64 {
        self.produced(now) - self.consumed
    }
}

#[derive(Debug)]
struct State {
    scan: Option<SimScan>,
    trigger_mode: TriggerMode,
    trigger_level: bool,
    input_codes: [u16; NUM_CHANNELS],
    blinks: Vec<u8>,
    ext_clock_hz: f64,
    clock_test_mode: u8,
}

/// One simulated MCC 118.
#[derive(Debug)]
pub struct SimMcc118 {
    state: Mutex<State>,
    faults: Mutex<FaultConfig>,
}

impl Default for SimMcc118 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMcc118 {
    /// Idle board with every input at mid-scale.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                scan: None,
                trigger_mode: TriggerMode::default(),
                trigger_level: false,
                input_codes: [2048; NUM_CHANNELS],
                blinks: Vec::new(),
                ext_clock_hz: 1000.0,
                clock_test_mode: 0,
            }),
            faults: Mutex::new(FaultConfig::none()),
        }
    }

    /// Replace the fault scenarios.
    pub fn set_faults(&self, faults: FaultConfig) {
        *self.faults.lock() = faults;
    }

    /// Code returned by single reads of `channel`.
    pub fn set_input_code(&self, channel: u8, code: u16) {
        if let Some(slot) = self.state.lock().input_codes.get_mut(usize::from(channel)) {
            *slot = code;
        }
    }

    /// Scan rate used with `EXT_CLOCK`.
    pub fn set_external_clock(&self, hz: f64) {
        self.state.lock().ext_clock_hz = hz;
    }

    /// Drive the TRIG input.
    pub fn set_trigger_input(&self, level: bool) {
        let mut state = self.state.lock();
        let previous = state.trigger_level;
        state.trigger_level = level;
        let fire = match state.trigger_mode {
            TriggerMode::RisingEdge => !previous && level,
            TriggerMode::FallingEdge => previous && !level,
            TriggerMode::ActiveHigh => level,
            TriggerMode::ActiveLow => !level,
        };
        if fire {
            if let Some(scan) = state.scan.as_mut().filter(|s| s.waiting_for_trigger) {
                scan.waiting_for_trigger = false;
                scan.origin = Some(Instant::now());
                trace!("Simulated trigger fired");
            }
        }
    }

    /// Overflow the FIFO now.
    pub fn force_hw_overrun(&self) {
        let now = Instant::now();
        if let Some(scan) = self.state.lock().scan.as_mut() {
            scan.hw_overrun = true;
            scan.stopped_at = Some(scan.produced(now));
        }
    }

    /// Whether a scan is acquiring.
    pub fn scan_running(&self) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .scan
            .as_ref()
            .is_some_and(|scan| scan.acquiring(now))
    }

    /// LED blink counts received, oldest first.
    pub fn blinks(&self) -> Vec<u8> {
        self.state.lock().blinks.clone()
    }

    /// Last CLK test mode set, as its raw value.
    pub fn clock_test_mode(&self) -> u8 {
        self.state.lock().clock_test_mode
    }

    /// Configured trigger mode.
    pub fn trigger_mode(&self) -> TriggerMode {
        self.state.lock().trigger_mode
    }

    pub(crate) fn handle(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let (command, payload) = protocol::decode_request(frame)?;
        let faults = self.faults.lock().clone();
        faults.check(operation_name(command))?;

        let mut state = self.state.lock();
        let now = Instant::now();
        if let Some(scan) = state.scan.as_mut() {
            scan.update(now);
        }

        let (status, reply) = match command {
            Command::Id => (
                ReplyStatus::Ok,
                IdReply {
                    id: HatId::Mcc118.raw(),
                    version: 1,
                    firmware: FIRMWARE_VERSION,
                    bootloader: BOOTLOADER_VERSION,
                }
                .encode()
                .to_vec(),
            ),
            Command::Blink => {
                state.blinks.push(payload.first().copied().unwrap_or(0));
                (ReplyStatus::Ok, Vec::new())
            }
            Command::Reset => {
                state.scan = None;
                (ReplyStatus::Ok, Vec::new())
            }
            Command::AIn => match payload.first().map(|&ch| usize::from(ch)) {
                Some(ch) if ch < NUM_CHANNELS => {
                    if state.scan.as_ref().is_some_and(|s| s.acquiring(now)) {
                        (ReplyStatus::Busy, Vec::new())
                    } else {
                        (ReplyStatus::Ok, state.input_codes[ch].to_le_bytes().to_vec())
                    }
                }
                _ => (ReplyStatus::BadParameter, Vec::new()),
            },
            Command::TriggerConfig => match payload.first().map(|&m| TriggerMode::from_raw(m)) {
                Some(Ok(mode)) => {
                    state.trigger_mode = mode;
                    (ReplyStatus::Ok, Vec::new())
                }
                _ => (ReplyStatus::BadParameter, Vec::new()),
            },
            Command::AInScanStart => {
                if state.scan.as_ref().is_some_and(|s| s.acquiring(now)) {
                    (ReplyStatus::Busy, Vec::new())
                } else {
                    match ScanStart::decode(payload) {
                        Ok(start) if start.channel_mask != 0 => {
                            let never_runs = faults.has(&FaultScenario::ScanNeverRuns);
                            let scan = build_scan(&state, &start, never_runs, now);
                            state.scan = Some(scan);
                            (ReplyStatus::Ok, Vec::new())
                        }
                        _ => (ReplyStatus::BadParameter, Vec::new()),
                    }
                }
            }
            Command::AInScanStatus => {
                let reply = match state.scan.as_ref() {
                    Some(scan) => ScanStatusReply {
                        running: scan.acquiring(now) && scan.origin.is_some()
                            || scan.waiting_for_trigger && scan.stopped_at.is_none(),
                        hw_overrun: scan.hw_overrun,
                        triggered: scan.origin.is_some(),
                        available: scan.available(now).min(u64::from(u16::MAX)) as u16,
                        max_read: MAX_READ,
                    },
                    None => ScanStatusReply {
                        max_read: MAX_READ,
                        ..ScanStatusReply::default()
                    },
                };
                (ReplyStatus::Ok, reply.encode().to_vec())
            }
            Command::AInScanData => {
                let requested = match payload {
                    [lo, hi] => u64::from(u16::from_le_bytes([*lo, *hi])),
                    _ => 0,
                };
                match state.scan.as_mut() {
                    Some(scan) if requested > 0 => {
                        let count = requested.min(scan.available(now)).min(u64::from(MAX_READ));
                        let channels = scan.channels.len() as u64;
                        let codes: Vec<u16> = (scan.consumed..scan.consumed + count)
                            .map(|k| {
                                let channel = scan.channels[(k % channels) as usize];
                                expected_code(channel, k / channels)
                            })
                            .collect();
                        scan.consumed += count;
                        (ReplyStatus::Ok, protocol::encode_codes(&codes))
                    }
                    _ => (ReplyStatus::BadParameter, Vec::new()),
                }
            }
            Command::AInScanStop => {
                if let Some(scan) = state.scan.as_mut() {
                    if scan.stopped_at.is_none() {
                        scan.stopped_at = Some(scan.produced(now));
                        scan.waiting_for_trigger = false;
                    }
                }
                (ReplyStatus::Ok, Vec::new())
            }
            Command::TestClock => match payload.first() {
                Some(&mode) if mode <= 3 => {
                    state.clock_test_mode = mode;
                    // input idles high through the pull-up; the square wave
                    // is sampled at an arbitrary phase
                    let value = u8::from(mode != 1);
                    (ReplyStatus::Ok, vec![value])
                }
                _ => (ReplyStatus::BadParameter, Vec::new()),
            },
            Command::TestTrigger => (ReplyStatus::Ok, vec![u8::from(state.trigger_level)]),
        };
        Ok(protocol::encode_reply(command, status, &reply))
    }
}

fn build_scan(state: &State, start: &ScanStart, never_runs: bool, now: Instant) -> SimScan {
    let channels: Vec<u8> = (0..NUM_CHANNELS as u8)
        .filter(|ch| start.channel_mask & (1 << ch) != 0)
        .collect();
    let options = ScanOptions::from_bits_truncate(u32::from(start.options));
    let scan_rate = if options.contains(ScanOptions::EXT_CLOCK) {
        state.ext_clock_hz
    } else {
        CLOCK_TIMEBASE / ((f64::from(start.clock_divisor) + 1.0) * channels.len() as f64)
    };
    let total_codes = if options.contains(ScanOptions::CONTINUOUS) {
        0
    } else {
        u64::from(start.samples_per_channel) * channels.len() as u64
    };

    let level_armed = match state.trigger_mode {
        TriggerMode::ActiveHigh => state.trigger_level,
        TriggerMode::ActiveLow => !state.trigger_level,
        _ => false,
    };
    let waiting_for_trigger = options.contains(ScanOptions::EXT_TRIGGER) && !level_armed;
    let origin = (!waiting_for_trigger && !never_runs).then_some(now);

    trace!(?channels, scan_rate, total_codes, waiting_for_trigger, "Simulated scan start");
    SimScan {
        channels,
        total_codes,
        scan_rate,
        waiting_for_trigger,
        origin,
        stopped_at: None,
        consumed: 0,
        hw_overrun: false,
    }
}

fn operation_name(command: Command) -> &'static str {
    match command {
        Command::AIn => "ain",
        Command::AInScanStart => "scan_start",
        Command::AInScanStatus => "scan_status",
        Command::AInScanData => "scan_data",
        Command::AInScanStop => "scan_stop",
        Command::TriggerConfig => "trigger",
        Command::Id => "id",
        Command::Blink => "blink",
        Command::Reset => "reset",
        Command::TestClock => "test_clock",
        Command::TestTrigger => "test_trigger",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn send(sim: &SimMcc118, command: Command, payload: &[u8]) -> (ReplyStatus, Vec<u8>) {
        let reply = sim.handle(&protocol::encode_request(command, payload)).unwrap();
        let len = usize::from(u16::from_le_bytes([reply[3], reply[4]]));
        (
            ReplyStatus::from_byte(reply[2]),
            reply[protocol::REPLY_HEADER_LEN..protocol::REPLY_HEADER_LEN + len].to_vec(),
        )
    }

    #[test]
    fn test_expected_code_pattern() {
        assert_eq!(expected_code(0, 0), 0);
        assert_eq!(expected_code(1, 0), 512);
        assert_eq!(expected_code(1, 2), 526);
        assert!(expected_code(7, u64::MAX / 8) < 4096);
    }

    #[test]
    fn test_finite_scan_produces_ordered_codes() {
        let sim = SimMcc118::new();
        let start = ScanStart {
            channel_mask: 0b101,
            samples_per_channel: 4,
            clock_divisor: 0,
            options: 0,
        };
        assert_eq!(send(&sim, Command::AInScanStart, &start.encode()).0, ReplyStatus::Ok);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let (_, status) = send(&sim, Command::AInScanStatus, &[]);
        let status = ScanStatusReply::decode(&status).unwrap();
        assert_eq!(status.available, 8);
        assert!(!status.running);

        let (_, data) = send(&sim, Command::AInScanData, &8u16.to_le_bytes());
        let codes = protocol::decode_codes(&data);
        assert_eq!(
            codes,
            vec![
                expected_code(0, 0),
                expected_code(2, 0),
                expected_code(0, 1),
                expected_code(2, 1),
                expected_code(0, 2),
                expected_code(2, 2),
                expected_code(0, 3),
                expected_code(2, 3),
            ]
        );
    }

    #[test]
    fn test_single_read_busy_during_scan() {
        let sim = SimMcc118::new();
        let start = ScanStart {
            channel_mask: 1,
            samples_per_channel: 0,
            clock_divisor: 15_999,
            options: ScanOptions::CONTINUOUS.bits() as u8,
        };
        send(&sim, Command::AInScanStart, &start.encode());
        assert_eq!(send(&sim, Command::AIn, &[0]).0, ReplyStatus::Busy);
        send(&sim, Command::AInScanStop, &[]);
        assert_eq!(send(&sim, Command::AIn, &[0]).0, ReplyStatus::Ok);
    }

    #[test]
    fn test_trigger_arms_scan() {
        let sim = SimMcc118::new();
        let start = ScanStart {
            channel_mask: 1,
            samples_per_channel: 10,
            clock_divisor: 0,
            options: ScanOptions::EXT_TRIGGER.bits() as u8,
        };
        send(&sim, Command::AInScanStart, &start.encode());
        let (_, status) = send(&sim, Command::AInScanStatus, &[]);
        let status = ScanStatusReply::decode(&status).unwrap();
        assert!(status.running && !status.triggered);
        assert_eq!(status.available, 0);

        sim.set_trigger_input(true);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let (_, status) = send(&sim, Command::AInScanStatus, &[]);
        let status = ScanStatusReply::decode(&status).unwrap();
        assert!(status.triggered);
        assert_eq!(status.available, 10);
    }
}
