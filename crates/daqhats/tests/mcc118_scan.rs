//! MCC 118 scan engine tests against the simulated board.
//!
//! The simulator paces samples in real time and tags every code with its
//! channel and scan index, so these tests check ordering and continuity as
//! well as the status flags.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_finite_scan_ordering` | Finite scan delivers every scan in order |
//! | `test_continuous_scan_is_gapless` | Continuous reads join without gaps, drain after stop |
//! | `test_scan_excludes_other_access` | Busy on second start and single reads |
//! | `test_external_trigger` | Scan waits for TRIG, then sets TRIGGERED |
//! | `test_hardware_overrun` | Device overrun ends the scan with HW_OVERRUN |
//! | `test_buffer_overrun_keeps_oldest` | Host buffer overflow drops newest scans |
//! | `test_start_timeout` | A scan that never runs fails to start cleanly |
//! | `test_transport_failure_surfaces_after_data` | Stored error follows the buffered data |
//! | `test_scan_calls_after_cleanup` | Read and stop after cleanup report no scan |
//! | `test_status_only_read_consumes_nothing` | Status queries leave buffered scans in place |
//! | `test_scans_on_two_addresses` | Independent concurrent scans on two boards |
//! | `test_calibration_write_until_fresh_open` | Coefficient writes last until the last close |

mod common;

use std::thread;
use std::time::Duration;

use common::{fast_scan_config, wait_for, Fixture};
use daqhats::mcc118::{ClockTestMode, Mcc118};
use daqhats::scan::TriggerMode;
use daqhats::sim::{expected_code, FaultConfig, FaultScenario};
use daqhats::calibration::Coefficient;
use daqhats::{HatError, ReadCount, ReadTimeout, ResultCode, ScanOptions, ScanState, ScanStatus};

/// Return raw codes so samples compare directly against the simulator.
fn raw() -> ScanOptions {
    ScanOptions::NO_SCALE_DATA | ScanOptions::NO_CALIBRATE_DATA
}

fn open_board(fixture: &Fixture) -> Mcc118 {
    let board = Mcc118::new(fixture.transport.clone(), fast_scan_config());
    board.open(0).unwrap();
    board
}

// =============================================================================
// Single Reads and Board Commands
// =============================================================================

/// Single reads return the simulated input codes, raw and scaled
#[test]
fn test_single_read() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    sim.set_input_code(3, 4095);
    let board = open_board(&fixture);

    assert_eq!(board.a_in_read(0, 3, raw()).unwrap(), 4095.0);
    // mid-scale is 0 V on a ±10 V range
    assert_eq!(board.a_in_read(0, 0, ScanOptions::empty()).unwrap(), 0.0);
    assert!(board.a_in_read(0, 8, ScanOptions::empty()).unwrap_err().is_bad_parameter());
}

/// Firmware, LED and test pin commands reach the board
#[test]
fn test_board_commands() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    assert_eq!(board.firmware_version(0).unwrap().version, 0x0104);
    board.blink_led(0, 3).unwrap();
    assert_eq!(sim.blinks(), vec![3]);

    assert_eq!(board.test_clock(0, ClockTestMode::OutputLow).unwrap(), 0);
    assert_eq!(sim.clock_test_mode(), ClockTestMode::OutputLow as u8);

    assert!(!board.test_trigger(0).unwrap());
    sim.set_trigger_input(true);
    assert!(board.test_trigger(0).unwrap());

    board.trigger_mode(0, TriggerMode::ActiveLow).unwrap();
    assert_eq!(sim.trigger_mode(), TriggerMode::ActiveLow);
}

// =============================================================================
// Finite and Continuous Scans
// =============================================================================

/// A finite scan on channels 0 and 2 delivers every scan, interleaved in
/// channel order
#[test]
fn test_finite_scan_ordering() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    board.a_in_scan_start(0, 0b101, 500, 1000.0, raw()).unwrap();
    assert_eq!(board.a_in_scan_channel_count(0).unwrap(), 2);
    assert_eq!(board.a_in_scan_buffer_size(0).unwrap(), 1000);

    let (read, samples) = board
        .a_in_scan_read_vec(0, ReadCount::Exactly(500), ReadTimeout::Wait(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(read.samples_per_channel, 500);
    assert!(!read.timed_out);
    assert!(!read.status.overrun());

    for (scan, pair) in samples.chunks(2).enumerate() {
        assert_eq!(pair[0], f64::from(expected_code(0, scan as u64)), "scan {scan} ch0");
        assert_eq!(pair[1], f64::from(expected_code(2, scan as u64)), "scan {scan} ch2");
    }

    assert!(wait_for(Duration::from_secs(2), || {
        board.scan_state(0).unwrap() == ScanState::Terminated
    }));
    let status = board
        .a_in_scan_read(0, ReadCount::StatusOnly, ReadTimeout::Immediate, &mut [])
        .unwrap()
        .status;
    assert!(!status.contains(ScanStatus::RUNNING));

    board.a_in_scan_cleanup(0).unwrap();
    assert_eq!(board.scan_state(0).unwrap(), ScanState::Idle);
    assert_eq!(board.a_in_scan_channel_count(0).unwrap(), 0);
}

/// Successive continuous reads join without gaps, and stopping leaves the
/// tail readable
#[test]
fn test_continuous_scan_is_gapless() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    board
        .a_in_scan_start(0, 0b1, 0, 10_000.0, raw() | ScanOptions::CONTINUOUS)
        .unwrap();

    let mut collected = Vec::new();
    for _ in 0..4 {
        let (read, samples) = board
            .a_in_scan_read_vec(0, ReadCount::Exactly(2500), ReadTimeout::Wait(Duration::from_secs(2)))
            .unwrap();
        assert_eq!(read.samples_per_channel, 2500);
        assert!(read.status.contains(ScanStatus::RUNNING));
        collected.extend(samples);
    }

    board.a_in_scan_stop(0).unwrap();
    let drained = wait_for(Duration::from_secs(2), || {
        let (read, samples) = board
            .a_in_scan_read_vec(0, ReadCount::Available, ReadTimeout::Immediate)
            .unwrap();
        collected.extend(samples);
        !read.status.contains(ScanStatus::RUNNING) && read.samples_per_channel == 0
    });
    assert!(drained);

    assert!(collected.len() >= 10_000);
    for (scan, &sample) in collected.iter().enumerate() {
        assert_eq!(sample, f64::from(expected_code(0, scan as u64)), "scan {scan}");
    }

    board.a_in_scan_cleanup(0).unwrap();
}

/// An external clock paces the scan when the rate is unknown
#[test]
fn test_external_clock() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    sim.set_external_clock(4000.0);
    let board = open_board(&fixture);

    board
        .a_in_scan_start(0, 0b11, 200, 0.0, raw() | ScanOptions::EXT_CLOCK)
        .unwrap();
    let (read, _) = board
        .a_in_scan_read_vec(0, ReadCount::Exactly(200), ReadTimeout::Forever)
        .unwrap();
    assert_eq!(read.samples_per_channel, 200);
    board.a_in_scan_cleanup(0).unwrap();
}

/// A read that cannot be satisfied in time returns what it has
#[test]
fn test_read_timeout() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    board.a_in_scan_start(0, 0b1, 1000, 100.0, raw()).unwrap();
    let (read, samples) = board
        .a_in_scan_read_vec(0, ReadCount::Exactly(1000), ReadTimeout::Wait(Duration::from_millis(100)))
        .unwrap();
    assert!(read.timed_out);
    assert!(read.samples_per_channel < 1000);
    assert_eq!(samples.len(), read.samples_per_channel);
    assert!(read.status.contains(ScanStatus::RUNNING));

    board.a_in_scan_stop(0).unwrap();
    board.a_in_scan_cleanup(0).unwrap();
}

// =============================================================================
// Exclusion and Lifecycle
// =============================================================================

/// While a scan exists the board rejects a second scan and single reads
#[test]
fn test_scan_excludes_other_access() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    board
        .a_in_scan_start(0, 0b1, 0, 1000.0, ScanOptions::CONTINUOUS)
        .unwrap();

    let err = board
        .a_in_scan_start(0, 0b10, 100, 1000.0, ScanOptions::empty())
        .unwrap_err();
    assert!(err.is_busy());
    assert!(board.a_in_read(0, 0, ScanOptions::empty()).unwrap_err().is_busy());
    assert!(board.trigger_mode(0, TriggerMode::RisingEdge).unwrap_err().is_busy());
    assert!(board
        .calibration_coefficient_write(0, 0, Default::default())
        .unwrap_err()
        .is_busy());

    board.a_in_scan_stop(0).unwrap();
    board.a_in_scan_cleanup(0).unwrap();
    assert!(board.a_in_read(0, 0, ScanOptions::empty()).is_ok());
}

/// Reads and stops without a scan report that no scan exists
#[test]
fn test_no_scan() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    let err = board
        .a_in_scan_read(0, ReadCount::StatusOnly, ReadTimeout::Immediate, &mut [])
        .unwrap_err();
    assert!(err.is_unavailable());
    assert!(board.a_in_scan_stop(0).unwrap_err().is_unavailable());
    // cleanup with nothing to clean is fine
    board.a_in_scan_cleanup(0).unwrap();
}

/// Once cleaned up, a finished scan is gone: reads and stops report no scan
#[test]
fn test_scan_calls_after_cleanup() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    board.a_in_scan_start(0, 0b11, 100, 1000.0, raw()).unwrap();
    let (read, _) = board
        .a_in_scan_read_vec(0, ReadCount::Exactly(100), ReadTimeout::Wait(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(read.samples_per_channel, 100);
    board.a_in_scan_cleanup(0).unwrap();

    let err = board
        .a_in_scan_read_vec(0, ReadCount::Available, ReadTimeout::Immediate)
        .unwrap_err();
    assert_eq!(err.code(), ResultCode::ResourceUnavailable);
    assert!(board.a_in_scan_stop(0).unwrap_err().is_unavailable());
    assert!(board.a_in_scan_buffer_size(0).unwrap_err().is_unavailable());
}

/// A status-only read neither waits nor consumes buffered scans
#[test]
fn test_status_only_read_consumes_nothing() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    board.a_in_scan_start(0, 0b11, 100, 1000.0, raw()).unwrap();
    assert!(wait_for(Duration::from_secs(5), || {
        board.scan_state(0).unwrap() == ScanState::Terminated
    }));

    for _ in 0..3 {
        let read = board
            .a_in_scan_read(0, ReadCount::StatusOnly, ReadTimeout::Forever, &mut [])
            .unwrap();
        assert_eq!(read.samples_per_channel, 0);
        assert!(!read.timed_out);
        assert!(!read.status.contains(ScanStatus::RUNNING));
    }

    let (read, samples) = board
        .a_in_scan_read_vec(0, ReadCount::Available, ReadTimeout::Immediate)
        .unwrap();
    assert_eq!(read.samples_per_channel, 100);
    assert_eq!(samples[0], f64::from(expected_code(0, 0)));
    assert_eq!(samples[1], f64::from(expected_code(1, 0)));

    board.a_in_scan_cleanup(0).unwrap();
}

/// Two boards scan at the same time without disturbing each other
#[test]
fn test_scans_on_two_addresses() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    fixture.stack.add_mcc118(1);
    let board = open_board(&fixture);
    board.open(1).unwrap();

    board.a_in_scan_start(0, 0b11, 100, 1000.0, raw()).unwrap();
    board.a_in_scan_start(1, 0b100, 100, 1000.0, raw()).unwrap();

    let wait = ReadTimeout::Wait(Duration::from_secs(5));
    let (first, second) = thread::scope(|scope| {
        let first = scope.spawn(|| board.a_in_scan_read_vec(0, ReadCount::Exactly(100), wait));
        let second = scope.spawn(|| board.a_in_scan_read_vec(1, ReadCount::Exactly(100), wait));
        (first.join().unwrap().unwrap(), second.join().unwrap().unwrap())
    });

    let (read, samples) = &first;
    assert_eq!(read.samples_per_channel, 100);
    assert_eq!(samples.len(), 200);
    assert_eq!(samples[198], f64::from(expected_code(0, 99)));
    assert_eq!(samples[199], f64::from(expected_code(1, 99)));

    let (read, samples) = &second;
    assert_eq!(read.samples_per_channel, 100);
    assert_eq!(samples.len(), 100);
    assert_eq!(samples[99], f64::from(expected_code(2, 99)));

    board.a_in_scan_cleanup(0).unwrap();
    board.a_in_scan_cleanup(1).unwrap();
}

/// A written coefficient is read back and applied until the last handle
/// closes; a fresh open restores the factory value
#[test]
fn test_calibration_write_until_fresh_open() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    sim.set_input_code(1, 1000);
    let board = open_board(&fixture);
    let factory = board.calibration_coefficient_read(0, 1).unwrap();

    let custom = Coefficient::new(2.0, 10.0);
    board.calibration_coefficient_write(0, 1, custom).unwrap();
    assert_eq!(board.calibration_coefficient_read(0, 1).unwrap(), custom);
    assert_eq!(
        board.a_in_read(0, 1, ScanOptions::NO_SCALE_DATA).unwrap(),
        2010.0
    );
    assert!(board
        .calibration_coefficient_write(0, 8, custom)
        .unwrap_err()
        .is_bad_parameter());

    // a shared handle sees the write and does not reset it
    board.open(0).unwrap();
    board.close(0).unwrap();
    assert_eq!(board.calibration_coefficient_read(0, 1).unwrap(), custom);

    board.close(0).unwrap();
    board.open(0).unwrap();
    assert_eq!(board.calibration_coefficient_read(0, 1).unwrap(), factory);
}

/// Parameters the board cannot run are rejected before anything starts
#[test]
fn test_start_rejects_bad_parameters() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    let cases = [
        (0u32, 100u32, 1000.0, ScanOptions::empty()),
        (0x100, 100, 1000.0, ScanOptions::empty()),
        (0b1, 0, 1000.0, ScanOptions::empty()),
        (0b1, 100, 0.0, ScanOptions::empty()),
        (0xFF, 100, 20_000.0, ScanOptions::empty()),
    ];
    for (mask, samples, rate, options) in cases {
        let err = board.a_in_scan_start(0, mask, samples, rate, options).unwrap_err();
        assert!(err.is_bad_parameter(), "mask {mask:#x} rate {rate}: {err}");
    }
    assert_eq!(board.scan_state(0).unwrap(), ScanState::Idle);
}

/// Closing the last handle stops the board's scan
#[test]
fn test_close_stops_scan() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    board
        .a_in_scan_start(0, 0b1, 0, 1000.0, ScanOptions::CONTINUOUS)
        .unwrap();
    assert!(sim.scan_running());

    board.close(0).unwrap();
    assert!(!board.is_open(0));
    assert!(!sim.scan_running());
}

// =============================================================================
// Trigger
// =============================================================================

/// An externally triggered scan is armed but idle until TRIG fires
#[test]
fn test_external_trigger() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);
    board.trigger_mode(0, TriggerMode::RisingEdge).unwrap();

    board
        .a_in_scan_start(0, 0b1, 100, 1000.0, raw() | ScanOptions::EXT_TRIGGER)
        .unwrap();

    let (read, _) = board
        .a_in_scan_read_vec(0, ReadCount::Exactly(10), ReadTimeout::Wait(Duration::from_millis(100)))
        .unwrap();
    assert_eq!(read.samples_per_channel, 0);
    assert!(read.timed_out);
    assert!(read.status.contains(ScanStatus::RUNNING));
    assert!(!read.status.contains(ScanStatus::TRIGGERED));

    sim.set_trigger_input(true);
    let (read, samples) = board
        .a_in_scan_read_vec(0, ReadCount::Exactly(100), ReadTimeout::Wait(Duration::from_secs(5)))
        .unwrap();
    assert_eq!(read.samples_per_channel, 100);
    assert!(read.status.contains(ScanStatus::TRIGGERED));
    assert_eq!(samples[0], f64::from(expected_code(0, 0)));

    board.a_in_scan_cleanup(0).unwrap();
}

// =============================================================================
// Overruns
// =============================================================================

/// A device FIFO overflow ends the scan and latches HW_OVERRUN
#[test]
fn test_hardware_overrun() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    board
        .a_in_scan_start(0, 0b1, 0, 1000.0, raw() | ScanOptions::CONTINUOUS)
        .unwrap();
    board
        .a_in_scan_read_vec(0, ReadCount::Exactly(50), ReadTimeout::Wait(Duration::from_secs(2)))
        .unwrap();

    sim.force_hw_overrun();
    assert!(wait_for(Duration::from_secs(2), || {
        board.scan_state(0).unwrap() == ScanState::Terminated
    }));

    let (read, _) = board
        .a_in_scan_read_vec(0, ReadCount::Available, ReadTimeout::Immediate)
        .unwrap();
    assert!(read.status.contains(ScanStatus::HW_OVERRUN));
    assert!(!read.status.contains(ScanStatus::RUNNING));

    board.a_in_scan_cleanup(0).unwrap();
}

/// When nobody reads, the host buffer keeps the oldest scans and flags the
/// loss until a read delivers data
#[test]
fn test_buffer_overrun_keeps_oldest() {
    let fixture = Fixture::new();
    fixture.stack.add_mcc118(0);
    let board = open_board(&fixture);

    // 10 kS/s continuous gets a 10 000 scan buffer
    board
        .a_in_scan_start(0, 0b1, 0, 10_000.0, raw() | ScanOptions::CONTINUOUS)
        .unwrap();
    assert_eq!(board.a_in_scan_buffer_size(0).unwrap(), 10_000);

    thread::sleep(Duration::from_millis(1500));

    let (read, samples) = board
        .a_in_scan_read_vec(0, ReadCount::Available, ReadTimeout::Immediate)
        .unwrap();
    assert!(read.status.contains(ScanStatus::BUFFER_OVERRUN));
    assert_eq!(read.samples_per_channel, 10_000);
    for (scan, &sample) in samples.iter().enumerate() {
        assert_eq!(sample, f64::from(expected_code(0, scan as u64)));
    }

    let status = board
        .a_in_scan_read(0, ReadCount::StatusOnly, ReadTimeout::Immediate, &mut [])
        .unwrap()
        .status;
    assert!(!status.contains(ScanStatus::BUFFER_OVERRUN));

    board.a_in_scan_stop(0).unwrap();
    board.a_in_scan_cleanup(0).unwrap();
}

// =============================================================================
// Failures
// =============================================================================

/// A scan the device never reports running fails with a timeout and leaves
/// the board free
#[test]
fn test_start_timeout() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    sim.set_faults(FaultConfig::scenario(FaultScenario::ScanNeverRuns));
    let board = open_board(&fixture);

    let err = board
        .a_in_scan_start(0, 0b1, 100, 1000.0, ScanOptions::empty())
        .unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(board.scan_state(0).unwrap(), ScanState::Idle);
    assert!(board.a_in_read(0, 0, ScanOptions::empty()).is_ok());
}

/// A transport failure mid-scan ends acquisition; buffered data is still
/// delivered and the error follows it
#[test]
fn test_transport_failure_surfaces_after_data() {
    let fixture = Fixture::new();
    let sim = fixture.stack.add_mcc118(0);
    sim.set_faults(FaultConfig::scenario(FaultScenario::FailAfterN {
        operation: "scan_data",
        count: 3,
    }));
    let board = open_board(&fixture);

    board
        .a_in_scan_start(0, 0b1, 0, 10_000.0, raw() | ScanOptions::CONTINUOUS)
        .unwrap();
    assert!(wait_for(Duration::from_secs(2), || {
        board.scan_state(0).unwrap() == ScanState::Terminated
    }));

    let mut delivered = 0;
    let err: HatError = loop {
        match board.a_in_scan_read_vec(0, ReadCount::Exactly(1000), ReadTimeout::Immediate) {
            Ok((read, _)) => {
                assert!(read.samples_per_channel > 0, "empty read before the error");
                delivered += read.samples_per_channel;
            }
            Err(e) => break e,
        }
    };
    assert!(delivered > 0);
    assert_eq!(err.code(), ResultCode::Undefined);

    // the error stays until cleanup
    assert!(board
        .a_in_scan_read_vec(0, ReadCount::Available, ReadTimeout::Immediate)
        .is_err());
    board.a_in_scan_cleanup(0).unwrap();
    assert_eq!(board.scan_state(0).unwrap(), ScanState::Idle);
}
