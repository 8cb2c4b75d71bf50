//! Thermocouple ADC on SPI bus 0.
//!
//! Register-level access to the board's 24-bit delta-sigma converter. Every
//! multi-transfer sequence holds the board lock so a conversion started by
//! one process is not read back by another.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::Result;
use crate::retry::{read_until_stable, DEFAULT_MAX_ATTEMPTS};
use crate::transport::{Bus, BusTransport};

const REG_MUX0: u8 = 0x00;

const CMD_RESET: u8 = 0x06;
const CMD_NOP: u8 = 0xFF;
const CMD_RDATA: u8 = 0x12;
const CMD_WREG: u8 = 0x40;
const CMD_SELFOCAL: u8 = 0x62;

/// 20 SPS for 50/60 Hz rejection.
const DATA_RATE_INDEX: u8 = 2;
/// Gain 16, ±128 mV.
const PGA_GAIN_INDEX: u8 = 4;

/// Converter wait times.
///
/// Defaults are the datasheet figures for 20 SPS plus 5% for oscillator
/// tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcTiming {
    /// Settle after a reset
    pub reset: Duration,
    /// One conversion
    pub conversion: Duration,
    /// Self offset calibration
    pub calibration: Duration,
    /// Gap between stable-read attempts
    pub reread: Duration,
}

impl Default for AdcTiming {
    fn default() -> Self {
        Self {
            reset: Duration::from_micros(700),
            // 49.820 ms and 801.012 ms
            conversion: Duration::from_micros(52_311),
            calibration: Duration::from_micros(841_063),
            reread: Duration::from_micros(100),
        }
    }
}

impl AdcTiming {
    /// No waits, for simulated boards.
    pub fn immediate() -> Self {
        Self {
            reset: Duration::ZERO,
            conversion: Duration::ZERO,
            calibration: Duration::ZERO,
            reread: Duration::ZERO,
        }
    }
}

/// One board's converter.
#[derive(Debug)]
pub(crate) struct Adc {
    transport: Arc<BusTransport>,
    address: u8,
    timing: AdcTiming,
}

impl Adc {
    pub(crate) fn new(transport: Arc<BusTransport>, address: u8, timing: AdcTiming) -> Self {
        Self {
            transport,
            address,
            timing,
        }
    }

    fn send(&self, tx: &[u8]) -> Result<Vec<u8>> {
        self.transport.transfer(self.address, Bus::Spi0, tx, tx.len())
    }

    /// Reset and program gain, rate and reference.
    pub(crate) fn init(&self) -> Result<()> {
        let _board = self.transport.lock_board(self.address)?;
        self.send(&[CMD_RESET])?;
        sleep(self.timing.reset);

        // MUX0, VBIAS, MUX1 (internal reference on), SYS0 (gain, rate)
        self.send(&[
            CMD_WREG | REG_MUX0,
            4 - 1,
            0x01,
            0x00,
            0x30,
            (PGA_GAIN_INDEX << 4) | DATA_RATE_INDEX,
        ])?;
        debug!(address = self.address, "ADC initialized");
        Ok(())
    }

    /// Run the converter's internal offset calibration.
    pub(crate) fn calibrate_self_offset(&self) -> Result<()> {
        let _board = self.transport.lock_board(self.address)?;
        self.send(&[CMD_SELFOCAL])?;
        sleep(self.timing.calibration);
        debug!(address = self.address, "ADC self offset calibration done");
        Ok(())
    }

    /// Convert the differential pair (`hi`, `lo`) and return the signed code.
    ///
    /// Without a data-ready line the result register may be read mid-update,
    /// so the code is read until two consecutive values agree.
    pub(crate) fn read_code(&self, hi: u8, lo: u8) -> Result<i32> {
        let _board = self.transport.lock_board(self.address)?;

        // writing MUX0 starts a conversion
        self.send(&[CMD_WREG | REG_MUX0, 0, (hi << 3) | lo])?;
        sleep(self.timing.conversion);

        let raw = read_until_stable(DEFAULT_MAX_ATTEMPTS, self.timing.reread, || {
            let rx = self.send(&[CMD_RDATA, CMD_NOP, CMD_NOP, CMD_NOP])?;
            Ok(u32::from(rx[1]) << 16 | u32::from(rx[2]) << 8 | u32::from(rx[3]))
        })?;

        let code = sign_extend_24(raw);
        trace!(address = self.address, hi, lo, code, "ADC code");
        Ok(code)
    }
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// Sign-extend a 24-bit two's complement value.
pub(crate) fn sign_extend_24(raw: u32) -> i32 {
    ((raw << 8) as i32) >> 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend_24(0x7F_FFFF), 0x7F_FFFF);
        assert_eq!(sign_extend_24(0xFF_FFFF), -1);
        assert_eq!(sign_extend_24(0x80_0000), -0x80_0000);
        assert_eq!(sign_extend_24(0x00_0010), 16);
    }

    #[test]
    fn test_default_timing_matches_datasheet() {
        let timing = AdcTiming::default();
        assert_eq!(timing.conversion, Duration::from_micros(52_311));
        assert!(timing.calibration > Duration::from_millis(800));
    }
}
