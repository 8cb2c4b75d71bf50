//! Option, status and trigger types with their wire encodings.

use bitflags::bitflags;

use crate::error::{HatError, Result};

bitflags! {
    /// Scan and read options. Bit values match the boards' C interface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScanOptions: u32 {
        /// Return raw ADC codes instead of volts
        const NO_SCALE_DATA = 0x0001;
        /// Skip the calibration coefficients
        const NO_CALIBRATE_DATA = 0x0002;
        /// Pace samples from the external clock input
        const EXT_CLOCK = 0x0004;
        /// Hold the scan until the trigger input fires
        const EXT_TRIGGER = 0x0008;
        /// Run until stopped; samples-per-channel only sizes the buffer
        const CONTINUOUS = 0x0010;
    }
}

bitflags! {
    /// Scan status returned by reads. Bit values match the boards' C interface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ScanStatus: u16 {
        /// The device lost samples because it was not read fast enough
        const HW_OVERRUN = 0x0001;
        /// The host buffer filled and new samples were discarded
        const BUFFER_OVERRUN = 0x0002;
        /// The trigger condition has occurred
        const TRIGGERED = 0x0004;
        /// The acquisition is still active
        const RUNNING = 0x0008;
    }
}

impl ScanStatus {
    /// Either overrun bit is set.
    pub fn overrun(self) -> bool {
        self.intersects(Self::HW_OVERRUN | Self::BUFFER_OVERRUN)
    }
}

/// External trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TriggerMode {
    /// Start on a rising edge of TRIG
    #[default]
    RisingEdge = 0,
    /// Start on a falling edge of TRIG
    FallingEdge = 1,
    /// Start any time TRIG is high
    ActiveHigh = 2,
    /// Start any time TRIG is low
    ActiveLow = 3,
}

impl TriggerMode {
    /// Decode a raw mode value.
    pub fn from_raw(mode: u8) -> Result<Self> {
        match mode {
            0 => Ok(Self::RisingEdge),
            1 => Ok(Self::FallingEdge),
            2 => Ok(Self::ActiveHigh),
            3 => Ok(Self::ActiveLow),
            other => Err(HatError::bad_parameter(format!("invalid trigger mode {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_bits() {
        assert_eq!(ScanOptions::NO_SCALE_DATA.bits(), 0x01);
        assert_eq!(ScanOptions::CONTINUOUS.bits(), 0x10);
        assert_eq!(ScanStatus::RUNNING.bits(), 0x08);
        assert_eq!(
            ScanStatus::from_bits_truncate(0x0f),
            ScanStatus::all()
        );
    }

    #[test]
    fn test_overrun_helper() {
        assert!(!ScanStatus::RUNNING.overrun());
        assert!((ScanStatus::RUNNING | ScanStatus::BUFFER_OVERRUN).overrun());
    }

    #[test]
    fn test_trigger_mode_from_raw() {
        assert_eq!(TriggerMode::from_raw(3).unwrap(), TriggerMode::ActiveLow);
        assert!(TriggerMode::from_raw(4).unwrap_err().is_bad_parameter());
    }
}
