//! Factory data and per-channel calibration coefficients.
//!
//! Each board ships with a serial number, a calibration date and one
//! slope/offset pair per analog channel, stored in its ID EEPROM. Drivers load
//! them on the first open of a board. Writes through
//! [`CalibrationTable::write`] are temporary and are replaced by the factory
//! values the next time the board is opened fresh.

use crate::error::{HatError, Result};

/// Serial number reported when a board has no factory data.
pub const DEFAULT_SERIAL: &str = "00000000";

/// Calibration date reported when a board has no factory data.
pub const DEFAULT_CALIBRATION_DATE: &str = "1970-01-01";

/// Linear correction applied as `raw * slope + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficient {
    /// Gain correction
    pub slope: f64,
    /// Offset correction, in raw units
    pub offset: f64,
}

impl Coefficient {
    /// Create a coefficient.
    pub fn new(slope: f64, offset: f64) -> Self {
        Self { slope, offset }
    }

    /// Apply to a raw value.
    #[inline]
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.slope + self.offset
    }
}

impl Default for Coefficient {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
        }
    }
}

/// Factory record read from a board's EEPROM.
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryData {
    /// Board serial number
    pub serial: String,
    /// Calibration date, `YYYY-MM-DD`
    pub calibration_date: String,
    /// One coefficient per analog channel
    pub coefficients: Vec<Coefficient>,
}

impl FactoryData {
    /// Defaults for a board with `channels` analog channels and no stored record.
    pub fn defaults(channels: usize) -> Self {
        Self {
            serial: DEFAULT_SERIAL.to_string(),
            calibration_date: DEFAULT_CALIBRATION_DATE.to_string(),
            coefficients: vec![Coefficient::default(); channels],
        }
    }
}

/// Active calibration for one open board.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    factory: FactoryData,
    active: Vec<Coefficient>,
}

impl CalibrationTable {
    /// Build from the EEPROM record, padding or truncating to `channels`.
    pub fn from_factory(factory: Option<FactoryData>, channels: usize) -> Self {
        let mut factory = factory.unwrap_or_else(|| FactoryData::defaults(channels));
        factory.coefficients.resize(channels, Coefficient::default());
        let active = factory.coefficients.clone();
        Self { factory, active }
    }

    /// Number of channels covered.
    pub fn channels(&self) -> usize {
        self.active.len()
    }

    /// Current coefficient for a channel.
    pub fn read(&self, channel: usize) -> Result<Coefficient> {
        self.active
            .get(channel)
            .copied()
            .ok_or_else(|| self.bad_channel(channel))
    }

    /// Replace a channel's coefficient until the board is next opened fresh.
    pub fn write(&mut self, channel: usize, coefficient: Coefficient) -> Result<()> {
        if !coefficient.slope.is_finite() || !coefficient.offset.is_finite() {
            return Err(HatError::bad_parameter(format!(
                "calibration coefficient must be finite, got {coefficient:?}"
            )));
        }
        if channel >= self.active.len() {
            return Err(self.bad_channel(channel));
        }
        self.active[channel] = coefficient;
        Ok(())
    }

    /// Snapshot of all active coefficients.
    pub fn coefficients(&self) -> Vec<Coefficient> {
        self.active.clone()
    }

    /// Restore factory values.
    pub fn reset(&mut self) {
        self.active = self.factory.coefficients.clone();
    }

    /// Board serial number.
    pub fn serial(&self) -> &str {
        &self.factory.serial
    }

    /// Factory calibration date.
    pub fn calibration_date(&self) -> &str {
        &self.factory.calibration_date
    }

    fn bad_channel(&self, channel: usize) -> HatError {
        HatError::bad_parameter(format!(
            "channel {channel} out of range 0-{}",
            self.active.len().saturating_sub(1)
        ))
    }
}
