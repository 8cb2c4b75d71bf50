//! Raw code to sample conversion.

use crate::calibration::Coefficient;
use crate::scan::ScanOptions;

/// Converter input span.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputRange {
    /// Number of codes (2^bits)
    pub codes: u32,
    /// Voltage at code 0
    pub min_voltage: f64,
    /// Voltage one LSB above the top code
    pub max_voltage: f64,
}

impl InputRange {
    /// Volts per code.
    pub fn lsb(&self) -> f64 {
        (self.max_voltage - self.min_voltage) / f64::from(self.codes)
    }
}

/// Per-scan converter: calibration then scaling, each optional.
#[derive(Debug, Clone)]
pub struct SampleConverter {
    coefficients: Vec<Coefficient>,
    calibrate: bool,
    scale: bool,
    range: InputRange,
}

impl SampleConverter {
    /// Build for the scanned channels, in scan order.
    pub fn new(coefficients: Vec<Coefficient>, options: ScanOptions, range: InputRange) -> Self {
        Self {
            coefficients,
            calibrate: !options.contains(ScanOptions::NO_CALIBRATE_DATA),
            scale: !options.contains(ScanOptions::NO_SCALE_DATA),
            range,
        }
    }

    /// Channels per scan.
    pub fn channels(&self) -> usize {
        self.coefficients.len()
    }

    /// Convert one code taken from scan position `index`.
    #[inline]
    pub fn convert(&self, index: usize, code: u32) -> f64 {
        let mut value = f64::from(code);
        if self.calibrate {
            value = self.coefficients[index].apply(value);
        }
        if self.scale {
            value = value * self.range.lsb() + self.range.min_voltage;
        }
        value
    }

    /// Convert a run of codes whose first element is at scan position `start_index`.
    pub fn convert_into(&self, codes: &[u16], start_index: usize, out: &mut Vec<f64>) {
        let channels = self.channels();
        out.reserve(codes.len());
        out.extend(
            codes
                .iter()
                .enumerate()
                .map(|(i, &code)| self.convert((start_index + i) % channels, u32::from(code))),
        );
    }
}
