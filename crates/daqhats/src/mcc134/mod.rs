//! MCC 134 four-channel thermocouple input board.
//!
//! Each channel is a differential pair on a 24-bit ADC. A background
//! [`cjc::CjcMonitor`] keeps the cold junction temperature current while the
//! board is open. [`Mcc134::t_in_read`] adds the cold junction voltage to the
//! measured one and linearizes with the [`its90`] reference functions for the
//! channel's thermocouple type.

mod adc;
pub(crate) mod cjc;
pub mod its90;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use crate::calibration::{CalibrationTable, Coefficient};
use crate::config::CjcConfig;
use crate::error::{HatError, Result};
use crate::info::HatId;
use crate::registry::{DeviceRegistry, HatDevice};
use crate::scan::ScanOptions;
use crate::transport::BusTransport;

pub use adc::AdcTiming;

use adc::Adc;
use cjc::{CjcMonitor, CjcSensor};

/// Thermocouple input channels.
pub const NUM_CHANNELS: usize = 4;

/// Code the ADC reports for an open thermocouple.
pub const OPEN_TC_CODE: i32 = 0x7F_FFFF;

/// Voltage reported for an open thermocouple.
pub const OPEN_TC_VOLTAGE: f64 = 0.128;

/// Temperature reported for an open thermocouple.
pub const OPEN_TC_VALUE: f64 = -9999.0;

/// Temperature reported when the input is outside the measurable range.
pub const OVERRANGE_TC_VALUE: f64 = -8888.0;

/// Input limits for temperature reads, volts.
const POS_OVERRANGE_VOLTS: f64 = 0.084;
const NEG_OVERRANGE_VOLTS: f64 = -0.012;

/// Full-scale input, volts (2.048 V reference over gain 16).
pub const FULL_SCALE: f64 = 2.048 / 16.0;

const CODE_SPAN: f64 = 8_388_608.0;

/// Positive/negative ADC input pins per channel.
const CHANNEL_PINS: [(u8, u8); NUM_CHANNELS] = [(0, 1), (4, 5), (6, 7), (2, 3)];

/// Sensor-to-terminal temperature difference, °C.
const CJC_OFFSETS: [f64; NUM_CHANNELS] = [0.7; NUM_CHANNELS];

/// Thermocouple type assigned to a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TcType {
    /// Type J
    J = 0,
    /// Type K
    K = 1,
    /// Type T
    T = 2,
    /// Type E
    E = 3,
    /// Type R
    R = 4,
    /// Type S
    S = 5,
    /// Type B
    B = 6,
    /// Type N
    N = 7,
    /// Channel unused
    #[default]
    Disabled = 0xFF,
}

impl TcType {
    /// Decode a wire value.
    pub fn from_raw(raw: u8) -> Result<Self> {
        Ok(match raw {
            0 => Self::J,
            1 => Self::K,
            2 => Self::T,
            3 => Self::E,
            4 => Self::R,
            5 => Self::S,
            6 => Self::B,
            7 => Self::N,
            0xFF => Self::Disabled,
            other => {
                return Err(HatError::bad_parameter(format!(
                    "unknown thermocouple type {other}"
                )))
            }
        })
    }
}

/// State of one open MCC 134.
pub struct Mcc134Device {
    adc: Adc,
    cjc: CjcMonitor,
    calibration: RwLock<CalibrationTable>,
    tc_types: Mutex<[TcType; NUM_CHANNELS]>,
    last_open: Mutex<[bool; NUM_CHANNELS]>,
}

impl HatDevice for Mcc134Device {
    fn shutdown(&self) {
        self.cjc.shutdown();
    }
}

/// Driver for all MCC 134 boards on a stack.
pub struct Mcc134 {
    transport: Arc<BusTransport>,
    cjc_settings: CjcConfig,
    timing: AdcTiming,
    registry: DeviceRegistry<Mcc134Device>,
}

impl std::fmt::Debug for Mcc134 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcc134")
            .field("open", &self.registry.open_addresses())
            .field("timing", &self.timing)
            .finish()
    }
}

fn check_channel(channel: u8) -> Result<usize> {
    let index = usize::from(channel);
    if index >= NUM_CHANNELS {
        return Err(HatError::bad_parameter(format!(
            "channel {channel} out of range 0-{}",
            NUM_CHANNELS - 1
        )));
    }
    Ok(index)
}

impl Mcc134 {
    /// Create a driver on `transport`.
    pub fn new(transport: Arc<BusTransport>, cjc_settings: CjcConfig, timing: AdcTiming) -> Self {
        Self {
            transport,
            cjc_settings,
            timing,
            registry: DeviceRegistry::new(),
        }
    }

    /// Thermocouple channel count.
    pub fn a_in_num_channels() -> usize {
        NUM_CHANNELS
    }

    /// Open the board at `address`.
    ///
    /// The first open configures the CJC sensor, starts the CJC monitor and
    /// runs an ADC self offset calibration, which takes about 0.85 s with
    /// default timing.
    pub fn open(&self, address: u8) -> Result<()> {
        self.registry.open_with(address, || {
            let factory = match self.transport.read_eeprom(address)? {
                Some(eeprom) if eeprom.id != HatId::Mcc134.raw() => {
                    return Err(HatError::InvalidDevice {
                        address,
                        expected: HatId::Mcc134.raw(),
                        found: eeprom.id,
                    });
                }
                Some(eeprom) => eeprom.factory,
                None => {
                    warn!(address, "No EEPROM data, using default calibration");
                    None
                }
            };

            let sensor = CjcSensor::new(Arc::clone(&self.transport), address);
            sensor.init()?;
            // dropping the monitor on a later failure stops its thread
            let cjc = CjcMonitor::spawn(address, sensor, &self.cjc_settings)?;

            let adc = Adc::new(Arc::clone(&self.transport), address, self.timing);
            adc.init()?;
            adc.calibrate_self_offset()?;

            info!(address, "MCC 134 ready");
            Ok(Mcc134Device {
                adc,
                cjc,
                calibration: RwLock::new(CalibrationTable::from_factory(factory, NUM_CHANNELS)),
                tc_types: Mutex::new([TcType::default(); NUM_CHANNELS]),
                last_open: Mutex::new([false; NUM_CHANNELS]),
            })
        })?;
        Ok(())
    }

    /// Whether `address` is open.
    pub fn is_open(&self, address: u8) -> bool {
        self.registry.is_open(address)
    }

    /// Close one handle. The last close stops the CJC monitor.
    pub fn close(&self, address: u8) -> Result<()> {
        self.registry.close(address)
    }

    /// Serial number.
    pub fn serial(&self, address: u8) -> Result<String> {
        let dev = self.registry.get(address)?;
        let serial = dev.calibration.read().serial().to_string();
        Ok(serial)
    }

    /// Factory calibration date, `YYYY-MM-DD`.
    pub fn calibration_date(&self, address: u8) -> Result<String> {
        let dev = self.registry.get(address)?;
        let date = dev.calibration.read().calibration_date().to_string();
        Ok(date)
    }

    /// Active calibration coefficient for a channel.
    pub fn calibration_coefficient_read(&self, address: u8, channel: u8) -> Result<Coefficient> {
        let dev = self.registry.get(address)?;
        let coefficient = dev.calibration.read().read(usize::from(channel))?;
        Ok(coefficient)
    }

    /// Replace a channel's coefficient until the board is next opened fresh.
    pub fn calibration_coefficient_write(
        &self,
        address: u8,
        channel: u8,
        coefficient: Coefficient,
    ) -> Result<()> {
        let dev = self.registry.get(address)?;
        dev.calibration.write().write(usize::from(channel), coefficient)?;
        Ok(())
    }

    /// Rerun the ADC offset calibration, for example after a large
    /// ambient temperature change.
    pub fn self_offset_correction(&self, address: u8) -> Result<()> {
        self.registry.get(address)?.adc.calibrate_self_offset()
    }

    /// Thermocouple type of a channel.
    pub fn tc_type_read(&self, address: u8, channel: u8) -> Result<TcType> {
        let index = check_channel(channel)?;
        let dev = self.registry.get(address)?;
        let tc_type = dev.tc_types.lock()[index];
        Ok(tc_type)
    }

    /// Set a channel's thermocouple type.
    pub fn tc_type_write(&self, address: u8, channel: u8, tc_type: TcType) -> Result<()> {
        let index = check_channel(channel)?;
        let dev = self.registry.get(address)?;
        dev.tc_types.lock()[index] = tc_type;
        debug!(address, channel, ?tc_type, "Thermocouple type set");
        Ok(())
    }

    /// Read one channel's thermocouple voltage.
    ///
    /// Returns volts, or the calibrated code with `NO_SCALE_DATA`. An open
    /// thermocouple reads [`OPEN_TC_VOLTAGE`] (or [`OPEN_TC_CODE`] unscaled)
    /// and is not calibrated.
    pub fn a_in_read(&self, address: u8, channel: u8, options: ScanOptions) -> Result<f64> {
        let index = check_channel(channel)?;
        let dev = self.registry.get(address)?;
        let (hi, lo) = CHANNEL_PINS[index];

        // the input filter needs a settling conversion after an open circuit
        let was_open = dev.last_open.lock()[index];
        if was_open {
            dev.adc.read_code(hi, lo)?;
        }
        let code = dev.adc.read_code(hi, lo)?;

        if code == OPEN_TC_CODE {
            dev.last_open.lock()[index] = true;
            if !was_open {
                warn!(address, channel, "Open thermocouple");
            }
            return Ok(if options.contains(ScanOptions::NO_SCALE_DATA) {
                f64::from(OPEN_TC_CODE)
            } else {
                OPEN_TC_VOLTAGE
            });
        }
        dev.last_open.lock()[index] = false;

        let mut value = f64::from(code);
        if !options.contains(ScanOptions::NO_CALIBRATE_DATA) {
            value = dev.calibration.read().read(index)?.apply(value);
        }
        if !options.contains(ScanOptions::NO_SCALE_DATA) {
            value *= FULL_SCALE / CODE_SPAN;
        }
        Ok(value)
    }

    /// Read a channel's temperature, °C.
    ///
    /// Waits for the first CJC sample like [`Mcc134::cjc_read`]. Returns
    /// [`OPEN_TC_VALUE`] for an open thermocouple and [`OVERRANGE_TC_VALUE`]
    /// when the input or the compensated voltage is outside what the
    /// channel's type can represent. Fails with `BadParameter` on a disabled
    /// channel.
    pub fn t_in_read(&self, address: u8, channel: u8) -> Result<f64> {
        let index = check_channel(channel)?;
        let dev = self.registry.get(address)?;
        let tc_type = dev.tc_types.lock()[index];
        if tc_type == TcType::Disabled {
            return Err(HatError::bad_parameter(format!(
                "channel {channel} has no thermocouple type set"
            )));
        }

        let cjc = dev.cjc.temperature()? - CJC_OFFSETS[index];
        let volts = self.a_in_read(address, channel, ScanOptions::empty())?;

        if volts == OPEN_TC_VOLTAGE {
            return Ok(OPEN_TC_VALUE);
        }
        if !(NEG_OVERRANGE_VOLTS..=POS_OVERRANGE_VOLTS).contains(&volts) {
            debug!(address, channel, volts, "Thermocouple input overrange");
            return Ok(OVERRANGE_TC_VALUE);
        }

        let celsius = its90::voltage(tc_type, cjc)
            .and_then(|cjc_mv| its90::temperature(tc_type, volts * 1000.0 + cjc_mv))
            .unwrap_or(OVERRANGE_TC_VALUE);
        trace!(address, channel, ?tc_type, cjc, volts, celsius, "Temperature");
        Ok(celsius)
    }

    /// Cold junction temperature at a channel's terminal, °C.
    ///
    /// Waits for the first CJC sample after open, bounded by the configured
    /// ready timeout.
    pub fn cjc_read(&self, address: u8, channel: u8) -> Result<f64> {
        let index = check_channel(channel)?;
        let dev = self.registry.get(address)?;
        Ok(dev.cjc.temperature()? - CJC_OFFSETS[index])
    }
}
