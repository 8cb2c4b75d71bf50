//! MCC 152 two-channel analog output and eight-channel digital I/O board.

mod dac;
mod dio;

use std::sync::Arc;

use tracing::{debug, info};

use crate::calibration::DEFAULT_SERIAL;
use crate::error::{HatError, Result};
use crate::info::HatId;
use crate::registry::{DeviceRegistry, HatDevice};
use crate::scan::ScanOptions;
use crate::transport::BusTransport;

pub use dac::MAX_CODE;
pub use dio::{DioChannel, DioMask, DioRegister, NUM_DIO_CHANNELS};

use dac::Dac;
use dio::Expander;

/// Analog output channels.
pub const NUM_AO_CHANNELS: usize = 2;

/// Output span, volts.
pub const VOLTAGE_RANGE: f64 = 5.0;

/// Convert a voltage or raw code to a DAC code.
pub fn output_code(value: f64, options: ScanOptions) -> Result<u16> {
    if options.contains(ScanOptions::NO_SCALE_DATA) {
        if !(0.0..=f64::from(MAX_CODE)).contains(&value) {
            return Err(HatError::bad_parameter(format!(
                "code {value} out of range 0-{MAX_CODE}"
            )));
        }
        return Ok(value.round() as u16);
    }
    if !(0.0..=VOLTAGE_RANGE).contains(&value) {
        return Err(HatError::bad_parameter(format!(
            "{value} V out of range 0-{VOLTAGE_RANGE} V"
        )));
    }
    let code = value * (f64::from(MAX_CODE) + 1.0) / VOLTAGE_RANGE;
    Ok((code as u16).min(MAX_CODE))
}

/// State of one open MCC 152.
pub struct Mcc152Device {
    serial: String,
    dac: Dac,
    dio: Expander,
}

impl HatDevice for Mcc152Device {
    fn shutdown(&self) {}
}

/// Driver for all MCC 152 boards on a stack.
pub struct Mcc152 {
    transport: Arc<BusTransport>,
    registry: DeviceRegistry<Mcc152Device>,
}

impl std::fmt::Debug for Mcc152 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcc152")
            .field("open", &self.registry.open_addresses())
            .finish()
    }
}

impl Mcc152 {
    /// Create a driver on `transport`.
    pub fn new(transport: Arc<BusTransport>) -> Self {
        Self {
            transport,
            registry: DeviceRegistry::new(),
        }
    }

    /// Analog output channel count.
    pub fn a_out_num_channels() -> usize {
        NUM_AO_CHANNELS
    }

    /// Digital I/O channel count.
    pub fn dio_num_channels() -> usize {
        NUM_DIO_CHANNELS
    }

    /// Open the board at `address`.
    ///
    /// The first open selects the DAC's internal reference and loads the
    /// DIO register cache. Output states are left as they are.
    pub fn open(&self, address: u8) -> Result<()> {
        self.registry.open_with(address, || {
            let serial = match self.transport.read_eeprom(address)? {
                Some(eeprom) if eeprom.id != HatId::Mcc152.raw() => {
                    return Err(HatError::InvalidDevice {
                        address,
                        expected: HatId::Mcc152.raw(),
                        found: eeprom.id,
                    });
                }
                Some(eeprom) => eeprom.factory.map(|f| f.serial),
                None => None,
            };

            let dac = Dac::new(Arc::clone(&self.transport), address);
            dac.init()?;
            let dio = Expander::open(Arc::clone(&self.transport), address)?;

            info!(address, "MCC 152 ready");
            Ok(Mcc152Device {
                serial: serial.unwrap_or_else(|| DEFAULT_SERIAL.to_string()),
                dac,
                dio,
            })
        })?;
        Ok(())
    }

    /// Whether `address` is open.
    pub fn is_open(&self, address: u8) -> bool {
        self.registry.is_open(address)
    }

    /// Close one handle.
    pub fn close(&self, address: u8) -> Result<()> {
        self.registry.close(address)
    }

    /// Serial number.
    pub fn serial(&self, address: u8) -> Result<String> {
        Ok(self.registry.get(address)?.serial.clone())
    }

    /// Set one analog output, volts (0-5) or a code with `NO_SCALE_DATA`.
    pub fn a_out_write(&self, address: u8, channel: u8, options: ScanOptions, value: f64) -> Result<()> {
        let dev = self.registry.get(address)?;
        if usize::from(channel) >= NUM_AO_CHANNELS {
            return Err(HatError::bad_parameter(format!(
                "analog output {channel} out of range 0-{}",
                NUM_AO_CHANNELS - 1
            )));
        }
        let code = output_code(value, options)?;
        dev.dac.write(channel, code)
    }

    /// Set both analog outputs so they update together.
    pub fn a_out_write_all(&self, address: u8, options: ScanOptions, values: &[f64]) -> Result<()> {
        let dev = self.registry.get(address)?;
        let [a, b] = values else {
            return Err(HatError::bad_parameter(format!(
                "expected {NUM_AO_CHANNELS} values, got {}",
                values.len()
            )));
        };
        let code_a = output_code(*a, options)?;
        let code_b = output_code(*b, options)?;
        debug!(address, code_a, code_b, "Writing both outputs");
        dev.dac.write_both(code_a, code_b)
    }

    /// Return the DIO port to its power-on configuration: all inputs,
    /// pull-ups enabled, no inversion or latching, interrupts masked.
    pub fn dio_reset(&self, address: u8) -> Result<()> {
        self.registry.get(address)?.dio.reset()
    }

    /// Input levels.
    pub fn dio_input_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry.get(address)?.dio.read(DioRegister::Input, channel)
    }

    /// Set output latch values. Only channels configured as outputs drive.
    pub fn dio_output_write(&self, address: u8, channel: DioChannel, value: u8) -> Result<()> {
        self.registry
            .get(address)?
            .dio
            .write(DioRegister::Output, channel, value)
    }

    /// Output latch values.
    pub fn dio_output_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry.get(address)?.dio.read(DioRegister::Output, channel)
    }

    /// Set direction, 1 = input, 0 = output.
    pub fn dio_direction_write(&self, address: u8, channel: DioChannel, value: u8) -> Result<()> {
        self.registry
            .get(address)?
            .dio
            .write(DioRegister::Config, channel, value)
    }

    /// Direction.
    pub fn dio_direction_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry.get(address)?.dio.read(DioRegister::Config, channel)
    }

    /// Select pull-up (1) or pull-down (0).
    pub fn dio_pull_config_write(&self, address: u8, channel: DioChannel, value: u8) -> Result<()> {
        self.registry
            .get(address)?
            .dio
            .write(DioRegister::PullSelect, channel, value)
    }

    /// Pull resistor selection.
    pub fn dio_pull_config_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry
            .get(address)?
            .dio
            .read(DioRegister::PullSelect, channel)
    }

    /// Enable (1) or disable (0) pull resistors.
    pub fn dio_pull_enable_write(&self, address: u8, channel: DioChannel, value: u8) -> Result<()> {
        self.registry
            .get(address)?
            .dio
            .write(DioRegister::PullEnable, channel, value)
    }

    /// Pull resistor enables.
    pub fn dio_pull_enable_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry
            .get(address)?
            .dio
            .read(DioRegister::PullEnable, channel)
    }

    /// Invert input readings (1) or not (0).
    pub fn dio_input_invert_write(&self, address: u8, channel: DioChannel, value: u8) -> Result<()> {
        self.registry
            .get(address)?
            .dio
            .write(DioRegister::Polarity, channel, value)
    }

    /// Input inversion.
    pub fn dio_input_invert_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry
            .get(address)?
            .dio
            .read(DioRegister::Polarity, channel)
    }

    /// Latch inputs until read (1) or track them (0).
    pub fn dio_input_latch_write(&self, address: u8, channel: DioChannel, value: u8) -> Result<()> {
        self.registry
            .get(address)?
            .dio
            .write(DioRegister::InputLatch, channel, value)
    }

    /// Input latch enables.
    pub fn dio_input_latch_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry
            .get(address)?
            .dio
            .read(DioRegister::InputLatch, channel)
    }

    /// Set every output stage to push-pull (0) or open-drain (1).
    pub fn dio_output_type_write(&self, address: u8, value: u8) -> Result<()> {
        self.registry.get(address)?.dio.write(
            DioRegister::OutputConfig,
            DioChannel::All,
            u8::from(value != 0),
        )
    }

    /// Output stage type.
    pub fn dio_output_type_read(&self, address: u8) -> Result<u8> {
        self.registry
            .get(address)?
            .dio
            .read(DioRegister::OutputConfig, DioChannel::All)
    }

    /// Mask (1) or enable (0) input change interrupts.
    pub fn dio_interrupt_mask_write(&self, address: u8, channel: DioChannel, value: u8) -> Result<()> {
        self.registry
            .get(address)?
            .dio
            .write(DioRegister::InterruptMask, channel, value)
    }

    /// Interrupt mask.
    pub fn dio_interrupt_mask_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry
            .get(address)?
            .dio
            .read(DioRegister::InterruptMask, channel)
    }

    /// Channels with a pending input change interrupt.
    pub fn dio_interrupt_status_read(&self, address: u8, channel: DioChannel) -> Result<u8> {
        self.registry
            .get(address)?
            .dio
            .read(DioRegister::InterruptStatus, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_code_volts() {
        assert_eq!(output_code(0.0, ScanOptions::empty()).unwrap(), 0);
        assert_eq!(output_code(2.5, ScanOptions::empty()).unwrap(), 2048);
        assert_eq!(output_code(5.0, ScanOptions::empty()).unwrap(), MAX_CODE);
        assert!(output_code(5.01, ScanOptions::empty()).is_err());
        assert!(output_code(-0.1, ScanOptions::empty()).is_err());
    }

    #[test]
    fn test_output_code_raw() {
        let raw = ScanOptions::NO_SCALE_DATA;
        assert_eq!(output_code(4095.0, raw).unwrap(), 4095);
        assert_eq!(output_code(12.0, raw).unwrap(), 12);
        assert!(output_code(4096.0, raw).is_err());
        assert!(output_code(f64::NAN, raw).is_err());
    }
}
