//! MCC 118 eight-channel voltage input board.
//!
//! Single conversions and hardware-paced scans both go through the board's
//! microcontroller (see [`protocol`]). Scans run on the shared
//! [`ScanEngine`](crate::scan::ScanEngine); this module supplies the device
//! side as a [`ScanSource`] and the code-to-volts conversion.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use daqhats::config::HatConfig;
//! use daqhats::mcc118::Mcc118;
//! use daqhats::scan::ScanOptions;
//! use daqhats::sim::SimulatedStack;
//! use daqhats::transport::BusTransport;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = HatConfig::default();
//! let stack = Arc::new(SimulatedStack::new());
//! stack.add_mcc118(0);
//! let transport = Arc::new(BusTransport::new(stack, &config.bus));
//!
//! let board = Mcc118::new(transport, config.scan.clone());
//! board.open(0)?;
//! let volts = board.a_in_read(0, 3, ScanOptions::empty())?;
//! println!("channel 3: {volts:.4} V");
//! board.close(0)?;
//! # Ok(())
//! # }
//! ```

pub mod protocol;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::calibration::{CalibrationTable, Coefficient};
use crate::config::ScanConfig;
use crate::error::{HatError, Result};
use crate::info::HatId;
use crate::registry::{DeviceRegistry, HatDevice};
use crate::scan::{
    InputRange, ReadCount, ReadTimeout, SampleConverter, ScanEngine, ScanOptions, ScanRead,
    ScanRequest, ScanSource, ScanState, SourceStatus, TriggerMode,
};
use crate::transport::{Bus, BusTransport};

use protocol::{Command, IdReply, ScanStart, ScanStatusReply, REPLY_HEADER_LEN};

/// Analog input channels.
pub const NUM_CHANNELS: usize = 8;

/// Maximum aggregate sample rate, samples per second.
pub const MAX_SAMPLE_RATE: f64 = 100_000.0;

/// Scan clock source frequency.
pub const CLOCK_TIMEBASE: f64 = 16_000_000.0;

/// ±10 V over 12 bits.
pub const INPUT_RANGE: InputRange = InputRange {
    codes: 4096,
    min_voltage: -10.0,
    max_voltage: 10.0,
};

/// Largest FIFO read per command.
///
/// The reply length field counts bytes in a `u16`, two bytes per code.
const MAX_CODES_PER_READ: usize = u16::MAX as usize / 2;

/// Firmware and bootloader versions, BCD (`0x0103` is 1.03).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// Application firmware
    pub version: u16,
    /// Bootloader
    pub bootloader: u16,
}

/// CLK pin test modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClockTestMode {
    /// Input
    Input = 0,
    /// Drive low
    OutputLow = 1,
    /// Drive high
    OutputHigh = 2,
    /// 1 kHz square wave
    SquareWave = 3,
}

/// Clock divisor for the requested per-channel rate.
pub fn clock_divisor(channel_count: usize, sample_rate: f64) -> u32 {
    let ticks = (CLOCK_TIMEBASE / (sample_rate * channel_count as f64)).round() - 1.0;
    ticks.clamp(0.0, f64::from(u32::MAX)) as u32
}

/// Per-channel rate the board will actually run at for a requested rate.
pub fn a_in_scan_actual_rate(channel_count: usize, sample_rate: f64) -> Result<f64> {
    if channel_count == 0 || channel_count > NUM_CHANNELS {
        return Err(HatError::bad_parameter(format!(
            "channel count {channel_count} out of range 1-{NUM_CHANNELS}"
        )));
    }
    if !sample_rate.is_finite()
        || sample_rate <= 0.0
        || sample_rate * channel_count as f64 > MAX_SAMPLE_RATE
    {
        return Err(HatError::bad_parameter(format!(
            "{sample_rate} S/s on {channel_count} channels is not achievable"
        )));
    }
    let divisor = clock_divisor(channel_count, sample_rate);
    Ok(CLOCK_TIMEBASE / ((f64::from(divisor) + 1.0) * channel_count as f64))
}

/// Command channel to one board.
#[derive(Debug)]
struct Link {
    transport: Arc<BusTransport>,
    address: u8,
}

impl Link {
    fn command(&self, command: Command, payload: &[u8], reply_len: usize) -> Result<Vec<u8>> {
        let frame = protocol::encode_request(command, payload);
        let rx = self
            .transport
            .transfer(self.address, Bus::Spi0, &frame, REPLY_HEADER_LEN + reply_len)?;
        protocol::decode_reply(command, &rx, reply_len).map(<[u8]>::to_vec)
    }
}

impl ScanSource for Link {
    fn start(&self, request: &ScanRequest) -> Result<()> {
        let device_options =
            request.options & (ScanOptions::EXT_CLOCK | ScanOptions::EXT_TRIGGER | ScanOptions::CONTINUOUS);
        let clock_divisor = if request.options.contains(ScanOptions::EXT_CLOCK) {
            0
        } else {
            clock_divisor(request.channel_count(), request.sample_rate)
        };
        let start = ScanStart {
            channel_mask: request.channel_mask() as u8,
            samples_per_channel: if request.is_continuous() {
                0
            } else {
                request.samples_per_channel
            },
            clock_divisor,
            options: device_options.bits() as u8,
        };
        debug!(address = self.address, ?start, "Sending scan start");
        self.command(Command::AInScanStart, &start.encode(), 0)?;
        Ok(())
    }

    fn status(&self) -> Result<SourceStatus> {
        let reply = self.command(Command::AInScanStatus, &[], ScanStatusReply::LEN)?;
        let status = ScanStatusReply::decode(&reply)?;
        Ok(SourceStatus {
            running: status.running,
            hw_overrun: status.hw_overrun,
            triggered: status.triggered,
            available: usize::from(status.available),
            max_read: usize::from(status.max_read),
        })
    }

    fn read_codes(&self, count: usize) -> Result<Vec<u16>> {
        let count = count.min(MAX_CODES_PER_READ);
        let reply = self.command(
            Command::AInScanData,
            &(count as u16).to_le_bytes(),
            count * 2,
        )?;
        Ok(protocol::decode_codes(&reply))
    }

    fn stop(&self) -> Result<()> {
        self.command(Command::AInScanStop, &[], 0)?;
        Ok(())
    }
}

/// State of one open MCC 118.
pub struct Mcc118Device {
    link: Arc<Link>,
    firmware: FirmwareVersion,
    calibration: RwLock<CalibrationTable>,
    engine: ScanEngine,
}

impl HatDevice for Mcc118Device {
    fn shutdown(&self) {
        // cleanup never fails; it only joins the thread
        let _ = self.engine.cleanup();
    }
}

/// Driver for all MCC 118 boards on a stack.
pub struct Mcc118 {
    transport: Arc<BusTransport>,
    settings: ScanConfig,
    registry: DeviceRegistry<Mcc118Device>,
}

impl std::fmt::Debug for Mcc118 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mcc118")
            .field("open", &self.registry.open_addresses())
            .finish()
    }
}

impl Mcc118 {
    /// Create a driver on `transport`.
    pub fn new(transport: Arc<BusTransport>, settings: ScanConfig) -> Self {
        Self {
            transport,
            settings,
            registry: DeviceRegistry::new(),
        }
    }

    /// Analog input channel count.
    pub fn a_in_num_channels() -> usize {
        NUM_CHANNELS
    }

    /// Open the board at `address`.
    ///
    /// The first open loads factory calibration and queries the firmware.
    /// Later opens share that state.
    pub fn open(&self, address: u8) -> Result<()> {
        self.registry.open_with(address, || {
            let eeprom = self.transport.read_eeprom(address)?;
            let factory = match eeprom {
                Some(eeprom) if eeprom.id != HatId::Mcc118.raw() => {
                    return Err(HatError::InvalidDevice {
                        address,
                        expected: HatId::Mcc118.raw(),
                        found: eeprom.id,
                    });
                }
                Some(eeprom) => eeprom.factory,
                None => None,
            };

            let link = Arc::new(Link {
                transport: Arc::clone(&self.transport),
                address,
            });
            let id = IdReply::decode(&link.command(Command::Id, &[], IdReply::LEN)?)?;
            if id.id != HatId::Mcc118.raw() {
                return Err(HatError::InvalidDevice {
                    address,
                    expected: HatId::Mcc118.raw(),
                    found: id.id,
                });
            }

            info!(
                address,
                firmware = format!("{:x}.{:02x}", id.firmware >> 8, id.firmware & 0xff),
                "MCC 118 ready"
            );
            Ok(Mcc118Device {
                link,
                firmware: FirmwareVersion {
                    version: id.firmware,
                    bootloader: id.bootloader,
                },
                calibration: RwLock::new(CalibrationTable::from_factory(factory, NUM_CHANNELS)),
                engine: ScanEngine::new(address, self.settings.clone()),
            })
        })?;
        Ok(())
    }

    /// Whether `address` is open.
    pub fn is_open(&self, address: u8) -> bool {
        self.registry.is_open(address)
    }

    /// Close one handle. The last close stops and frees any scan.
    pub fn close(&self, address: u8) -> Result<()> {
        self.registry.close(address)
    }

    /// Blink the board LED `count` times (0 blinks until the next command).
    pub fn blink_led(&self, address: u8, count: u8) -> Result<()> {
        let dev = self.registry.get(address)?;
        dev.link.command(Command::Blink, &[count], 0)?;
        Ok(())
    }

    /// Firmware and bootloader versions read at open.
    pub fn firmware_version(&self, address: u8) -> Result<FirmwareVersion> {
        Ok(self.registry.get(address)?.firmware)
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
    ///
    /// Fails with `Busy` while a scan exists.
    pub fn calibration_coefficient_write(
        &self,
        address: u8,
        channel: u8,
        coefficient: Coefficient,
    ) -> Result<()> {
        let dev = self.registry.get(address)?;
        if dev.engine.is_allocated() {
            return Err(HatError::busy("cannot change calibration while a scan exists"));
        }
        dev.calibration.write().write(usize::from(channel), coefficient)?;
        Ok(())
    }

    /// Read one channel.
    ///
    /// Returns volts, or codes with `NO_SCALE_DATA`. Fails with `Busy`
    /// while a scan exists on the board.
    pub fn a_in_read(&self, address: u8, channel: u8, options: ScanOptions) -> Result<f64> {
        let dev = self.registry.get(address)?;
        if usize::from(channel) >= NUM_CHANNELS {
            return Err(HatError::bad_parameter(format!(
                "channel {channel} out of range 0-{}",
                NUM_CHANNELS - 1
            )));
        }
        if dev.engine.is_allocated() {
            return Err(HatError::busy("a scan is active on this board"));
        }

        let reply = dev.link.command(Command::AIn, &[channel], 2)?;
        let code = u16::from_le_bytes([reply[0], reply[1]]);
        let coefficient = dev.calibration.read().read(usize::from(channel))?;
        let converter = SampleConverter::new(vec![coefficient], options, INPUT_RANGE);
        Ok(converter.convert(0, u32::from(code)))
    }

    /// Set the external trigger condition used with `EXT_TRIGGER`.
    pub fn trigger_mode(&self, address: u8, mode: TriggerMode) -> Result<()> {
        let dev = self.registry.get(address)?;
        if dev.engine.is_allocated() {
            return Err(HatError::busy("cannot change trigger mode while a scan exists"));
        }
        dev.link.command(Command::TriggerConfig, &[mode as u8], 0)?;
        Ok(())
    }

    /// Per-channel rate the board will actually run at.
    pub fn a_in_scan_actual_rate(channel_count: usize, sample_rate: f64) -> Result<f64> {
        a_in_scan_actual_rate(channel_count, sample_rate)
    }

    /// Start a hardware-paced scan.
    ///
    /// `samples_per_channel` sizes a finite scan, or sets a floor on the
    /// buffer size with `CONTINUOUS`. With `EXT_CLOCK`, `sample_rate` is the
    /// expected clock rate (0 if unknown).
    pub fn a_in_scan_start(
        &self,
        address: u8,
        channel_mask: u32,
        samples_per_channel: u32,
        sample_rate: f64,
        options: ScanOptions,
    ) -> Result<()> {
        let dev = self.registry.get(address)?;
        let request = ScanRequest::from_mask(
            channel_mask,
            NUM_CHANNELS,
            samples_per_channel,
            sample_rate,
            options,
        )?;
        if request.aggregate_rate() > MAX_SAMPLE_RATE {
            return Err(HatError::bad_parameter(format!(
                "{} channels at {sample_rate} S/s exceeds {MAX_SAMPLE_RATE} S/s",
                request.channel_count()
            )));
        }

        let coefficients = {
            let table = dev.calibration.read();
            request
                .channels
                .iter()
                .map(|&ch| table.read(usize::from(ch)))
                .collect::<Result<Vec<_>>>()?
        };
        let converter = SampleConverter::new(coefficients, options, INPUT_RANGE);
        let source: Arc<dyn ScanSource> = dev.link.clone();
        dev.engine.start(&request, source, converter)
    }

    /// Scan buffer size in samples.
    pub fn a_in_scan_buffer_size(&self, address: u8) -> Result<usize> {
        self.registry.get(address)?.engine.buffer_size()
    }

    /// Read scan status and data into `out`.
    pub fn a_in_scan_read(
        &self,
        address: u8,
        count: ReadCount,
        timeout: ReadTimeout,
        out: &mut [f64],
    ) -> Result<ScanRead> {
        self.registry.get(address)?.engine.read(count, timeout, out)
    }

    /// Like [`Mcc118::a_in_scan_read`], allocating the output.
    pub fn a_in_scan_read_vec(
        &self,
        address: u8,
        count: ReadCount,
        timeout: ReadTimeout,
    ) -> Result<(ScanRead, Vec<f64>)> {
        let dev = self.registry.get(address)?;
        let channels = dev.engine.channel_count();
        let len = match count {
            ReadCount::StatusOnly => 0,
            ReadCount::Available => dev.engine.buffer_size()?,
            ReadCount::Exactly(n) => n.saturating_mul(channels),
        };
        let mut out = Vec::new();
        out.try_reserve_exact(len)?;
        out.resize(len, 0.0);
        let read = dev.engine.read(count, timeout, &mut out)?;
        out.truncate(read.samples_per_channel * channels);
        Ok((read, out))
    }

    /// Stop the scan. Data already buffered stays readable.
    pub fn a_in_scan_stop(&self, address: u8) -> Result<()> {
        self.registry.get(address)?.engine.stop()
    }

    /// Free the scan after it has stopped and been read.
    pub fn a_in_scan_cleanup(&self, address: u8) -> Result<()> {
        self.registry.get(address)?.engine.cleanup()
    }

    /// Channels in the current scan, 0 without one.
    pub fn a_in_scan_channel_count(&self, address: u8) -> Result<usize> {
        Ok(self.registry.get(address)?.engine.channel_count())
    }

    /// Scan lifecycle state.
    pub fn scan_state(&self, address: u8) -> Result<ScanState> {
        Ok(self.registry.get(address)?.engine.state())
    }

    /// Set the CLK pin mode and return the pin value.
    pub fn test_clock(&self, address: u8, mode: ClockTestMode) -> Result<u8> {
        let dev = self.registry.get(address)?;
        if dev.engine.is_allocated() {
            return Err(HatError::busy("cannot test CLK while a scan exists"));
        }
        let reply = dev.link.command(Command::TestClock, &[mode as u8], 1)?;
        Ok(reply[0])
    }

    /// TRIG pin state.
    pub fn test_trigger(&self, address: u8) -> Result<bool> {
        let dev = self.registry.get(address)?;
        let reply = dev.link.command(Command::TestTrigger, &[], 1)?;
        Ok(reply[0] != 0)
    }
}
