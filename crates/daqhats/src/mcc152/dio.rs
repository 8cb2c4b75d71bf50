//! I/O expander access for the MCC 152 digital port.
//!
//! The expander sits on I2C bus 1. Output and direction registers are cached
//! so single-bit writes do not need a read first, and a read of the register
//! last addressed skips the command byte.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{HatError, Result};
use crate::transport::{Bus, BusTransport};

/// Digital I/O channels.
pub const NUM_DIO_CHANNELS: usize = 8;

/// Expander registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DioRegister {
    /// Input levels
    Input = 0x00,
    /// Output latch
    Output = 0x01,
    /// Input inversion
    Polarity = 0x02,
    /// Direction, 1 = input
    Config = 0x03,
    /// Input latch enable
    InputLatch = 0x42,
    /// Pull resistor enable
    PullEnable = 0x43,
    /// Pull resistor select, 1 = pull-up
    PullSelect = 0x44,
    /// Interrupt mask, 1 = masked
    InterruptMask = 0x45,
    /// Interrupt status
    InterruptStatus = 0x46,
    /// Output stage, 0 = push-pull
    OutputConfig = 0x4F,
}

impl DioRegister {
    /// Decode a register address.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x00 => Self::Input,
            0x01 => Self::Output,
            0x02 => Self::Polarity,
            0x03 => Self::Config,
            0x42 => Self::InputLatch,
            0x43 => Self::PullEnable,
            0x44 => Self::PullSelect,
            0x45 => Self::InterruptMask,
            0x46 => Self::InterruptStatus,
            0x4F => Self::OutputConfig,
            _ => return None,
        })
    }
}

bitflags! {
    /// One bit per DIO channel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DioMask: u8 {
        /// DIO0
        const DIO0 = 1 << 0;
        /// DIO1
        const DIO1 = 1 << 1;
        /// DIO2
        const DIO2 = 1 << 2;
        /// DIO3
        const DIO3 = 1 << 3;
        /// DIO4
        const DIO4 = 1 << 4;
        /// DIO5
        const DIO5 = 1 << 5;
        /// DIO6
        const DIO6 = 1 << 6;
        /// DIO7
        const DIO7 = 1 << 7;
    }
}

impl DioMask {
    /// Mask for a single channel.
    pub fn channel(channel: u8) -> Self {
        Self::from_bits_truncate(1u8.checked_shl(u32::from(channel)).unwrap_or(0))
    }
}

/// Channel selector for DIO operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DioChannel {
    /// One channel, 0-7; values are a single bit
    Single(u8),
    /// The whole port; values are 8-bit masks
    All,
}

impl DioChannel {
    pub(crate) fn validate(self) -> Result<Self> {
        match self {
            Self::Single(ch) if usize::from(ch) >= NUM_DIO_CHANNELS => {
                Err(HatError::bad_parameter(format!(
                    "DIO channel {ch} out of range 0-{}",
                    NUM_DIO_CHANNELS - 1
                )))
            }
            other => Ok(other),
        }
    }
}

#[derive(Debug)]
struct ExpanderCache {
    last_command: Option<u8>,
    output: u8,
    direction: u8,
}

impl ExpanderCache {
    fn cached(&self, register: DioRegister) -> Option<u8> {
        match register {
            DioRegister::Output => Some(self.output),
            DioRegister::Config => Some(self.direction),
            _ => None,
        }
    }

    fn update(&mut self, register: DioRegister, value: u8) {
        match register {
            DioRegister::Output => self.output = value,
            DioRegister::Config => self.direction = value,
            _ => {}
        }
    }
}

/// One board's expander.
#[derive(Debug)]
pub(crate) struct Expander {
    transport: Arc<BusTransport>,
    address: u8,
    cache: Mutex<ExpanderCache>,
}

impl Expander {
    /// Load the cached registers from the device.
    pub(crate) fn open(transport: Arc<BusTransport>, address: u8) -> Result<Self> {
        let expander = Self {
            transport,
            address,
            cache: Mutex::new(ExpanderCache {
                last_command: None,
                output: 0xFF,
                direction: 0xFF,
            }),
        };
        {
            let mut cache = expander.cache.lock();
            cache.output = expander.read_locked(&mut cache, DioRegister::Output)?;
            cache.direction = expander.read_locked(&mut cache, DioRegister::Config)?;
        }
        debug!(address, "DIO cache loaded");
        Ok(expander)
    }

    fn read_locked(&self, cache: &mut ExpanderCache, register: DioRegister) -> Result<u8> {
        let command = register as u8;
        let rx = if cache.last_command == Some(command) {
            self.transport.transfer(self.address, Bus::I2c1, &[], 1)?
        } else {
            // a failed command write leaves the pointer unknown
            cache.last_command = None;
            self.transport.transfer(self.address, Bus::I2c1, &[command], 1)?
        };
        cache.last_command = Some(command);
        trace!(address = self.address, ?register, value = rx[0], "DIO read");
        Ok(rx[0])
    }

    fn write_locked(&self, cache: &mut ExpanderCache, register: DioRegister, value: u8) -> Result<()> {
        let command = register as u8;
        cache.last_command = None;
        self.transport
            .transfer(self.address, Bus::I2c1, &[command, value], 0)?;
        cache.last_command = Some(command);
        cache.update(register, value);
        trace!(address = self.address, ?register, value, "DIO write");
        Ok(())
    }

    /// Read a register, reduced to one bit for a single channel.
    pub(crate) fn read(&self, register: DioRegister, channel: DioChannel) -> Result<u8> {
        let channel = channel.validate()?;
        let mut cache = self.cache.lock();
        let value = self.read_locked(&mut cache, register)?;
        Ok(match channel {
            DioChannel::All => value,
            DioChannel::Single(ch) => (value >> ch) & 0x01,
        })
    }

    /// Write a register, or one bit of it.
    ///
    /// A single-channel write merges into the cached value when there is one
    /// and reads the register otherwise.
    pub(crate) fn write(&self, register: DioRegister, channel: DioChannel, value: u8) -> Result<()> {
        let channel = channel.validate()?;
        let mut cache = self.cache.lock();
        let new_value = match channel {
            DioChannel::All => value,
            DioChannel::Single(ch) => {
                let current = match cache.cached(register) {
                    Some(current) => current,
                    None => self.read_locked(&mut cache, register)?,
                };
                let bit = DioMask::channel(ch);
                let mut merged = DioMask::from_bits_retain(current);
                merged.set(bit, value & 0x01 != 0);
                merged.bits()
            }
        };
        self.write_locked(&mut cache, register, new_value)
    }

    /// Return every register to its power-on default.
    pub(crate) fn reset(&self) -> Result<()> {
        const DEFAULTS: [(DioRegister, u8); 8] = [
            (DioRegister::InterruptMask, 0xFF),
            (DioRegister::Config, 0xFF),
            (DioRegister::PullSelect, 0xFF),
            (DioRegister::PullEnable, 0xFF),
            (DioRegister::Polarity, 0x00),
            (DioRegister::InputLatch, 0x00),
            (DioRegister::OutputConfig, 0x00),
            (DioRegister::Output, 0xFF),
        ];
        let mut cache = self.cache.lock();
        for (register, value) in DEFAULTS {
            self.write_locked(&mut cache, register, value)?;
        }
        debug!(address = self.address, "DIO reset");
        Ok(())
    }
}
