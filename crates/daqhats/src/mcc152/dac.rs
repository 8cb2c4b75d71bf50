//! Two-channel 12-bit DAC on SPI bus 1.

use std::sync::Arc;

use tracing::trace;

use crate::error::{HatError, Result};
use crate::transport::{Bus, BusTransport};

/// Largest DAC code.
pub const MAX_CODE: u16 = 4095;

const DAC_A: u8 = 0x00;
const DAC_B: u8 = 0x01;

const CMD_WRITE: u8 = 0x00 << 3;
const CMD_WRITE_LOAD_ALL: u8 = 0x02 << 3;
const CMD_WRITE_LOAD: u8 = 0x03 << 3;
const CMD_REF_MODE: u8 = 0x07 << 3;

/// Build a DAC frame: command byte, then the code left-aligned in 16 bits.
pub(crate) fn frame(command: u8, code: u16) -> [u8; 3] {
    let [hi, lo] = (code << 4).to_be_bytes();
    [command, hi, lo]
}

#[derive(Debug)]
pub(crate) struct Dac {
    transport: Arc<BusTransport>,
    address: u8,
}

impl Dac {
    pub(crate) fn new(transport: Arc<BusTransport>, address: u8) -> Self {
        Self { transport, address }
    }

    fn send(&self, tx: &[u8]) -> Result<()> {
        self.transport
            .transfer(self.address, Bus::Spi1, tx, tx.len())
            .map(drop)
    }

    fn check(code: u16) -> Result<()> {
        if code > MAX_CODE {
            return Err(HatError::bad_parameter(format!(
                "DAC code {code} exceeds {MAX_CODE}"
            )));
        }
        Ok(())
    }

    /// Switch to the internal reference; the part powers up on external.
    pub(crate) fn init(&self) -> Result<()> {
        self.send(&[CMD_REF_MODE, 0, 1])
    }

    /// Write and update one output.
    pub(crate) fn write(&self, channel: u8, code: u16) -> Result<()> {
        Self::check(code)?;
        let dac = if channel == 0 { DAC_A } else { DAC_B };
        trace!(address = self.address, channel, code, "DAC write");
        self.send(&frame(CMD_WRITE_LOAD | dac, code))
    }

    /// Write both outputs so they update together.
    pub(crate) fn write_both(&self, code_a: u16, code_b: u16) -> Result<()> {
        Self::check(code_a)?;
        Self::check(code_b)?;
        self.send(&frame(CMD_WRITE | DAC_A, code_a))?;
        self.send(&frame(CMD_WRITE_LOAD_ALL | DAC_B, code_b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_left_aligns_code() {
        assert_eq!(frame(CMD_WRITE_LOAD | DAC_B, 0xFFF), [0x19, 0xFF, 0xF0]);
        assert_eq!(frame(CMD_WRITE | DAC_A, 0x123), [0x00, 0x12, 0x30]);
    }
}
