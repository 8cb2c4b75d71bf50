//! MCC 118 microcontroller command frames.
//!
//! The board's microcontroller speaks a framed request/reply protocol on SPI:
//!
//! ```text
//! request: 0xDB | command | len (u16 LE) | payload[len]
//! reply:   0xDB | command | status | len (u16 LE) | payload[len]
//! ```
//!
//! All multi-byte fields are little endian. The reply length is known to the
//! caller for every command, so each exchange clocks in exactly
//! `REPLY_HEADER_LEN + payload` bytes.

use crate::error::{HatError, Result};

/// First byte of every frame.
pub const FRAME_START: u8 = 0xDB;

/// Request header size.
pub const REQUEST_HEADER_LEN: usize = 4;

/// Reply header size.
pub const REPLY_HEADER_LEN: usize = 5;

/// Microcontroller commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Single conversion: `[channel]` -> `[code u16]`
    AIn = 0x10,
    /// Start a scan: see [`ScanStart`]
    AInScanStart = 0x11,
    /// Scan status: `[]` -> see [`ScanStatusReply`]
    AInScanStatus = 0x12,
    /// FIFO read: `[count u16]` -> `[code u16; count]`
    AInScanData = 0x13,
    /// Stop the scan: `[]` -> `[]`
    AInScanStop = 0x14,
    /// Trigger mode: `[mode]` -> `[]`
    TriggerConfig = 0x20,
    /// Identification: `[]` -> see [`IdReply`]
    Id = 0x30,
    /// Blink LED: `[count]` -> `[]`
    Blink = 0x40,
    /// Reset the microcontroller: `[]` -> `[]`
    Reset = 0x41,
    /// Set CLK pin mode: `[mode]` -> `[value]`
    TestClock = 0x50,
    /// Read TRIG pin: `[]` -> `[state]`
    TestTrigger = 0x51,
}

impl Command {
    /// Decode a command byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x10 => Self::AIn,
            0x11 => Self::AInScanStart,
            0x12 => Self::AInScanStatus,
            0x13 => Self::AInScanData,
            0x14 => Self::AInScanStop,
            0x20 => Self::TriggerConfig,
            0x30 => Self::Id,
            0x40 => Self::Blink,
            0x41 => Self::Reset,
            0x50 => Self::TestClock,
            0x51 => Self::TestTrigger,
            _ => return None,
        })
    }
}

/// Reply status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyStatus {
    /// Command accepted
    Ok = 0,
    /// Malformed frame
    BadProtocol = 1,
    /// Parameter out of range
    BadParameter = 2,
    /// A scan is running
    Busy = 3,
    /// Not ready for the command yet
    NotReady = 4,
    /// Internal timeout
    Timeout = 5,
    /// Anything else
    Other = 6,
}

impl ReplyStatus {
    /// Decode a status byte; unknown values map to `Other`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Ok,
            1 => Self::BadProtocol,
            2 => Self::BadParameter,
            3 => Self::Busy,
            4 => Self::NotReady,
            5 => Self::Timeout,
            _ => Self::Other,
        }
    }

    fn into_result(self, command: Command) -> Result<()> {
        let context = format!("MCC 118 command {command:?}");
        match self {
            Self::Ok => Ok(()),
            Self::BadParameter => Err(HatError::bad_parameter(format!("{context}: rejected parameter"))),
            Self::Busy => Err(HatError::busy(format!("{context}: device busy"))),
            Self::NotReady | Self::Timeout => Err(HatError::timeout(format!("{context}: device not ready"))),
            Self::BadProtocol | Self::Other => Err(HatError::undefined(format!("{context}: failed ({self:?})"))),
        }
    }
}

/// Build a request frame.
pub fn encode_request(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REQUEST_HEADER_LEN + payload.len());
    frame.push(FRAME_START);
    frame.push(command as u8);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Split a request frame into command and payload.
pub fn decode_request(frame: &[u8]) -> Result<(Command, &[u8])> {
    if frame.len() < REQUEST_HEADER_LEN || frame[0] != FRAME_START {
        return Err(HatError::undefined("malformed MCC 118 request frame"));
    }
    let command = Command::from_byte(frame[1])
        .ok_or_else(|| HatError::undefined(format!("unknown MCC 118 command {:#04x}", frame[1])))?;
    let len = usize::from(u16::from_le_bytes([frame[2], frame[3]]));
    let payload = frame
        .get(REQUEST_HEADER_LEN..REQUEST_HEADER_LEN + len)
        .ok_or_else(|| HatError::undefined("truncated MCC 118 request frame"))?;
    Ok((command, payload))
}

/// Build a reply frame.
pub fn encode_reply(command: Command, status: ReplyStatus, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REPLY_HEADER_LEN + payload.len());
    frame.push(FRAME_START);
    frame.push(command as u8);
    frame.push(status as u8);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Check a reply frame for `command` and return its payload.
///
/// A non-OK status maps to the matching [`HatError`] even when the payload
/// is shorter than expected.
pub fn decode_reply(command: Command, frame: &[u8], expected_len: usize) -> Result<&[u8]> {
    if frame.len() < REPLY_HEADER_LEN || frame[0] != FRAME_START {
        return Err(HatError::undefined(format!(
            "MCC 118 command {command:?}: no reply frame"
        )));
    }
    if frame[1] != command as u8 {
        return Err(HatError::undefined(format!(
            "MCC 118 command {command:?}: reply for {:#04x}",
            frame[1]
        )));
    }
    ReplyStatus::from_byte(frame[2]).into_result(command)?;

    let len = usize::from(u16::from_le_bytes([frame[3], frame[4]]));
    if len != expected_len {
        return Err(HatError::undefined(format!(
            "MCC 118 command {command:?}: expected {expected_len} payload bytes, got {len}"
        )));
    }
    frame
        .get(REPLY_HEADER_LEN..REPLY_HEADER_LEN + len)
        .ok_or_else(|| HatError::undefined(format!("MCC 118 command {command:?}: truncated reply")))
}

/// Scan start payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStart {
    /// Channel bit mask
    pub channel_mask: u8,
    /// Samples per channel, 0 for continuous
    pub samples_per_channel: u32,
    /// 16 MHz clock divisor minus one, 0 with an external clock
    pub clock_divisor: u32,
    /// Device option bits (external clock / trigger / continuous)
    pub options: u8,
}

impl ScanStart {
    /// Encoded size.
    pub const LEN: usize = 10;

    /// Encode.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0] = self.channel_mask;
        out[1..5].copy_from_slice(&self.samples_per_channel.to_le_bytes());
        out[5..9].copy_from_slice(&self.clock_divisor.to_le_bytes());
        out[9] = self.options;
        out
    }

    /// Decode.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::LEN {
            return Err(HatError::undefined("bad scan start payload"));
        }
        Ok(Self {
            channel_mask: payload[0],
            samples_per_channel: u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]),
            clock_divisor: u32::from_le_bytes([payload[5], payload[6], payload[7], payload[8]]),
            options: payload[9],
        })
    }
}

/// Scan status reply payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStatusReply {
    /// Scan running or armed
    pub running: bool,
    /// FIFO overflowed
    pub hw_overrun: bool,
    /// Trigger seen
    pub triggered: bool,
    /// Codes in the FIFO
    pub available: u16,
    /// Largest FIFO read accepted
    pub max_read: u16,
}

impl ScanStatusReply {
    /// Encoded size.
    pub const LEN: usize = 5;

    /// Encode.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let flags =
            u8::from(self.running) | (u8::from(self.hw_overrun) << 1) | (u8::from(self.triggered) << 2);
        let available = self.available.to_le_bytes();
        let max_read = self.max_read.to_le_bytes();
        [flags, available[0], available[1], max_read[0], max_read[1]]
    }

    /// Decode.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::LEN {
            return Err(HatError::undefined("bad scan status payload"));
        }
        Ok(Self {
            running: payload[0] & 0x01 != 0,
            hw_overrun: payload[0] & 0x02 != 0,
            triggered: payload[0] & 0x04 != 0,
            available: u16::from_le_bytes([payload[1], payload[2]]),
            max_read: u16::from_le_bytes([payload[3], payload[4]]),
        })
    }
}

/// Identification reply payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdReply {
    /// Product ID
    pub id: u16,
    /// Hardware version
    pub version: u16,
    /// Firmware version, BCD
    pub firmware: u16,
    /// Bootloader version, BCD
    pub bootloader: u16,
}

impl IdReply {
    /// Encoded size.
    pub const LEN: usize = 8;

    /// Encode.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..2].copy_from_slice(&self.id.to_le_bytes());
        out[2..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..6].copy_from_slice(&self.firmware.to_le_bytes());
        out[6..8].copy_from_slice(&self.bootloader.to_le_bytes());
        out
    }

    /// Decode.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::LEN {
            return Err(HatError::undefined("bad id payload"));
        }
        let word = |i: usize| u16::from_le_bytes([payload[i], payload[i + 1]]);
        Ok(Self {
            id: word(0),
            version: word(2),
            firmware: word(4),
            bootloader: word(6),
        })
    }
}

/// Decode a run of little-endian u16 codes.
pub fn decode_codes(payload: &[u8]) -> Vec<u16> {
    payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encode u16 codes little endian.
pub fn encode_codes(codes: &[u16]) -> Vec<u8> {
    codes.iter().flat_map(|code| code.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let frame = encode_request(Command::Blink, &[3]);
        assert_eq!(frame, vec![0xDB, 0x40, 1, 0, 3]);
        let (cmd, payload) = decode_request(&frame).unwrap();
        assert_eq!(cmd, Command::Blink);
        assert_eq!(payload, &[3]);
    }

    #[test]
    fn test_reply_status_mapping() {
        let busy = encode_reply(Command::AIn, ReplyStatus::Busy, &[]);
        assert!(decode_reply(Command::AIn, &busy, 2).unwrap_err().is_busy());

        let bad = encode_reply(Command::AIn, ReplyStatus::BadParameter, &[]);
        assert!(decode_reply(Command::AIn, &bad, 2).unwrap_err().is_bad_parameter());

        let not_ready = encode_reply(Command::AIn, ReplyStatus::NotReady, &[]);
        assert!(decode_reply(Command::AIn, &not_ready, 2).unwrap_err().is_timeout());
    }

    #[test]
    fn test_reply_for_wrong_command() {
        let frame = encode_reply(Command::Id, ReplyStatus::Ok, &[0; 8]);
        let err = decode_reply(Command::AIn, &frame, 8).unwrap_err();
        assert!(matches!(err, HatError::Undefined { .. }));
    }

    #[test]
    fn test_reply_length_checked() {
        let frame = encode_reply(Command::AIn, ReplyStatus::Ok, &[1, 2, 3]);
        assert!(decode_reply(Command::AIn, &frame, 2).is_err());
        let frame = encode_reply(Command::AIn, ReplyStatus::Ok, &[0x34, 0x12]);
        assert_eq!(decode_codes(decode_reply(Command::AIn, &frame, 2).unwrap()), vec![0x1234]);
    }

    #[test]
    fn test_scan_start_layout() {
        let start = ScanStart {
            channel_mask: 0x81,
            samples_per_channel: 1000,
            clock_divisor: 159,
            options: 0x10,
        };
        let bytes = start.encode();
        assert_eq!(bytes[0], 0x81);
        assert_eq!(&bytes[1..5], &1000u32.to_le_bytes());
        assert_eq!(bytes[9], 0x10);
        assert_eq!(ScanStart::decode(&bytes).unwrap(), start);
    }

    #[test]
    fn test_status_flags() {
        let status = ScanStatusReply {
            running: true,
            hw_overrun: false,
            triggered: true,
            available: 300,
            max_read: 512,
        };
        let bytes = status.encode();
        assert_eq!(bytes[0], 0b101);
        assert_eq!(ScanStatusReply::decode(&bytes).unwrap(), status);
    }
}
