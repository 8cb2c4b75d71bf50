//! Board identification and discovery.

use std::fmt;

use tracing::debug;

use crate::calibration::FactoryData;
use crate::error::Result;
use crate::transport::BusTransport;
use crate::MAX_NUMBER_HATS;

/// Product IDs stored in the HAT EEPROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HatId {
    /// Matches every board in [`hat_list`]
    Any,
    /// MCC 118 voltage input
    Mcc118,
    /// MCC 118 running its bootloader
    Mcc118Bootloader,
    /// MCC 134 thermocouple input
    Mcc134,
    /// MCC 152 analog output / digital I/O
    Mcc152,
    /// Anything else
    Other(u16),
}

impl HatId {
    /// Decode an EEPROM product ID.
    pub fn from_raw(id: u16) -> Self {
        match id {
            0 => Self::Any,
            0x0142 => Self::Mcc118,
            0x8142 => Self::Mcc118Bootloader,
            0x0143 => Self::Mcc134,
            0x0144 => Self::Mcc152,
            other => Self::Other(other),
        }
    }

    /// Raw EEPROM product ID.
    pub fn raw(self) -> u16 {
        match self {
            Self::Any => 0,
            Self::Mcc118 => 0x0142,
            Self::Mcc118Bootloader => 0x8142,
            Self::Mcc134 => 0x0143,
            Self::Mcc152 => 0x0144,
            Self::Other(id) => id,
        }
    }
}

impl fmt::Display for HatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Mcc118 => write!(f, "MCC 118"),
            Self::Mcc118Bootloader => write!(f, "MCC 118 (bootloader)"),
            Self::Mcc134 => write!(f, "MCC 134"),
            Self::Mcc152 => write!(f, "MCC 152"),
            Self::Other(id) => write!(f, "unknown ({id:#06x})"),
        }
    }
}

/// Parsed EEPROM contents as delivered by the [`crate::transport::RawBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct HatEeprom {
    /// Product ID
    pub id: u16,
    /// Hardware version
    pub version: u16,
    /// Product name string
    pub product_name: String,
    /// Factory calibration record, if one was programmed
    pub factory: Option<FactoryData>,
}

/// One detected board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HatInfo {
    /// Board address, 0-7
    pub address: u8,
    /// Product ID
    pub id: HatId,
    /// Hardware version
    pub version: u16,
    /// Product name string
    pub product_name: String,
}

/// List the boards on the stack, optionally filtered by product ID.
///
/// Addresses with no EEPROM are skipped.
pub fn hat_list(transport: &BusTransport, filter: HatId) -> Result<Vec<HatInfo>> {
    let mut list = Vec::new();
    for address in 0..MAX_NUMBER_HATS as u8 {
        let Some(eeprom) = transport.read_eeprom(address)? else {
            continue;
        };
        let id = HatId::from_raw(eeprom.id);
        if filter != HatId::Any && filter != id {
            continue;
        }
        debug!(address, %id, "found board");
        list.push(HatInfo {
            address,
            id,
            version: eeprom.version,
            product_name: eeprom.product_name,
        });
    }
    Ok(list)
}
