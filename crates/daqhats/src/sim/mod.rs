//! Simulated board stack.
//!
//! [`SimulatedStack`] implements [`RawBus`] with in-process models of each
//! board, so the drivers, scan engine and stream run unchanged without
//! hardware. Each `add_*` call returns a handle for steering the model
//! (input levels, triggers, injected faults) from tests and demos.
//!
//! ```
//! use std::sync::Arc;
//! use daqhats::config::BusConfig;
//! use daqhats::info::{hat_list, HatId};
//! use daqhats::sim::SimulatedStack;
//! use daqhats::transport::BusTransport;
//!
//! let stack = Arc::new(SimulatedStack::new());
//! stack.add_mcc118(0);
//! stack.add_mcc152(3);
//!
//! let transport = BusTransport::new(stack, &BusConfig::default());
//! let boards = hat_list(&transport, HatId::Any).unwrap();
//! assert_eq!(boards.len(), 2);
//! ```

mod faults;
mod mcc118;
mod mcc134;
mod mcc152;

pub use faults::{FaultConfig, FaultScenario};
pub use mcc118::{expected_code, SimMcc118, FIFO_CAPACITY, MAX_READ};
pub use mcc134::SimMcc134;
pub use mcc152::SimMcc152;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::calibration::{Coefficient, FactoryData, DEFAULT_CALIBRATION_DATE};
use crate::error::{HatError, Result};
use crate::info::{HatEeprom, HatId};
use crate::transport::{Bus, RawBus};

#[derive(Debug, Clone)]
enum SimBoard {
    Mcc118(Arc<SimMcc118>),
    Mcc134(Arc<SimMcc134>),
    Mcc152(Arc<SimMcc152>),
}

#[derive(Debug, Clone)]
struct Slot {
    board: SimBoard,
    eeprom: Option<HatEeprom>,
}

/// In-process stack of simulated boards.
#[derive(Debug, Default)]
pub struct SimulatedStack {
    slots: RwLock<HashMap<u8, Slot>>,
}

fn factory_eeprom(id: HatId, address: u8, product_name: &str, channels: usize) -> HatEeprom {
    HatEeprom {
        id: id.raw(),
        version: 1,
        product_name: product_name.to_string(),
        factory: Some(FactoryData {
            serial: format!("SIM{:04X}{address}", id.raw()),
            calibration_date: DEFAULT_CALIBRATION_DATE.to_string(),
            coefficients: vec![Coefficient::default(); channels],
        }),
    }
}

impl SimulatedStack {
    /// Empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, address: u8, board: SimBoard, eeprom: HatEeprom) {
        debug!(address, id = %HatId::from_raw(eeprom.id), "Simulated board added");
        self.slots.write().insert(
            address,
            Slot {
                board,
                eeprom: Some(eeprom),
            },
        );
    }

    /// Place an MCC 118 at `address`.
    pub fn add_mcc118(&self, address: u8) -> Arc<SimMcc118> {
        let sim = Arc::new(SimMcc118::new());
        let eeprom = factory_eeprom(HatId::Mcc118, address, "MCC 118 Voltage HAT", 8);
        self.insert(address, SimBoard::Mcc118(Arc::clone(&sim)), eeprom);
        sim
    }

    /// Place an MCC 134 at `address`.
    pub fn add_mcc134(&self, address: u8) -> Arc<SimMcc134> {
        let sim = Arc::new(SimMcc134::new());
        let eeprom = factory_eeprom(HatId::Mcc134, address, "MCC 134 Thermocouple HAT", 4);
        self.insert(address, SimBoard::Mcc134(Arc::clone(&sim)), eeprom);
        sim
    }

    /// Place an MCC 152 at `address`.
    pub fn add_mcc152(&self, address: u8) -> Arc<SimMcc152> {
        let sim = Arc::new(SimMcc152::new());
        let eeprom = factory_eeprom(HatId::Mcc152, address, "MCC 152 Voltage Output and DIO HAT", 0);
        self.insert(address, SimBoard::Mcc152(Arc::clone(&sim)), eeprom);
        sim
    }

    /// Replace the EEPROM record at `address`; `None` models a blank EEPROM.
    pub fn set_eeprom(&self, address: u8, eeprom: Option<HatEeprom>) {
        if let Some(slot) = self.slots.write().get_mut(&address) {
            slot.eeprom = eeprom;
        }
    }

    /// Take the board at `address` off the stack.
    pub fn remove(&self, address: u8) -> bool {
        self.slots.write().remove(&address).is_some()
    }

    fn board(&self, address: u8) -> Result<SimBoard> {
        self.slots
            .read()
            .get(&address)
            .map(|slot| slot.board.clone())
            .ok_or_else(|| HatError::timeout(format!("no board answers at address {address}")))
    }
}

impl RawBus for SimulatedStack {
    fn exchange(&self, address: u8, bus: Bus, tx: &[u8], rx_len: usize) -> Result<Vec<u8>> {
        let mut rx = match (self.board(address)?, bus) {
            (SimBoard::Mcc118(sim), Bus::Spi0) => sim.handle(tx)?,
            (SimBoard::Mcc134(sim), Bus::Spi0) => sim.handle_adc(tx)?,
            (SimBoard::Mcc134(sim), Bus::Spi1) => sim.handle_cjc(tx)?,
            (SimBoard::Mcc152(sim), Bus::Spi1) => sim.handle_dac(tx)?,
            (SimBoard::Mcc152(sim), Bus::I2c1) => sim.handle_i2c(tx, rx_len)?,
            // nothing drives MISO/SDA: the bus reads idle-high
            (_, _) => vec![0xFF; rx_len],
        };
        // fixed-length replies are padded or clipped like a real shift register
        rx.resize(rx_len, 0);
        Ok(rx)
    }

    fn read_eeprom(&self, address: u8) -> Result<Option<HatEeprom>> {
        Ok(self
            .slots
            .read()
            .get(&address)
            .and_then(|slot| slot.eeprom.clone()))
    }
}
