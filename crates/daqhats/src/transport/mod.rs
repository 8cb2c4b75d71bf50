//! Bus transport.
//!
//! Board drivers never touch the hardware directly. They hand byte frames to
//! a [`BusTransport`], which serializes access to each physical bus with an
//! advisory lock and forwards the frame to a [`RawBus`] implementation. The
//! raw implementation owns chip-select, address-pin and ioctl details; the
//! bundled [`crate::sim::SimulatedStack`] is one.
//!
//! ```text
//!   Mcc118 / Mcc134 / Mcc152
//!            │  transfer(address, bus, tx, rx_len)
//!   ┌────────▼─────────┐
//!   │   BusTransport   │  flock(<lock_dir>/daqhats-<bus>.lock)
//!   └────────┬─────────┘
//!            │  exchange(...)
//!   ┌────────▼─────────┐
//!   │   dyn RawBus     │  spidev / i2c-dev / simulator
//!   └──────────────────┘
//! ```

mod lock;

pub use lock::FileLock;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use crate::config::BusConfig;
use crate::error::{HatError, Result};
use crate::info::HatEeprom;
use crate::MAX_NUMBER_HATS;

/// Physical bus a board register lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bus {
    /// Main SPI bus (MCC 118 microcontroller, MCC 134 ADC)
    Spi0,
    /// Auxiliary SPI bus (MCC 134 CJC sensor, MCC 152 DAC)
    Spi1,
    /// I2C bus (MCC 152 DIO expander)
    I2c1,
}

impl Bus {
    /// Stable name used for lock files and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Spi0 => "spi0",
            Self::Spi1 => "spi1",
            Self::I2c1 => "i2c1",
        }
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Low-level bus access.
///
/// Implementations select the board at `address`, shift `tx` out and return
/// exactly `rx_len` bytes clocked back. For SPI the reply is the full-duplex
/// receive buffer when `rx_len == tx.len()`; for I2C `tx` is written and
/// `rx_len` bytes are read afterwards.
pub trait RawBus: Send + Sync {
    /// Perform one transaction.
    fn exchange(&self, address: u8, bus: Bus, tx: &[u8], rx_len: usize) -> Result<Vec<u8>>;

    /// Read the board's ID EEPROM, already parsed. `None` when no board answers.
    fn read_eeprom(&self, address: u8) -> Result<Option<HatEeprom>>;
}

/// Lock-serialized access to a [`RawBus`].
#[derive(Clone)]
pub struct BusTransport {
    raw: Arc<dyn RawBus>,
    lock_dir: PathBuf,
    lock_timeout: Duration,
}

impl fmt::Debug for BusTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusTransport")
            .field("lock_dir", &self.lock_dir)
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

impl BusTransport {
    /// Wrap a raw bus using the given lock settings.
    pub fn new(raw: Arc<dyn RawBus>, config: &BusConfig) -> Self {
        Self {
            raw,
            lock_dir: config.lock_dir.clone(),
            lock_timeout: config.lock_timeout(),
        }
    }

    /// Run one transaction while holding the bus lock.
    pub fn transfer(&self, address: u8, bus: Bus, tx: &[u8], rx_len: usize) -> Result<Vec<u8>> {
        check_address(address)?;
        let _guard = self.lock_bus(bus)?;
        let rx = self.raw.exchange(address, bus, tx, rx_len)?;
        if rx.len() != rx_len {
            return Err(HatError::undefined(format!(
                "{bus} transfer at address {address}: expected {rx_len} bytes, got {}",
                rx.len()
            )));
        }
        trace!(address, %bus, tx = tx.len(), rx = rx.len(), "transfer");
        Ok(rx)
    }

    /// Read a board's EEPROM record.
    pub fn read_eeprom(&self, address: u8) -> Result<Option<HatEeprom>> {
        check_address(address)?;
        self.raw.read_eeprom(address)
    }

    /// Take the per-bus lock.
    pub fn lock_bus(&self, bus: Bus) -> Result<FileLock> {
        FileLock::acquire(
            &self.lock_dir.join(format!("daqhats-{}.lock", bus.name())),
            self.lock_timeout,
        )
    }

    /// Take the per-board lock, for sequences that span several transfers.
    pub fn lock_board(&self, address: u8) -> Result<FileLock> {
        check_address(address)?;
        FileLock::acquire(
            &self.lock_dir.join(format!("daqhats-board{address}.lock")),
            self.lock_timeout,
        )
    }
}

pub(crate) fn check_address(address: u8) -> Result<()> {
    if usize::from(address) >= MAX_NUMBER_HATS {
        return Err(HatError::bad_parameter(format!(
            "address {address} out of range 0-{}",
            MAX_NUMBER_HATS - 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Echo {
        calls: Mutex<Vec<(u8, Bus)>>,
        short: bool,
    }

    impl RawBus for Echo {
        fn exchange(&self, address: u8, bus: Bus, tx: &[u8], rx_len: usize) -> Result<Vec<u8>> {
            self.calls.lock().push((address, bus));
            let mut rx = tx.to_vec();
            rx.resize(if self.short { rx_len / 2 } else { rx_len }, 0);
            Ok(rx)
        }

        fn read_eeprom(&self, _address: u8) -> Result<Option<HatEeprom>> {
            Ok(None)
        }
    }

    fn transport(dir: &std::path::Path, short: bool) -> (BusTransport, Arc<Echo>) {
        let raw = Arc::new(Echo {
            calls: Mutex::new(Vec::new()),
            short,
        });
        let config = BusConfig {
            lock_dir: dir.to_path_buf(),
            lock_timeout_ms: 20,
        };
        (BusTransport::new(raw.clone(), &config), raw)
    }

    #[test]
    fn test_transfer_forwards_to_raw_bus() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, raw) = transport(dir.path(), false);
        let rx = bus.transfer(2, Bus::Spi0, &[1, 2, 3], 3).unwrap();
        assert_eq!(rx, vec![1, 2, 3]);
        assert_eq!(raw.calls.lock().as_slice(), &[(2, Bus::Spi0)]);
        assert!(dir.path().join("daqhats-spi0.lock").exists());
    }

    #[test]
    fn test_bad_address_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, raw) = transport(dir.path(), false);
        assert!(bus.transfer(8, Bus::Spi0, &[0], 1).unwrap_err().is_bad_parameter());
        assert!(raw.calls.lock().is_empty());
    }

    #[test]
    fn test_short_reply_is_undefined() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _) = transport(dir.path(), true);
        let err = bus.transfer(0, Bus::I2c1, &[0, 0], 4).unwrap_err();
        assert!(matches!(err, HatError::Undefined { .. }));
    }

    #[test]
    fn test_held_bus_lock_times_out_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _) = transport(dir.path(), false);
        let _held = bus.lock_bus(Bus::Spi1).unwrap();
        let err = bus.transfer(0, Bus::Spi1, &[0], 1).unwrap_err();
        assert!(matches!(err, HatError::LockTimeout { .. }));
        // Other buses are unaffected.
        assert!(bus.transfer(0, Bus::Spi0, &[0], 1).is_ok());
    }

    #[test]
    fn test_board_lock_independent_of_bus_lock() {
        let dir = tempfile::tempdir().unwrap();
        let (bus, _) = transport(dir.path(), false);
        let _board = bus.lock_board(1).unwrap();
        assert!(bus.transfer(1, Bus::Spi0, &[0], 1).is_ok());
    }
}
