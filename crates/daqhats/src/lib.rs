//! Rust driver for MCC DAQ HAT boards.
//!
//! This crate drives the MCC 118 voltage input, MCC 134 thermocouple input
//! and MCC 152 analog output / digital I/O boards stacked on a Raspberry Pi
//! header. Up to eight boards share the SPI and I2C buses; each is selected
//! by its address (0-7).
//!
//! # Architecture
//!
//! ## Bus Access
//! - [`transport::BusTransport`] - Lock-serialized transfers with
//!   cross-process `flock(2)` locking
//! - [`transport::RawBus`] - The byte-level seam to real buses or the
//!   simulator
//! - [`sim::SimulatedStack`] - In-process board models for tests and demos
//!
//! ## Boards
//! - [`mcc118::Mcc118`] - Single reads and hardware-paced scans
//! - [`mcc134::Mcc134`] - Thermocouple temperature, voltage and CJC temperature
//! - [`mcc152::Mcc152`] - Analog outputs and the DIO port
//! - [`info::hat_list`] - Discovery from EEPROM records
//!
//! ## Scanning
//! - [`scan::ScanEngine`] - Acquisition thread, sample ring and blocking reads
//! - [`stream::ScanStream`] - Pull subscriber fanning batches out to tokio
//!   channels
//!
//! ## Support
//! - [`config::HatConfig`] - Figment-loaded settings (`daqhats.toml`,
//!   `DAQHATS_*`)
//! - [`gpio::InterruptPin`] - Shared interrupt line
//! - [`error::HatError`] - One variant per library result code
//!
//! # Examples
//!
//! ## Finite Scan
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use daqhats::config::HatConfig;
//! use daqhats::mcc118::Mcc118;
//! use daqhats::scan::{ReadCount, ReadTimeout, ScanOptions};
//! use daqhats::sim::SimulatedStack;
//! use daqhats::transport::BusTransport;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = HatConfig::load()?;
//! let stack = Arc::new(SimulatedStack::new());
//! stack.add_mcc118(0);
//! let transport = Arc::new(BusTransport::new(stack, &config.bus));
//!
//! let board = Mcc118::new(transport, config.scan);
//! board.open(0)?;
//! board.a_in_scan_start(0, 0b0000_0011, 1000, 1000.0, ScanOptions::empty())?;
//!
//! let (read, samples) = board.a_in_scan_read_vec(
//!     0,
//!     ReadCount::Exactly(1000),
//!     ReadTimeout::Wait(Duration::from_secs(5)),
//! )?;
//! println!("{} scans, {} samples", read.samples_per_channel, samples.len());
//!
//! board.a_in_scan_cleanup(0)?;
//! board.close(0)?;
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod config;
pub mod error;
pub mod gpio;
pub mod info;
pub mod mcc118;
pub mod mcc134;
pub mod mcc152;
pub mod registry;
pub mod retry;
pub mod scan;
pub mod sim;
pub mod stream;
pub mod transport;

/// Boards a stack can hold.
pub const MAX_NUMBER_HATS: usize = 8;

pub use config::HatConfig;
pub use error::{HatError, Result, ResultCode};
pub use info::{hat_list, HatId, HatInfo};
pub use mcc118::Mcc118;
pub use mcc134::Mcc134;
pub use mcc152::Mcc152;
pub use scan::{ReadCount, ReadTimeout, ScanOptions, ScanState, ScanStatus};
pub use transport::{Bus, BusTransport, RawBus};
