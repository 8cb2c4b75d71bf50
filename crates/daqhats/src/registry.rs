//! Per-address table of open boards.
//!
//! Every board driver owns one registry. Opening the same address twice
//! shares the existing state and bumps a reference count; the board's
//! [`HatDevice::shutdown`] hook runs when the last handle closes.
//!
//! Board initialization runs outside the table lock, so a slow first open
//! on one address never stalls calls on the others.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::error::{HatError, Result};
use crate::transport::check_address;
use crate::MAX_NUMBER_HATS;

/// State kept for an open board.
pub trait HatDevice: Send + Sync + 'static {
    /// Release background resources. Called once, after the last close,
    /// without any registry lock held.
    fn shutdown(&self);
}

struct Entry<D> {
    handle_count: usize,
    device: Arc<D>,
}

enum Slot<D> {
    Empty,
    /// First open in progress
    Opening,
    Open(Entry<D>),
}

impl<D> Slot<D> {
    fn entry(&self) -> Option<&Entry<D>> {
        match self {
            Slot::Open(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Reference-counted open-board table, one slot per address.
pub struct DeviceRegistry<D: HatDevice> {
    slots: Mutex<[Slot<D>; MAX_NUMBER_HATS]>,
    opened: Condvar,
}

impl<D: HatDevice> Default for DeviceRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears an `Opening` reservation if `init` fails or panics.
struct Reservation<'a, D: HatDevice> {
    registry: &'a DeviceRegistry<D>,
    index: usize,
    armed: bool,
}

impl<D: HatDevice> Drop for Reservation<'_, D> {
    fn drop(&mut self) {
        if self.armed {
            self.registry.slots.lock()[self.index] = Slot::Empty;
            self.registry.opened.notify_all();
        }
    }
}

impl<D: HatDevice> DeviceRegistry<D> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(std::array::from_fn(|_| Slot::Empty)),
            opened: Condvar::new(),
        }
    }

    /// Open `address`, running `init` only if it is not already open.
    ///
    /// `init` runs without the table lock. Other opens of the same address
    /// wait for it to finish and then share its result, so a board is
    /// initialized once; opens and lookups on other addresses proceed.
    pub fn open_with<F>(&self, address: u8, init: F) -> Result<Arc<D>>
    where
        F: FnOnce() -> Result<D>,
    {
        check_address(address)?;
        let index = usize::from(address);
        {
            let mut slots = self.slots.lock();
            loop {
                match &mut slots[index] {
                    Slot::Open(entry) => {
                        entry.handle_count += 1;
                        debug!(address, handles = entry.handle_count, "board already open");
                        return Ok(Arc::clone(&entry.device));
                    }
                    Slot::Opening => {}
                    Slot::Empty => break,
                }
                self.opened.wait(&mut slots);
            }
            slots[index] = Slot::Opening;
        }

        let mut reservation = Reservation {
            registry: self,
            index,
            armed: true,
        };
        let device = Arc::new(init()?);

        reservation.armed = false;
        self.slots.lock()[index] = Slot::Open(Entry {
            handle_count: 1,
            device: Arc::clone(&device),
        });
        self.opened.notify_all();
        info!(address, "opened board");
        Ok(device)
    }

    /// Shared state of an open board.
    pub fn get(&self, address: u8) -> Result<Arc<D>> {
        check_address(address)?;
        self.slots.lock()[usize::from(address)]
            .entry()
            .map(|entry| Arc::clone(&entry.device))
            .ok_or_else(|| HatError::bad_parameter(format!("board at address {address} is not open")))
    }

    /// Whether `address` is open. Out-of-range addresses are never open.
    pub fn is_open(&self, address: u8) -> bool {
        usize::from(address) < MAX_NUMBER_HATS
            && self.slots.lock()[usize::from(address)].entry().is_some()
    }

    /// Number of outstanding opens at `address`.
    pub fn handle_count(&self, address: u8) -> usize {
        if usize::from(address) >= MAX_NUMBER_HATS {
            return 0;
        }
        self.slots.lock()[usize::from(address)]
            .entry()
            .map_or(0, |entry| entry.handle_count)
    }

    /// Drop one handle; the last one removes the board and runs its shutdown hook.
    pub fn close(&self, address: u8) -> Result<()> {
        check_address(address)?;
        let index = usize::from(address);
        let released = {
            let mut slots = self.slots.lock();
            let handles = match &mut slots[index] {
                Slot::Open(entry) => {
                    entry.handle_count -= 1;
                    entry.handle_count
                }
                _ => {
                    return Err(HatError::bad_parameter(format!(
                        "board at address {address} is not open"
                    )))
                }
            };
            if handles == 0 {
                match std::mem::replace(&mut slots[index], Slot::Empty) {
                    Slot::Open(entry) => Some(entry.device),
                    _ => None,
                }
            } else {
                debug!(address, handles, "board handle closed");
                None
            }
        };

        if let Some(device) = released {
            device.shutdown();
            info!(address, "closed board");
        }
        Ok(())
    }

    /// Addresses currently open.
    pub fn open_addresses(&self) -> Vec<u8> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry().is_some())
            .map(|(address, _)| address as u8)
            .collect()
    }
}

impl<D: HatDevice> Drop for DeviceRegistry<D> {
    fn drop(&mut self) {
        let slots = std::mem::replace(self.slots.get_mut(), std::array::from_fn(|_| Slot::Empty));
        for slot in slots {
            if let Slot::Open(entry) = slot {
                entry.device.shutdown();
            }
        }
    }
}
