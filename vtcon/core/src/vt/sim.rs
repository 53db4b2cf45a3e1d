//! Simulated VT device.
//!
//! Stands in for a real kernel VT when the controller runs headless (no VT
//! capability, tests, automation). The switch protocol stays fully alive:
//! SIGUSR1 still means "switch away" and SIGUSR2 "switch back", so a
//! simulated session can be driven from outside with plain `kill`.

use std::cell::Cell;
use std::rc::Rc;

use nix::sys::signal::Signal;
use tracing::debug;

use super::{VtDevice, VtError};

/// In-memory VT device.
pub struct SimVt {
    active: Rc<Cell<bool>>,
    release_acks: Rc<Cell<u32>>,
    acquire_acks: Rc<Cell<u32>>,
    restores: Rc<Cell<u32>>,
}

impl SimVt {
    /// A device that is already foreground, the normal simulated case.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: Rc::new(Cell::new(true)),
            release_acks: Rc::new(Cell::new(0)),
            acquire_acks: Rc::new(Cell::new(0)),
            restores: Rc::new(Cell::new(0)),
        }
    }

    /// A device that starts backgrounded.
    #[must_use]
    pub fn background() -> Self {
        let device = Self::new();
        device.active.set(false);
        device
    }

    /// Probe observing the device after it moves into the controller.
    #[must_use]
    pub fn probe(&self) -> SimVtProbe {
        SimVtProbe {
            active: Rc::clone(&self.active),
            release_acks: Rc::clone(&self.release_acks),
            acquire_acks: Rc::clone(&self.acquire_acks),
            restores: Rc::clone(&self.restores),
        }
    }
}

impl Default for SimVt {
    fn default() -> Self {
        Self::new()
    }
}

impl VtDevice for SimVt {
    fn release_signal(&self) -> Signal {
        Signal::SIGUSR1
    }

    fn acquire_signal(&self) -> Signal {
        Signal::SIGUSR2
    }

    fn is_active(&self) -> Result<bool, VtError> {
        Ok(self.active.get())
    }

    fn activate(&mut self) -> Result<(), VtError> {
        self.active.set(true);
        Ok(())
    }

    fn acknowledge_release(&mut self) -> Result<(), VtError> {
        self.active.set(false);
        self.release_acks.set(self.release_acks.get() + 1);
        debug!("simulated VT release acknowledged");
        Ok(())
    }

    fn acknowledge_acquire(&mut self) -> Result<(), VtError> {
        self.active.set(true);
        self.acquire_acks.set(self.acquire_acks.get() + 1);
        debug!("simulated VT acquire acknowledged");
        Ok(())
    }

    fn restore(&mut self) -> Result<(), VtError> {
        self.restores.set(self.restores.get() + 1);
        Ok(())
    }
}

/// Shared view of a [`SimVt`]'s state, usable after the device is owned by
/// the controller.
pub struct SimVtProbe {
    active: Rc<Cell<bool>>,
    release_acks: Rc<Cell<u32>>,
    acquire_acks: Rc<Cell<u32>>,
    restores: Rc<Cell<u32>>,
}

impl SimVtProbe {
    /// Whether the simulated VT is currently foreground.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// How many release notifications were acknowledged.
    #[must_use]
    pub fn release_acks(&self) -> u32 {
        self.release_acks.get()
    }

    /// How many acquire notifications were acknowledged.
    #[must_use]
    pub fn acquire_acks(&self) -> u32 {
        self.acquire_acks.get()
    }

    /// How many times the device was restored.
    #[must_use]
    pub fn restores(&self) -> u32 {
        self.restores.get()
    }
}
