//! VT session control.
//!
//! The kernel notifies a process-mode VT of foreground changes through a pair
//! of signals: a release signal when the user switches away, an acquire
//! signal when the user switches back. [`VtController`] binds both to the
//! event loop, translates them into [`SwitchAction`]s for a registered
//! callback, and acknowledges every switch to the kernel. Vetoing a switch is
//! not a supported policy: the kernel is acknowledged regardless of what the
//! callback returns, and a switch arriving before a callback is registered is
//! acknowledged and otherwise dropped.
//!
//! Switch events are transient values, consumed synchronously inside
//! dispatch; they are never queued by this layer. Delivery is serialized by
//! the single-threaded loop, so ENTER/LEAVE handling never overlaps.
//!
//! [`kernel::KernelVt`] talks to a real Linux VT; [`sim::SimVt`] is the
//! in-memory stand-in for running without one.

pub mod kernel;
pub mod sim;

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::eloop::{EventLoop, LoopError, SignalWatcher};

/// Direction of a VT switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchAction {
    /// The VT became (or is becoming) foreground.
    Enter,
    /// The VT is being switched away from.
    Leave,
}

/// The callback's answer to a switch notification.
///
/// Informational only; the controller acknowledges the switch to the kernel
/// either way.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchReply {
    /// The switch was handled.
    Accepted,
    /// The callback could not handle the switch. Logged; the switch still
    /// proceeds.
    Rejected,
}

/// Callback receiving switch notifications.
pub type SwitchCallback = Box<dyn FnMut(SwitchAction) -> SwitchReply>;

/// Errors from VT operations.
#[derive(Debug, Error)]
pub enum VtError {
    /// Opening a VT device node failed.
    #[error("cannot open VT device: {0}")]
    Open(io::Error),
    /// The kernel reported no free VT to allocate.
    #[error("no free VT available")]
    NoFreeVt,
    /// A VT ioctl failed.
    #[error("VT ioctl {name} failed: {err}")]
    Ioctl {
        /// The ioctl that failed.
        name: &'static str,
        /// The kernel's errno.
        err: Errno,
    },
    /// Binding the switch signals to the event loop failed.
    #[error("cannot bind VT signals: {0}")]
    Loop(#[from] LoopError),
}

/// The kernel-facility seam the controller drives.
///
/// Implementations map the switch protocol onto a real VT (ioctls and
/// signals) or onto nothing at all for simulated sessions.
pub trait VtDevice {
    /// Signal the kernel sends when the user switches away.
    fn release_signal(&self) -> Signal;

    /// Signal the kernel sends when the user switches back.
    fn acquire_signal(&self) -> Signal;

    /// Whether this VT is currently the foreground one.
    fn is_active(&self) -> Result<bool, VtError>;

    /// Ask the kernel to bring this VT to the foreground.
    fn activate(&mut self) -> Result<(), VtError>;

    /// Acknowledge a release notification, letting the switch away proceed.
    fn acknowledge_release(&mut self) -> Result<(), VtError>;

    /// Acknowledge an acquire notification, completing the switch back.
    fn acknowledge_acquire(&mut self) -> Result<(), VtError>;

    /// Undo the session's VT configuration. Idempotent.
    fn restore(&mut self) -> Result<(), VtError>;
}

struct VtShared<D: VtDevice> {
    device: D,
    callback: Option<SwitchCallback>,
    // The VT was already foreground when no callback existed to tell;
    // synthesize one ENTER at registration.
    pending_enter: bool,
}

impl<D: VtDevice> VtShared<D> {
    fn on_release(&mut self) {
        let reply = match self.callback.as_mut() {
            Some(callback) => callback(SwitchAction::Leave),
            None => {
                debug!("VT release before switch handler registration");
                SwitchReply::Accepted
            }
        };
        if reply == SwitchReply::Rejected {
            warn!("switch handler rejected VT leave; the switch proceeds anyway");
        }
        if let Err(err) = self.device.acknowledge_release() {
            warn!(error = %err, "cannot acknowledge VT release");
        }
    }

    fn on_acquire(&mut self) {
        if let Err(err) = self.device.acknowledge_acquire() {
            warn!(error = %err, "cannot acknowledge VT acquire");
        }
        match self.callback.as_mut() {
            Some(callback) => {
                let _ = callback(SwitchAction::Enter);
            }
            None => {
                debug!("VT acquire before switch handler registration");
                self.pending_enter = true;
            }
        }
    }
}

/// Open VT session: switch-signal watchers plus the device.
pub struct VtController<D: VtDevice> {
    shared: Rc<RefCell<VtShared<D>>>,
    release_watcher: Option<SignalWatcher>,
    acquire_watcher: Option<SignalWatcher>,
}

impl<D: VtDevice + 'static> VtController<D> {
    /// Open the VT session on the loop.
    ///
    /// Binds the device's release/acquire signals as watchers and brings the
    /// VT to the foreground. If the VT is already foreground, the initial
    /// ENTER is synthesized once a switch handler is registered (no acquire
    /// signal will arrive for a switch that already happened).
    pub fn open(device: D, eloop: &mut EventLoop) -> Result<Self, VtError> {
        let release_signal = device.release_signal();
        let acquire_signal = device.acquire_signal();
        let shared = Rc::new(RefCell::new(VtShared {
            device,
            callback: None,
            pending_enter: false,
        }));

        let on_release = {
            let shared = Rc::clone(&shared);
            move |_| shared.borrow_mut().on_release()
        };
        let release_watcher = eloop.watch_signal(release_signal, on_release)?;

        let on_acquire = {
            let shared = Rc::clone(&shared);
            move |_| shared.borrow_mut().on_acquire()
        };
        let acquire_watcher = match eloop.watch_signal(acquire_signal, on_acquire) {
            Ok(watcher) => watcher,
            Err(err) => {
                eloop.unwatch_signal(release_watcher);
                return Err(err.into());
            }
        };

        let foreground = {
            let mut inner = shared.borrow_mut();
            match inner.device.is_active() {
                Ok(true) => {
                    inner.pending_enter = true;
                    Ok(())
                }
                Ok(false) => inner.device.activate(),
                Err(err) => Err(err),
            }
        };
        if let Err(err) = foreground {
            eloop.unwatch_signal(acquire_watcher);
            eloop.unwatch_signal(release_watcher);
            return Err(err);
        }

        info!("VT session opened");
        Ok(Self {
            shared,
            release_watcher: Some(release_watcher),
            acquire_watcher: Some(acquire_watcher),
        })
    }

    /// Register the switch callback.
    ///
    /// Replaces any previous registration. A pending initial ENTER is
    /// delivered synchronously from here.
    pub fn set_switch_handler<F>(&mut self, callback: F)
    where
        F: FnMut(SwitchAction) -> SwitchReply + 'static,
    {
        let mut inner = self.shared.borrow_mut();
        inner.callback = Some(Box::new(callback));
        if std::mem::take(&mut inner.pending_enter) {
            if let Some(callback) = inner.callback.as_mut() {
                let _ = callback(SwitchAction::Enter);
            }
        }
    }

    /// Close the session: unbind both watchers and restore the device.
    ///
    /// Idempotent; a second close is a no-op.
    pub fn close(&mut self, eloop: &mut EventLoop) {
        let mut was_open = false;
        if let Some(watcher) = self.acquire_watcher.take() {
            eloop.unwatch_signal(watcher);
            was_open = true;
        }
        if let Some(watcher) = self.release_watcher.take() {
            eloop.unwatch_signal(watcher);
        }
        if !was_open {
            return;
        }
        let mut inner = self.shared.borrow_mut();
        inner.callback = None;
        if let Err(err) = inner.device.restore() {
            warn!(error = %err, "cannot restore VT");
        }
        info!("VT session closed");
    }
}
