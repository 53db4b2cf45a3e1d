//! Collaborator contracts.
//!
//! Trait seams between the lifecycle core and the device/session stacks it
//! coordinates. The core only ever holds these by reference; every resource
//! stays exclusively owned by the application and is released through the
//! teardown sequence, never by a callback.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::eloop::EventLoop;
use crate::symbols::SymbolTable;

/// Handle identifying a display managed by the video subsystem.
///
/// Displays are owned by the video subsystem; the terminal session's
/// attached-output set holds these ids as references, never ownership.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayId(u32);

impl DisplayId {
    /// Create an id from a raw value.
    #[must_use]
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// The raw numeric value.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// Power/configuration state of a display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayState {
    /// Mode set and scanning out.
    Active,
    /// Connected but not yet activated.
    Inactive,
}

/// One input event, already decoded by the input stack.
///
/// Protocol decoding happens in the input collaborator; the core only
/// forwards events to the terminal session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEvent {
    /// Hardware keycode.
    pub keycode: u32,
    /// Decoded Unicode scalar, when the event produces one.
    pub unicode: Option<char>,
}

impl InputEvent {
    /// Event carrying a decoded scalar.
    #[must_use]
    pub fn from_char(keycode: u32, c: char) -> Self {
        Self {
            keycode,
            unicode: Some(c),
        }
    }
}

/// Errors from the video subsystem.
#[derive(Debug, Error)]
pub enum VideoError {
    /// Waking the subsystem failed; displays stay unusable until the next
    /// wake attempt.
    #[error("video wake failed: {0}")]
    WakeFailed(String),
    /// The display is not (or no longer) known to the subsystem.
    #[error("unknown {0}")]
    UnknownDisplay(DisplayId),
    /// Activating a display failed. Non-fatal to the remaining displays.
    #[error("cannot activate {display}: {reason}")]
    ActivationFailed {
        /// The display that failed to activate.
        display: DisplayId,
        /// Device-specific reason.
        reason: String,
    },
}

/// Errors from the input subsystem.
#[derive(Debug, Error)]
pub enum InputError {
    /// Subscribing the event callback failed.
    #[error("input subscription failed: {0}")]
    SubscribeFailed(String),
}

/// Errors from the terminal session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is closed; no further outputs or input are accepted.
    #[error("session is closed")]
    Closed,
    /// Attaching a display as an output target failed.
    #[error("cannot attach {display}: {reason}")]
    AttachFailed {
        /// The display that could not be attached.
        display: DisplayId,
        /// Session-specific reason.
        reason: String,
    },
    /// Input delivery failed unrecoverably; the session must be closed.
    #[error("input delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Error from a backend constructor during application setup.
#[derive(Debug, Error)]
#[error("cannot open {what}: {reason}")]
pub struct BackendError {
    /// Which resource failed to open.
    pub what: &'static str,
    /// Backend-specific reason.
    pub reason: String,
}

impl BackendError {
    /// Create a constructor error.
    pub fn new(what: &'static str, reason: impl Into<String>) -> Self {
        Self {
            what,
            reason: reason.into(),
        }
    }
}

/// Callback receiving decoded input events.
pub type InputCallback = Box<dyn FnMut(&InputEvent)>;

/// Callback invoked once when the terminal session closes.
///
/// Runs while the session is mid-close; it must not call back into the
/// session.
pub type CloseHook = Box<dyn FnMut()>;

/// The video subsystem: display enumeration, activation, and power state.
pub trait VideoSubsystem {
    /// Wake the subsystem so displays can be activated and scanned out.
    fn wake(&mut self) -> Result<(), VideoError>;

    /// Put the subsystem to sleep. Idempotent.
    fn sleep(&mut self);

    /// Enumerate currently-connected displays.
    fn displays(&self) -> Vec<DisplayId>;

    /// Current state of one display, if it is known.
    fn display_state(&self, display: DisplayId) -> Option<DisplayState>;

    /// Activate an inactive display.
    fn activate_display(&mut self, display: DisplayId) -> Result<(), VideoError>;
}

/// The input subsystem: event subscription and power state.
pub trait InputSubsystem {
    /// Start producing events. Idempotent.
    fn wake(&mut self);

    /// Stop producing events. Idempotent, and strictly ordered before device
    /// release on a VT leave.
    fn sleep(&mut self);

    /// Subscribe the event callback. A second subscription replaces the
    /// first.
    fn connect(&mut self, callback: InputCallback) -> Result<(), InputError>;

    /// Drop the subscription. Idempotent.
    fn disconnect(&mut self);
}

/// The terminal session: attached outputs, input delivery, close lifecycle.
pub trait TerminalSession {
    /// Open the session and register the close-notification hook.
    ///
    /// The hook runs exactly once, when the session closes, whether by
    /// request or on its own.
    fn open(&mut self, on_close: CloseHook) -> Result<(), SessionError>;

    /// Close the session. Idempotent; the close hook fires on the first call
    /// only.
    fn close(&mut self);

    /// Attach a display as an output target. Attaching an already-attached
    /// display is a no-op.
    fn attach_output(&mut self, display: DisplayId) -> Result<(), SessionError>;

    /// Detach one display. Idempotent.
    fn detach_output(&mut self, display: DisplayId);

    /// Detach every attached display.
    fn detach_all_outputs(&mut self);

    /// The currently-attached outputs, in attachment order.
    fn attached_outputs(&self) -> Vec<DisplayId>;

    /// Deliver one input event. An `Err` is unrecoverable: the caller closes
    /// the session and requests termination.
    fn deliver_input(&mut self, event: &InputEvent) -> Result<(), SessionError>;
}

/// Bundle of fallible collaborator constructors.
///
/// The orchestrator calls these in dependency order during setup; any failure
/// aborts setup and unwinds the already-constructed prefix.
pub trait SessionBackend {
    /// Video subsystem implementation.
    type Video: VideoSubsystem + 'static;
    /// Input subsystem implementation.
    type Input: InputSubsystem + 'static;
    /// Terminal session implementation.
    type Term: TerminalSession + 'static;

    /// Open the video context, registering any device sources on the loop.
    fn open_video(&mut self, eloop: &mut EventLoop) -> Result<Self::Video, BackendError>;

    /// Open the input context.
    fn open_input(&mut self, eloop: &mut EventLoop) -> Result<Self::Input, BackendError>;

    /// Open the terminal session over the shared symbol table.
    fn open_terminal(
        &mut self,
        eloop: &mut EventLoop,
        symbols: Rc<RefCell<SymbolTable>>,
    ) -> Result<Self::Term, BackendError>;
}
