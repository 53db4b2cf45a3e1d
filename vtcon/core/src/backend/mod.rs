//! Device and session collaborators.
//!
//! The lifecycle core is collaborator-agnostic: it drives any video, input,
//! and terminal-session implementation through the traits in [`traits`]. Real
//! driver stacks (DRM mode-setting, evdev decoding, glyph rendering) live
//! outside this crate; [`headless`] provides complete in-memory
//! implementations for testing, automation, and running without devices.

pub mod headless;
pub mod traits;

pub use headless::{HeadlessBackend, HeadlessInput, HeadlessTerminal, HeadlessVideo, Journal, OpenStep};
pub use traits::{
    BackendError, CloseHook, DisplayId, DisplayState, InputCallback, InputError, InputEvent,
    InputSubsystem, SessionBackend, SessionError, TerminalSession, VideoError, VideoSubsystem,
};
