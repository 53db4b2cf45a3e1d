//! vtcon Core - Session Lifecycle Control for VT-Hosted Displays
//!
//! This crate coordinates an interactive display session running atop a
//! kernel virtual-terminal facility: OS signals, VT foreground/background
//! switches, and the orderly acquisition and release of display and input
//! devices, all from a single cooperative event loop.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Application                            │
//! │                                                               │
//! │  SIGTERM ─┐                                                   │
//! │  SIGINT  ─┼──▶ terminate flag ◀── session close / input error │
//! │  SIGCHLD ─┴──▶ reap loop                                      │
//! │                                                               │
//! │  SIGUSR1/2 ──▶ VtController ──▶ switch handler                │
//! │                                  ENTER: video wake →          │
//! │                                         reconcile outputs →   │
//! │                                         input wake            │
//! │                                  LEAVE: input sleep →         │
//! │                                         detach outputs →      │
//! │                                         video sleep           │
//! │                                                               │
//! │  input events ──▶ forwarder ──▶ TerminalSession               │
//! └───────────────────┬───────────────────────────────────────────┘
//!                     │ one blocking dispatch() per loop iteration
//!                 EventLoop (epoll + signalfd)
//! ```
//!
//! Everything runs on one thread; every callback executes synchronously
//! inside `dispatch()`. The termination flag is the single piece of state
//! writable from an asynchronous signal context, and it is a lock-free
//! atomic.
//!
//! # Collaborators
//!
//! Terminal emulation, video drivers, and input decoding are external: the
//! core drives them through the traits in [`backend`], and ships complete
//! in-memory implementations in [`backend::headless`] for testing and for
//! running without devices.
//!
//! # Module Overview
//!
//! - [`app`]: application orchestrator: ordered setup, callback wiring, the
//!   run loop, reverse-order teardown
//! - [`backend`]: collaborator contracts and the headless implementations
//! - [`config`]: layered configuration (defaults, TOML file, environment)
//! - [`eloop`]: the cooperative event loop (epoll + signalfd)
//! - [`outputs`]: display activation and attachment policy
//! - [`reap`]: SIGCHLD child collection
//! - [`symbols`]: grapheme-sequence interner shared with the session
//! - [`terminate`]: the process-wide termination flag
//! - [`vt`]: VT switch controller, kernel VT binding, simulated VT

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod app;
pub mod backend;
pub mod config;
pub mod eloop;
pub mod outputs;
pub mod reap;
pub mod symbols;
pub mod terminate;
pub mod vt;

// Re-exports for convenience
pub use app::{handle_switch, Application, SetupError};
pub use backend::{
    BackendError, DisplayId, DisplayState, HeadlessBackend, InputError, InputEvent,
    InputSubsystem, Journal, OpenStep, SessionBackend, SessionError, TerminalSession, VideoError,
    VideoSubsystem,
};
pub use config::{load_config, Config, ConfigError, ConfigFile, VtMode};
pub use eloop::{EventLoop, FdWatcher, Interest, LoopError, Readiness, SignalWatcher};
pub use outputs::{reconcile_outputs, OutputOutcome, ReconcileReport};
pub use reap::{collect_exited, ChildExit, ReapReport, ReapedChild};
pub use symbols::{Symbol, SymbolTable};
pub use terminate::TerminateFlag;
pub use vt::kernel::KernelVt;
pub use vt::sim::SimVt;
pub use vt::{SwitchAction, SwitchReply, VtController, VtDevice, VtError};
