//! Process-wide termination flag.
//!
//! The flag is the only piece of mutable state in the crate that may be
//! touched from outside the dispatch thread: a genuine OS signal handler is
//! allowed to write it. The write is a single lock-free atomic store with no
//! heap access and no locks, satisfying the async-signal-safety contract.
//! Everything else in the crate is confined to the single dispatch thread.
//!
//! Lifecycle: initialized false at process start, set true by a termination
//! signal or a fatal session/input error, read once per event-loop iteration.
//! It is never reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared termination flag.
///
/// Clones share the same underlying atomic, so callbacks can capture a handle
/// without taking ownership of anything else.
#[derive(Clone, Debug, Default)]
pub struct TerminateFlag(Arc<AtomicBool>);

impl TerminateFlag {
    /// Create a new flag, initially unset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination.
    ///
    /// Async-signal-safe: a single atomic store.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether termination has been requested.
    ///
    /// Read from the dispatch thread at the top of each loop iteration.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
