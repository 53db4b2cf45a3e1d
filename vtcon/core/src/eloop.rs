//! Cooperative event loop.
//!
//! A single-threaded dispatcher over `epoll(7)`. Signals are consumed through
//! a `signalfd(2)` so their handlers run synchronously on the dispatch thread
//! like every other callback; watched signals are blocked for the thread and
//! queue in the kernel until the next dispatch drains them. This serializes
//! all delivery: no handler ever observes another handler mid-flight.
//!
//! Sources live in a registration table keyed by source id. Watcher handles
//! are consumed on unregistration, so a source cannot be released twice.
//!
//! `dispatch()` is the only blocking point: one iteration waits (without
//! timeout) for any source to become ready, runs the ready handlers, and
//! returns. Callers poll their own termination condition between iterations.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::os::fd::{BorrowedFd, RawFd};
use std::rc::Rc;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use thiserror::Error;
use tracing::warn;

/// Reserved source id for the loop's own signalfd.
const SIGNAL_SOURCE_ID: u64 = 0;

/// Errors from event-loop operations.
#[derive(Debug, Error)]
pub enum LoopError {
    /// Creating the epoll instance or signalfd failed.
    #[error("cannot create event loop: {0}")]
    Create(Errno),
    /// Registering a source with the kernel failed.
    #[error("cannot register event source: {0}")]
    Register(Errno),
    /// Adjusting the signal mask or signalfd failed.
    #[error("cannot update signal mask: {0}")]
    SignalMask(Errno),
    /// The blocking wait itself failed.
    #[error("event wait failed: {0}")]
    Wait(Errno),
}

/// Readiness of an fd source, as reported to its handler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Data can be read without blocking.
    pub readable: bool,
    /// Data can be written without blocking.
    pub writable: bool,
    /// The peer hung up or the fd is in an error state.
    pub hangup: bool,
}

impl Readiness {
    fn from_flags(flags: EpollFlags) -> Self {
        Self {
            readable: flags.intersects(EpollFlags::EPOLLIN),
            writable: flags.intersects(EpollFlags::EPOLLOUT),
            hangup: flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR),
        }
    }
}

/// What readiness an fd source is watched for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    /// Readable only.
    Read,
    /// Writable only.
    Write,
    /// Readable or writable.
    ReadWrite,
}

impl Interest {
    fn flags(self) -> EpollFlags {
        match self {
            Self::Read => EpollFlags::EPOLLIN,
            Self::Write => EpollFlags::EPOLLOUT,
            Self::ReadWrite => EpollFlags::EPOLLIN | EpollFlags::EPOLLOUT,
        }
    }
}

/// Handle to a registered signal source. Consumed on unregistration.
#[derive(Debug)]
pub struct SignalWatcher {
    id: u64,
    signal: Signal,
}

/// Handle to a registered fd source. Consumed on unregistration.
#[derive(Debug)]
pub struct FdWatcher {
    id: u64,
}

type SignalHandler = Rc<RefCell<dyn FnMut(Signal)>>;
type FdHandler = Rc<RefCell<dyn FnMut(Readiness)>>;

struct SignalSource {
    signal: Signal,
    handler: SignalHandler,
}

struct FdSource {
    fd: RawFd,
    handler: FdHandler,
}

/// The cooperative event loop.
pub struct EventLoop {
    epoll: Epoll,
    signal_fd: SignalFd,
    mask: SigSet,
    // BTreeMap: ids are monotonic, so iteration order is registration order.
    signal_sources: BTreeMap<u64, SignalSource>,
    fd_sources: HashMap<u64, FdSource>,
    next_id: u64,
}

impl EventLoop {
    /// Create an empty loop.
    pub fn new() -> Result<Self, LoopError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC).map_err(LoopError::Create)?;
        let mask = SigSet::empty();
        let signal_fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(LoopError::Create)?;
        epoll
            .add(
                &signal_fd,
                EpollEvent::new(EpollFlags::EPOLLIN, SIGNAL_SOURCE_ID),
            )
            .map_err(LoopError::Register)?;

        Ok(Self {
            epoll,
            signal_fd,
            mask,
            signal_sources: BTreeMap::new(),
            fd_sources: HashMap::new(),
            next_id: SIGNAL_SOURCE_ID + 1,
        })
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Subscribe a handler to an OS signal.
    ///
    /// The signal is blocked for the calling thread and delivered through the
    /// loop's signalfd; the handler runs inside [`dispatch`](Self::dispatch).
    /// Several watchers may share one signal; they run in registration order.
    pub fn watch_signal<F>(&mut self, signal: Signal, handler: F) -> Result<SignalWatcher, LoopError>
    where
        F: FnMut(Signal) + 'static,
    {
        if !self.mask.contains(signal) {
            let mut one = SigSet::empty();
            one.add(signal);
            one.thread_block().map_err(LoopError::SignalMask)?;
            self.mask.add(signal);
            if let Err(err) = self.signal_fd.set_mask(&self.mask) {
                // Don't leave the signal blocked with nothing reading it.
                self.mask.remove(signal);
                let _ = one.thread_unblock();
                return Err(LoopError::SignalMask(err));
            }
        }

        let id = self.next_id();
        self.signal_sources.insert(
            id,
            SignalSource {
                signal,
                handler: Rc::new(RefCell::new(handler)),
            },
        );
        Ok(SignalWatcher { id, signal })
    }

    /// Remove a signal watcher.
    ///
    /// When the last watcher for a signal goes away the signal is dropped
    /// from the signalfd mask and unblocked again. Best-effort: mask errors
    /// during teardown are logged, not propagated.
    pub fn unwatch_signal(&mut self, watcher: SignalWatcher) {
        self.signal_sources.remove(&watcher.id);

        let still_watched = self
            .signal_sources
            .values()
            .any(|source| source.signal == watcher.signal);
        if still_watched {
            return;
        }

        self.mask.remove(watcher.signal);
        if let Err(err) = self.signal_fd.set_mask(&self.mask) {
            warn!(signal = ?watcher.signal, error = %err, "cannot shrink signalfd mask");
        }
        let mut one = SigSet::empty();
        one.add(watcher.signal);
        if let Err(err) = one.thread_unblock() {
            warn!(signal = ?watcher.signal, error = %err, "cannot unblock signal");
        }
    }

    /// Watch a file descriptor for readiness.
    ///
    /// The caller keeps ownership of the fd and must keep it open for the
    /// lifetime of the watcher.
    pub fn watch_fd<F>(
        &mut self,
        fd: RawFd,
        interest: Interest,
        handler: F,
    ) -> Result<FdWatcher, LoopError>
    where
        F: FnMut(Readiness) + 'static,
    {
        let id = self.next_id();
        let event = EpollEvent::new(interest.flags(), id);
        // Safety: the caller guarantees the fd outlives the watcher.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        self.epoll.add(borrowed, event).map_err(LoopError::Register)?;
        self.fd_sources.insert(id, FdSource {
            fd,
            handler: Rc::new(RefCell::new(handler)),
        });
        Ok(FdWatcher { id })
    }

    /// Remove an fd watcher.
    pub fn unwatch_fd(&mut self, watcher: FdWatcher) {
        if let Some(source) = self.fd_sources.remove(&watcher.id) {
            // Safety: the fd was valid at registration; deletion of an
            // already-closed fd only produces a kernel error we tolerate.
            let borrowed = unsafe { BorrowedFd::borrow_raw(source.fd) };
            if let Err(err) = self.epoll.delete(borrowed) {
                warn!(fd = source.fd, error = %err, "cannot delete fd source");
            }
        }
    }

    /// Number of registered sources, signals and fds combined.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.signal_sources.len() + self.fd_sources.len()
    }

    /// One blocking dispatch iteration.
    ///
    /// Waits without timeout for any source to become ready and runs the
    /// ready handlers synchronously. An interrupted wait (`EINTR`) is a
    /// normal, empty iteration. Any other wait failure is fatal to the loop.
    pub fn dispatch(&mut self) -> Result<(), LoopError> {
        let mut events = vec![EpollEvent::empty(); 32];
        let count = match self.epoll.wait(&mut events, EpollTimeout::NONE) {
            Ok(count) => count,
            Err(Errno::EINTR) => return Ok(()),
            Err(err) => return Err(LoopError::Wait(err)),
        };

        let ready: Vec<(u64, EpollFlags)> = events[..count]
            .iter()
            .map(|event| (event.data(), event.events()))
            .collect();

        for (id, flags) in ready {
            if id == SIGNAL_SOURCE_ID {
                self.drain_signals();
            } else {
                // Clone the handler out of the table so a handler that was
                // unregistered by an earlier callback this round is skipped.
                let handler = self
                    .fd_sources
                    .get(&id)
                    .map(|source| Rc::clone(&source.handler));
                if let Some(handler) = handler {
                    (handler.borrow_mut())(Readiness::from_flags(flags));
                }
            }
        }
        Ok(())
    }

    /// Read every queued signal off the signalfd and run its watchers.
    fn drain_signals(&mut self) {
        loop {
            match self.signal_fd.read_signal() {
                Ok(Some(info)) => {
                    let Ok(signal) = Signal::try_from(info.ssi_signo as i32) else {
                        continue;
                    };
                    let handlers: Vec<SignalHandler> = self
                        .signal_sources
                        .values()
                        .filter(|source| source.signal == signal)
                        .map(|source| Rc::clone(&source.handler))
                        .collect();
                    for handler in handlers {
                        (handler.borrow_mut())(signal);
                    }
                }
                Ok(None) => break,
                Err(Errno::EINTR) => {}
                Err(err) => {
                    warn!(error = %err, "cannot read signalfd");
                    break;
                }
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // Leave the thread's signal mask the way we found it.
        let _ = self.mask.thread_unblock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;
    use std::cell::Cell;
    use std::io::Write;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_fd_source_fires_once_ready() {
        let mut eloop = EventLoop::new().expect("event loop");
        let (rx, mut tx) = std::io::pipe().expect("pipe");

        let hits = Rc::new(Cell::new(0u32));
        let seen = Rc::clone(&hits);
        let watcher = eloop
            .watch_fd(rx.as_raw_fd(), Interest::Read, move |ready| {
                assert!(ready.readable);
                seen.set(seen.get() + 1);
            })
            .expect("watch fd");
        assert_eq!(eloop.source_count(), 1);

        tx.write_all(b"x").expect("write");
        eloop.dispatch().expect("dispatch");
        assert_eq!(hits.get(), 1);

        eloop.unwatch_fd(watcher);
        assert_eq!(eloop.source_count(), 0);
    }

    #[test]
    fn test_signal_source_runs_on_dispatch_thread() {
        let mut eloop = EventLoop::new().expect("event loop");

        let seen = Rc::new(Cell::new(None));
        let record = Rc::clone(&seen);
        let watcher = eloop
            .watch_signal(Signal::SIGUSR1, move |signal| {
                record.set(Some(signal));
            })
            .expect("watch signal");

        // raise() targets the calling thread; the signal is blocked here and
        // queues on the signalfd until dispatch drains it.
        raise(Signal::SIGUSR1).expect("raise");
        eloop.dispatch().expect("dispatch");
        assert_eq!(seen.get(), Some(Signal::SIGUSR1));

        eloop.unwatch_signal(watcher);
        assert_eq!(eloop.source_count(), 0);
    }

    #[test]
    fn test_watchers_for_one_signal_run_in_registration_order() {
        let mut eloop = EventLoop::new().expect("event loop");

        let order = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&order);
        let second = Rc::clone(&order);
        let a = eloop
            .watch_signal(Signal::SIGUSR2, move |_| first.borrow_mut().push("first"))
            .expect("watch");
        let b = eloop
            .watch_signal(Signal::SIGUSR2, move |_| second.borrow_mut().push("second"))
            .expect("watch");

        raise(Signal::SIGUSR2).expect("raise");
        eloop.dispatch().expect("dispatch");
        assert_eq!(*order.borrow(), vec!["first", "second"]);

        eloop.unwatch_signal(a);
        eloop.unwatch_signal(b);
    }
}
