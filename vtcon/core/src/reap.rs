//! Child-process reaping.
//!
//! Signal-based child-exit notification coalesces: when several children exit
//! inside one delivery window, only a single SIGCHLD may be observed. The
//! collector therefore loops over a non-blocking wait-for-any-child until
//! nothing is left to collect, instead of waiting once per notification.
//!
//! The loop stops on two conditions: no child is eligible for collection
//! (either none has exited yet, or no children exist at all), which is the
//! normal exit, or the wait call itself fails with anything other than "no
//! children exist", which is logged as a warning. Reap failures never
//! influence the termination flag or the process exit status.

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// How a collected child terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildExit {
    /// Normal exit with the given status code.
    Code(i32),
    /// Terminated by the given signal.
    Signal(Signal),
}

/// One collected (pid, exit status) pair.
///
/// Transient: produced by the reap loop, consumed immediately for logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReapedChild {
    /// Process id of the collected child.
    pub pid: Pid,
    /// How it terminated.
    pub exit: ChildExit,
}

/// Outcome of one reap pass.
#[derive(Debug, Default)]
pub struct ReapReport {
    /// Children collected this pass, in collection order.
    pub reaped: Vec<ReapedChild>,
    /// Wait error that stopped the loop, if it was not a normal stop.
    pub error: Option<Errno>,
    /// Total wait calls performed, including the final one that stopped the
    /// loop. N collected children take exactly N+1 calls.
    pub wait_calls: usize,
}

/// Run the reap loop over an arbitrary wait primitive.
///
/// Generic so the loop shape is testable without spawning real children; the
/// production path is [`collect_exited`].
pub(crate) fn drain<W>(mut wait: W) -> ReapReport
where
    W: FnMut() -> nix::Result<WaitStatus>,
{
    let mut report = ReapReport::default();

    loop {
        report.wait_calls += 1;
        match wait() {
            // No children exist: nothing to collect, normal stop.
            Err(Errno::ECHILD) => break,
            Err(err) => {
                report.error = Some(err);
                break;
            }
            // Children exist but none has exited: normal stop.
            Ok(WaitStatus::StillAlive) => break,
            Ok(WaitStatus::Exited(pid, code)) => report.reaped.push(ReapedChild {
                pid,
                exit: ChildExit::Code(code),
            }),
            Ok(WaitStatus::Signaled(pid, signal, _)) => report.reaped.push(ReapedChild {
                pid,
                exit: ChildExit::Signal(signal),
            }),
            // Stop/continue events are not requested and not collected.
            Ok(_) => {}
        }
    }

    report
}

/// Collect every exited child and log each one.
///
/// Invoked from the SIGCHLD watcher. Returns the report so callers (and
/// tests) can observe what one pass did.
pub fn collect_exited() -> ReapReport {
    let report = drain(|| waitpid(None, Some(WaitPidFlag::WNOHANG)));

    for child in &report.reaped {
        match child.exit {
            ChildExit::Code(0) => debug!(pid = %child.pid, "child exited successfully"),
            ChildExit::Code(code) => info!(pid = %child.pid, status = code, "child exited with non-zero status"),
            ChildExit::Signal(signal) => debug!(pid = %child.pid, signal = ?signal, "child terminated by signal"),
        }
    }

    if let Some(err) = report.error {
        warn!(error = %err, "cannot wait on child");
    }

    report
}
