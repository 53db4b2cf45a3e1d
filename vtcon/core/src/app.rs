//! Application orchestration.
//!
//! `Application` constructs every component of a session in dependency order,
//! wires the callbacks between them, and drives the event loop until
//! termination:
//!
//! ```text
//! event loop → SIGTERM watcher → SIGINT watcher → SIGCHLD watcher
//!   → symbol table → video context → input context
//!   → VT controller (opened) → terminal session (opened)
//! ```
//!
//! Teardown is the exact reverse, each handle released exactly once, also
//! when construction fails partway: the already-constructed prefix is
//! unwound and the originating error returned, with nothing leaked and
//! nothing released twice. Teardown is self-guarding; running it a second
//! time is a no-op.
//!
//! All callbacks run synchronously inside `dispatch()`. Collaborators are
//! shared with the callbacks as `Rc<RefCell<_>>` clones; ownership never
//! moves out of `Application`.

use std::cell::RefCell;
use std::rc::Rc;

use nix::sys::signal::Signal;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backend::traits::{
    BackendError, InputError, InputEvent, InputSubsystem, SessionBackend, SessionError,
    TerminalSession, VideoSubsystem,
};
use crate::eloop::{EventLoop, LoopError, SignalWatcher};
use crate::outputs::reconcile_outputs;
use crate::reap;
use crate::symbols::SymbolTable;
use crate::terminate::TerminateFlag;
use crate::vt::{SwitchAction, SwitchReply, VtController, VtDevice, VtError};

/// A construction step failed; setup was aborted and unwound.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Creating the event loop failed.
    #[error("cannot create event loop: {0}")]
    EventLoop(LoopError),
    /// Registering a signal watcher failed.
    #[error("cannot register signal watcher: {0}")]
    SignalWatcher(LoopError),
    /// Opening the video context failed.
    #[error("cannot open video context: {0}")]
    Video(BackendError),
    /// Opening the input context failed.
    #[error("cannot open input context: {0}")]
    Input(BackendError),
    /// Opening the VT session failed.
    #[error("cannot open VT session: {0}")]
    Vt(VtError),
    /// Constructing the terminal session failed.
    #[error("cannot open terminal session: {0}")]
    Terminal(BackendError),
    /// Opening the constructed terminal session failed.
    #[error("cannot start terminal session: {0}")]
    TerminalOpen(SessionError),
    /// Subscribing the input forwarder failed.
    #[error("cannot subscribe input events: {0}")]
    Subscribe(InputError),
}

/// Handle one VT switch for a session's collaborators.
///
/// ENTER: wake video, and only if that succeeds reconcile the displays; then
/// wake input either way (a failed video wake leaves the session blind but
/// still steerable). LEAVE runs the reverse bracket: input stops producing
/// events first, then every display is detached, then video sleeps.
///
/// Always returns [`SwitchReply::Accepted`]; switch outcomes never veto the
/// switch itself.
pub fn handle_switch<V, I, T>(
    action: SwitchAction,
    video: &Rc<RefCell<V>>,
    input: &Rc<RefCell<I>>,
    term: &Rc<RefCell<T>>,
) -> SwitchReply
where
    V: VideoSubsystem,
    I: InputSubsystem,
    T: TerminalSession,
{
    match action {
        SwitchAction::Enter => {
            let woke = video.borrow_mut().wake();
            match woke {
                Ok(()) => {
                    let report = reconcile_outputs(
                        &mut *video.borrow_mut(),
                        &mut *term.borrow_mut(),
                    );
                    info!(
                        attached = report.attached(),
                        skipped = report.skipped(),
                        "VT entered, outputs reconciled"
                    );
                }
                Err(err) => {
                    warn!(error = %err, "cannot wake video on VT enter; no outputs this round");
                }
            }
            // Woken even when video stayed asleep.
            input.borrow_mut().wake();
        }
        SwitchAction::Leave => {
            // Input stops producing events before the displays it may still
            // reference are released.
            input.borrow_mut().sleep();
            term.borrow_mut().detach_all_outputs();
            video.borrow_mut().sleep();
            info!("VT left, outputs detached");
        }
    }
    SwitchReply::Accepted
}

/// The assembled session application.
///
/// Owns every resource exclusively. Construction happens in
/// [`Application::setup`], [`run`](Self::run) drives the loop, and
/// [`teardown`](Self::teardown) releases everything (drop runs it as a last
/// resort).
pub struct Application<B: SessionBackend, D: VtDevice + 'static> {
    terminate: TerminateFlag,
    eloop: EventLoop,
    sig_term: Option<SignalWatcher>,
    sig_int: Option<SignalWatcher>,
    sig_chld: Option<SignalWatcher>,
    symbols: Option<Rc<RefCell<SymbolTable>>>,
    video: Option<Rc<RefCell<B::Video>>>,
    input: Option<Rc<RefCell<B::Input>>>,
    vt: Option<VtController<D>>,
    term: Option<Rc<RefCell<B::Term>>>,
}

impl<B: SessionBackend, D: VtDevice + 'static> std::fmt::Debug for Application<B, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").finish_non_exhaustive()
    }
}

impl<B: SessionBackend, D: VtDevice + 'static> Application<B, D> {
    /// Construct the full application.
    ///
    /// Runs the ordered setup sequence; on any step's failure the
    /// already-constructed prefix is torn down in reverse order and the
    /// originating error returned.
    pub fn setup<F>(backend: &mut B, open_vt: F) -> Result<Self, SetupError>
    where
        F: FnOnce() -> Result<D, VtError>,
    {
        let eloop = EventLoop::new().map_err(SetupError::EventLoop)?;
        let mut app = Self {
            terminate: TerminateFlag::new(),
            eloop,
            sig_term: None,
            sig_int: None,
            sig_chld: None,
            symbols: None,
            video: None,
            input: None,
            vt: None,
            term: None,
        };
        match app.build(backend, open_vt) {
            Ok(()) => Ok(app),
            Err(err) => {
                app.teardown();
                Err(err)
            }
        }
    }

    fn build<F>(&mut self, backend: &mut B, open_vt: F) -> Result<(), SetupError>
    where
        F: FnOnce() -> Result<D, VtError>,
    {
        // Termination watchers: the flag write is the only thing that may
        // happen in signal context.
        let flag = self.terminate.clone();
        self.sig_term = Some(
            self.eloop
                .watch_signal(Signal::SIGTERM, move |_| flag.request())
                .map_err(SetupError::SignalWatcher)?,
        );
        let flag = self.terminate.clone();
        self.sig_int = Some(
            self.eloop
                .watch_signal(Signal::SIGINT, move |_| flag.request())
                .map_err(SetupError::SignalWatcher)?,
        );
        self.sig_chld = Some(
            self.eloop
                .watch_signal(Signal::SIGCHLD, |_| {
                    reap::collect_exited();
                })
                .map_err(SetupError::SignalWatcher)?,
        );

        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        self.symbols = Some(Rc::clone(&symbols));

        let video = Rc::new(RefCell::new(
            backend
                .open_video(&mut self.eloop)
                .map_err(SetupError::Video)?,
        ));
        self.video = Some(Rc::clone(&video));

        let input = Rc::new(RefCell::new(
            backend
                .open_input(&mut self.eloop)
                .map_err(SetupError::Input)?,
        ));
        self.input = Some(Rc::clone(&input));

        let device = open_vt().map_err(SetupError::Vt)?;
        let vt = VtController::open(device, &mut self.eloop).map_err(SetupError::Vt)?;
        self.vt = Some(vt);

        let term = Rc::new(RefCell::new(
            backend
                .open_terminal(&mut self.eloop, Rc::clone(&symbols))
                .map_err(SetupError::Terminal)?,
        ));
        self.term = Some(Rc::clone(&term));

        // Close notification: the session marks itself closed before the
        // hook runs; only the flag write is left to us.
        let flag = self.terminate.clone();
        term.borrow_mut()
            .open(Box::new(move || {
                info!("terminal session closed");
                flag.request();
            }))
            .map_err(SetupError::TerminalOpen)?;

        // Input forwarder: every event goes to the session; an unrecoverable
        // delivery failure closes the session and requests termination.
        let forwarder = {
            let term = Rc::clone(&term);
            let flag = self.terminate.clone();
            move |event: &InputEvent| {
                let delivered = term.borrow_mut().deliver_input(event);
                if let Err(err) = delivered {
                    error!(error = %err, "unrecoverable input delivery failure, closing session");
                    term.borrow_mut().close();
                    flag.request();
                }
            }
        };
        input
            .borrow_mut()
            .connect(Box::new(forwarder))
            .map_err(SetupError::Subscribe)?;

        // Switch handler last: registration may synthesize the initial ENTER,
        // which touches all three collaborators.
        let switch = {
            let video = Rc::clone(&video);
            let input = Rc::clone(&input);
            let term = Rc::clone(&term);
            move |action| handle_switch(action, &video, &input, &term)
        };
        if let Some(vt) = self.vt.as_mut() {
            vt.set_switch_handler(switch);
        }

        debug!("application setup complete");
        Ok(())
    }

    /// A handle to the termination flag.
    #[must_use]
    pub fn terminate_flag(&self) -> TerminateFlag {
        self.terminate.clone()
    }

    /// The shared video context, while the application is set up.
    #[must_use]
    pub fn video(&self) -> Option<Rc<RefCell<B::Video>>> {
        self.video.clone()
    }

    /// The shared input context, while the application is set up.
    #[must_use]
    pub fn input(&self) -> Option<Rc<RefCell<B::Input>>> {
        self.input.clone()
    }

    /// The shared terminal session, while the application is set up.
    #[must_use]
    pub fn terminal(&self) -> Option<Rc<RefCell<B::Term>>> {
        self.term.clone()
    }

    /// Drive the loop until termination.
    ///
    /// The flag is observed once per iteration, before blocking: a request
    /// made mid-dispatch takes effect at the top of the next round. A
    /// dispatch error ends the loop with that error. Either way the caller
    /// runs [`teardown`](Self::teardown) next (drop does it as a last
    /// resort).
    pub fn run(&mut self) -> Result<(), LoopError> {
        info!("entering dispatch loop");
        loop {
            if self.terminate.is_requested() {
                info!("termination requested, leaving dispatch loop");
                return Ok(());
            }
            self.eloop.dispatch()?;
        }
    }

    /// Release every resource in reverse construction order.
    ///
    /// Each release happens exactly once; every step self-guards, so calling
    /// this on an already-torn-down application has no effect.
    pub fn teardown(&mut self) {
        if let Some(term) = self.term.take() {
            term.borrow_mut().close();
        }
        if let Some(mut vt) = self.vt.take() {
            vt.close(&mut self.eloop);
        }
        if let Some(input) = self.input.take() {
            // Dropping the subscription releases the forwarder and with it
            // the last shared handle on the terminal session.
            input.borrow_mut().disconnect();
        }
        self.video.take();
        self.symbols.take();
        if let Some(watcher) = self.sig_chld.take() {
            self.eloop.unwatch_signal(watcher);
        }
        if let Some(watcher) = self.sig_int.take() {
            self.eloop.unwatch_signal(watcher);
        }
        if let Some(watcher) = self.sig_term.take() {
            self.eloop.unwatch_signal(watcher);
        }
        // The event loop itself is released when the value drops, last of
        // all.
    }
}

impl<B: SessionBackend, D: VtDevice + 'static> Drop for Application<B, D> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessInput, HeadlessTerminal, HeadlessVideo, Journal};
    use crate::backend::traits::DisplayId;

    fn collaborators(
        journal: &Journal,
        displays: u32,
    ) -> (
        Rc<RefCell<HeadlessVideo>>,
        Rc<RefCell<HeadlessInput>>,
        Rc<RefCell<HeadlessTerminal>>,
    ) {
        let video = Rc::new(RefCell::new(HeadlessVideo::new(journal.clone(), displays)));
        let input = Rc::new(RefCell::new(HeadlessInput::new(journal.clone())));
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let term = Rc::new(RefCell::new(HeadlessTerminal::new(journal.clone(), symbols)));
        term.borrow_mut().open(Box::new(|| {})).expect("open");
        (video, input, term)
    }

    #[test]
    fn test_enter_wakes_input_after_reconciliation() {
        let journal = Journal::new();
        let (video, input, term) = collaborators(&journal, 1);

        let reply = handle_switch(SwitchAction::Enter, &video, &input, &term);

        assert_eq!(reply, SwitchReply::Accepted);
        let wake = journal.position("input: wake").expect("input woken");
        let attach = journal
            .position("terminal: attach display-0")
            .expect("display attached");
        assert!(
            attach < wake,
            "input wake must follow display reconciliation"
        );
    }

    #[test]
    fn test_leave_sleeps_input_before_detaching() {
        let journal = Journal::new();
        let (video, input, term) = collaborators(&journal, 1);
        handle_switch(SwitchAction::Enter, &video, &input, &term);

        let reply = handle_switch(SwitchAction::Leave, &video, &input, &term);

        assert_eq!(reply, SwitchReply::Accepted);
        let sleep = journal.position("input: sleep").expect("input slept");
        let detach = journal.position("terminal: detach-all").expect("detached");
        let video_sleep = journal.position("video: sleep").expect("video slept");
        assert!(sleep < detach, "input sleep must precede detachment");
        assert!(detach < video_sleep, "detachment must precede video sleep");
        assert!(term.borrow().attached_outputs().is_empty());
    }

    #[test]
    fn test_failed_video_wake_still_wakes_input() {
        let journal = Journal::new();
        let video = Rc::new(RefCell::new(
            HeadlessVideo::new(journal.clone(), 2).with_wake_failure(),
        ));
        let input = Rc::new(RefCell::new(HeadlessInput::new(journal.clone())));
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let term = Rc::new(RefCell::new(HeadlessTerminal::new(journal.clone(), symbols)));
        term.borrow_mut().open(Box::new(|| {})).expect("open");

        let reply = handle_switch(SwitchAction::Enter, &video, &input, &term);

        assert_eq!(reply, SwitchReply::Accepted, "a failed wake never vetoes");
        assert!(input.borrow().is_awake());
        assert!(
            term.borrow().attached_outputs().is_empty(),
            "no reconciliation without a woken video subsystem"
        );
    }

    #[test]
    fn test_partial_activation_attaches_the_rest() {
        // Three displays, one already active, one failing activation: the
        // session ends up with exactly the two usable ones.
        let journal = Journal::new();
        let active = DisplayId::from_raw(0);
        let failing = DisplayId::from_raw(1);
        let video = Rc::new(RefCell::new(
            HeadlessVideo::new(journal.clone(), 3)
                .with_active_display(active)
                .with_failing_display(failing),
        ));
        let input = Rc::new(RefCell::new(HeadlessInput::new(journal.clone())));
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let term = Rc::new(RefCell::new(HeadlessTerminal::new(journal.clone(), symbols)));
        term.borrow_mut().open(Box::new(|| {})).expect("open");

        handle_switch(SwitchAction::Enter, &video, &input, &term);

        let attached = term.borrow().attached_outputs();
        assert_eq!(attached.len(), 2);
        assert!(attached.contains(&active));
        assert!(attached.contains(&DisplayId::from_raw(2)));
        assert!(!attached.contains(&failing));
    }
}
