//! In-memory collaborator implementations.
//!
//! Complete implementations of the video, input, and terminal-session
//! contracts with no device dependencies. The daemon runs on these by
//! default, and the test suite drives every lifecycle path through them:
//! each implementation records its calls into a shared [`Journal`], and the
//! backend can inject the failure modes the error design names: wake
//! failure, per-display activation failure, poisoned input delivery, and a
//! failing constructor step.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::eloop::EventLoop;
use crate::symbols::{Symbol, SymbolTable};

use super::traits::{
    BackendError, CloseHook, DisplayId, DisplayState, InputCallback, InputError, InputEvent,
    InputSubsystem, SessionBackend, SessionError, TerminalSession, VideoError, VideoSubsystem,
};

/// Shared, ordered record of lifecycle calls.
///
/// Cheaply clonable; every headless collaborator appends to the same log so
/// tests can assert cross-component ordering (input sleep before detach,
/// detach before video sleep, and so on).
#[derive(Clone, Debug, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    /// Create an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.
    pub fn record(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    /// Snapshot of all entries, in call order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    /// Index of the first entry equal to `entry`, if any.
    #[must_use]
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.borrow().iter().position(|e| e == entry)
    }

    /// How many entries equal `entry`.
    #[must_use]
    pub fn count(&self, entry: &str) -> usize {
        self.0.borrow().iter().filter(|e| *e == entry).count()
    }
}

struct HeadlessDisplay {
    id: DisplayId,
    state: DisplayState,
    fail_activation: bool,
}

/// In-memory video subsystem.
pub struct HeadlessVideo {
    awake: bool,
    fail_wake: bool,
    displays: Vec<HeadlessDisplay>,
    journal: Journal,
}

impl HeadlessVideo {
    /// Create a subsystem with `count` inactive displays, ids `0..count`.
    #[must_use]
    pub fn new(journal: Journal, count: u32) -> Self {
        let displays = (0..count)
            .map(|n| HeadlessDisplay {
                id: DisplayId::from_raw(n),
                state: DisplayState::Inactive,
                fail_activation: false,
            })
            .collect();
        Self {
            awake: false,
            fail_wake: false,
            displays,
            journal,
        }
    }

    /// Mark one display as already active.
    #[must_use]
    pub fn with_active_display(mut self, display: DisplayId) -> Self {
        if let Some(d) = self.displays.iter_mut().find(|d| d.id == display) {
            d.state = DisplayState::Active;
        }
        self
    }

    /// Make activation of one display fail.
    #[must_use]
    pub fn with_failing_display(mut self, display: DisplayId) -> Self {
        if let Some(d) = self.displays.iter_mut().find(|d| d.id == display) {
            d.fail_activation = true;
        }
        self
    }

    /// Make every wake attempt fail.
    #[must_use]
    pub fn with_wake_failure(mut self) -> Self {
        self.fail_wake = true;
        self
    }

    /// Whether the subsystem is currently awake.
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.awake
    }
}

impl VideoSubsystem for HeadlessVideo {
    fn wake(&mut self) -> Result<(), VideoError> {
        if self.fail_wake {
            self.journal.record("video: wake failed");
            return Err(VideoError::WakeFailed("injected wake failure".into()));
        }
        self.awake = true;
        self.journal.record("video: wake");
        Ok(())
    }

    fn sleep(&mut self) {
        self.awake = false;
        self.journal.record("video: sleep");
    }

    fn displays(&self) -> Vec<DisplayId> {
        self.displays.iter().map(|d| d.id).collect()
    }

    fn display_state(&self, display: DisplayId) -> Option<DisplayState> {
        self.displays
            .iter()
            .find(|d| d.id == display)
            .map(|d| d.state)
    }

    fn activate_display(&mut self, display: DisplayId) -> Result<(), VideoError> {
        let Some(d) = self.displays.iter_mut().find(|d| d.id == display) else {
            return Err(VideoError::UnknownDisplay(display));
        };
        if d.fail_activation {
            self.journal.record(format!("video: activate {display} failed"));
            return Err(VideoError::ActivationFailed {
                display,
                reason: "injected activation failure".into(),
            });
        }
        d.state = DisplayState::Active;
        self.journal.record(format!("video: activate {display}"));
        Ok(())
    }
}

impl Drop for HeadlessVideo {
    fn drop(&mut self) {
        self.journal.record("video: dropped");
    }
}

/// In-memory input subsystem.
///
/// Events are injected with [`deliver`](Self::deliver); an asleep subsystem
/// swallows them, which is exactly the LEAVE-side guarantee the switch
/// bracket relies on.
pub struct HeadlessInput {
    awake: bool,
    callback: Option<InputCallback>,
    journal: Journal,
}

impl HeadlessInput {
    /// Create an asleep, unconnected subsystem.
    #[must_use]
    pub fn new(journal: Journal) -> Self {
        Self {
            awake: false,
            callback: None,
            journal,
        }
    }

    /// Whether the subsystem is currently awake.
    #[must_use]
    pub fn is_awake(&self) -> bool {
        self.awake
    }

    /// Inject one event, as the device layer would.
    ///
    /// Returns whether the event reached the subscriber.
    pub fn deliver(&mut self, event: &InputEvent) -> bool {
        if !self.awake {
            return false;
        }
        match self.callback.as_mut() {
            Some(callback) => {
                self.journal.record("input: event");
                callback(event);
                true
            }
            None => false,
        }
    }
}

impl InputSubsystem for HeadlessInput {
    fn wake(&mut self) {
        self.awake = true;
        self.journal.record("input: wake");
    }

    fn sleep(&mut self) {
        self.awake = false;
        self.journal.record("input: sleep");
    }

    fn connect(&mut self, callback: InputCallback) -> Result<(), InputError> {
        self.journal.record("input: connect");
        self.callback = Some(callback);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.callback.take().is_some() {
            self.journal.record("input: disconnect");
        }
    }
}

impl Drop for HeadlessInput {
    fn drop(&mut self) {
        self.journal.record("input: dropped");
    }
}

/// In-memory terminal session.
pub struct HeadlessTerminal {
    opened: bool,
    closed: bool,
    outputs: Vec<DisplayId>,
    symbols: Rc<RefCell<SymbolTable>>,
    on_close: Option<CloseHook>,
    poison_input: bool,
    received: Vec<Symbol>,
    journal: Journal,
}

impl HeadlessTerminal {
    /// Create an unopened session over the shared symbol table.
    #[must_use]
    pub fn new(journal: Journal, symbols: Rc<RefCell<SymbolTable>>) -> Self {
        Self {
            opened: false,
            closed: false,
            outputs: Vec::new(),
            symbols,
            on_close: None,
            poison_input: false,
            received: Vec::new(),
            journal,
        }
    }

    /// Make every input delivery fail unrecoverably.
    #[must_use]
    pub fn with_poisoned_input(mut self) -> Self {
        self.poison_input = true;
        self
    }

    /// Symbols interned from delivered input, in delivery order.
    #[must_use]
    pub fn received(&self) -> &[Symbol] {
        &self.received
    }

    /// Whether the session has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl TerminalSession for HeadlessTerminal {
    fn open(&mut self, on_close: CloseHook) -> Result<(), SessionError> {
        self.opened = true;
        self.on_close = Some(on_close);
        self.journal.record("terminal: open");
        Ok(())
    }

    fn close(&mut self) {
        if self.closed || !self.opened {
            return;
        }
        self.closed = true;
        self.outputs.clear();
        self.journal.record("terminal: close");
        if let Some(mut hook) = self.on_close.take() {
            hook();
        }
    }

    fn attach_output(&mut self, display: DisplayId) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if !self.outputs.contains(&display) {
            self.outputs.push(display);
            self.journal.record(format!("terminal: attach {display}"));
        }
        Ok(())
    }

    fn detach_output(&mut self, display: DisplayId) {
        let before = self.outputs.len();
        self.outputs.retain(|d| *d != display);
        if self.outputs.len() != before {
            self.journal.record(format!("terminal: detach {display}"));
        }
    }

    fn detach_all_outputs(&mut self) {
        self.outputs.clear();
        self.journal.record("terminal: detach-all");
    }

    fn attached_outputs(&self) -> Vec<DisplayId> {
        self.outputs.clone()
    }

    fn deliver_input(&mut self, event: &InputEvent) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        if self.poison_input {
            self.journal.record("terminal: input error");
            return Err(SessionError::DeliveryFailed(
                "injected delivery failure".into(),
            ));
        }
        if let Some(c) = event.unicode {
            let mut buf = [0u8; 4];
            let sym = self.symbols.borrow_mut().intern(c.encode_utf8(&mut buf));
            self.received.push(sym);
        }
        debug!(keycode = event.keycode, "terminal input");
        self.journal.record("terminal: input");
        Ok(())
    }
}

impl Drop for HeadlessTerminal {
    fn drop(&mut self) {
        self.journal.record("terminal: dropped");
    }
}

/// Which constructor step an injected failure hits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenStep {
    /// Fail opening the video context.
    Video,
    /// Fail opening the input context.
    Input,
    /// Fail opening the terminal session.
    Terminal,
}

/// Backend producing the headless collaborators.
pub struct HeadlessBackend {
    journal: Journal,
    displays: u32,
    active_displays: Vec<DisplayId>,
    failing_display: Option<DisplayId>,
    fail_wake: bool,
    poison_input: bool,
    fail_open: Option<OpenStep>,
}

impl HeadlessBackend {
    /// Backend with `displays` initially-inactive displays.
    #[must_use]
    pub fn new(displays: u32) -> Self {
        Self {
            journal: Journal::new(),
            displays,
            active_displays: Vec::new(),
            failing_display: None,
            fail_wake: false,
            poison_input: false,
            fail_open: None,
        }
    }

    /// The shared call journal.
    #[must_use]
    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    /// Mark a display as already active at enumeration time.
    #[must_use]
    pub fn with_active_display(mut self, display: DisplayId) -> Self {
        self.active_displays.push(display);
        self
    }

    /// Make activation of one display fail.
    #[must_use]
    pub fn with_failing_display(mut self, display: DisplayId) -> Self {
        self.failing_display = Some(display);
        self
    }

    /// Make video wake fail.
    #[must_use]
    pub fn with_wake_failure(mut self) -> Self {
        self.fail_wake = true;
        self
    }

    /// Make terminal input delivery fail unrecoverably.
    #[must_use]
    pub fn with_poisoned_input(mut self) -> Self {
        self.poison_input = true;
        self
    }

    /// Inject a constructor failure at the given step.
    #[must_use]
    pub fn with_failing_open(mut self, step: OpenStep) -> Self {
        self.fail_open = Some(step);
        self
    }
}

impl SessionBackend for HeadlessBackend {
    type Video = HeadlessVideo;
    type Input = HeadlessInput;
    type Term = HeadlessTerminal;

    fn open_video(&mut self, _eloop: &mut EventLoop) -> Result<Self::Video, BackendError> {
        if self.fail_open == Some(OpenStep::Video) {
            return Err(BackendError::new("video context", "injected open failure"));
        }
        let mut video = HeadlessVideo::new(self.journal.clone(), self.displays);
        for display in &self.active_displays {
            video = video.with_active_display(*display);
        }
        if let Some(display) = self.failing_display {
            video = video.with_failing_display(display);
        }
        if self.fail_wake {
            video = video.with_wake_failure();
        }
        Ok(video)
    }

    fn open_input(&mut self, _eloop: &mut EventLoop) -> Result<Self::Input, BackendError> {
        if self.fail_open == Some(OpenStep::Input) {
            return Err(BackendError::new("input context", "injected open failure"));
        }
        Ok(HeadlessInput::new(self.journal.clone()))
    }

    fn open_terminal(
        &mut self,
        _eloop: &mut EventLoop,
        symbols: Rc<RefCell<SymbolTable>>,
    ) -> Result<Self::Term, BackendError> {
        if self.fail_open == Some(OpenStep::Terminal) {
            return Err(BackendError::new(
                "terminal session",
                "injected open failure",
            ));
        }
        let mut term = HeadlessTerminal::new(self.journal.clone(), symbols);
        if self.poison_input {
            term = term.with_poisoned_input();
        }
        Ok(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols() -> Rc<RefCell<SymbolTable>> {
        Rc::new(RefCell::new(SymbolTable::new()))
    }

    #[test]
    fn test_asleep_input_swallows_events() {
        let journal = Journal::new();
        let mut input = HeadlessInput::new(journal.clone());
        let delivered = Rc::new(RefCell::new(0u32));
        let seen = Rc::clone(&delivered);
        input
            .connect(Box::new(move |_| *seen.borrow_mut() += 1))
            .expect("connect");

        assert!(!input.deliver(&InputEvent::from_char(30, 'a')));
        input.wake();
        assert!(input.deliver(&InputEvent::from_char(30, 'a')));
        input.sleep();
        assert!(!input.deliver(&InputEvent::from_char(30, 'a')));

        assert_eq!(*delivered.borrow(), 1);
    }

    #[test]
    fn test_terminal_close_fires_hook_once() {
        let journal = Journal::new();
        let mut term = HeadlessTerminal::new(journal.clone(), symbols());
        let fired = Rc::new(RefCell::new(0u32));
        let hook = Rc::clone(&fired);
        term.open(Box::new(move || *hook.borrow_mut() += 1))
            .expect("open");

        term.close();
        term.close();

        assert_eq!(*fired.borrow(), 1);
        assert_eq!(journal.count("terminal: close"), 1);
    }

    #[test]
    fn test_terminal_attach_is_deduplicated_and_detach_idempotent() {
        let journal = Journal::new();
        let mut term = HeadlessTerminal::new(journal.clone(), symbols());
        term.open(Box::new(|| {})).expect("open");

        let d = DisplayId::from_raw(0);
        term.attach_output(d).expect("attach");
        term.attach_output(d).expect("re-attach is a no-op");
        assert_eq!(term.attached_outputs(), vec![d]);

        term.detach_output(d);
        term.detach_output(d);
        assert!(term.attached_outputs().is_empty());
        assert_eq!(journal.count("terminal: detach display-0"), 1);
    }

    #[test]
    fn test_terminal_interns_input_symbols() {
        let journal = Journal::new();
        let shared = symbols();
        let mut term = HeadlessTerminal::new(journal, Rc::clone(&shared));
        term.open(Box::new(|| {})).expect("open");

        term.deliver_input(&InputEvent::from_char(30, 'a'))
            .expect("deliver");
        assert_eq!(term.received(), &[Symbol::from_char('a')]);
    }

    #[test]
    fn test_video_activation_failure_is_isolated() {
        let journal = Journal::new();
        let mut video = HeadlessVideo::new(journal, 2)
            .with_failing_display(DisplayId::from_raw(0));

        assert!(video.activate_display(DisplayId::from_raw(0)).is_err());
        assert!(video.activate_display(DisplayId::from_raw(1)).is_ok());
        assert_eq!(
            video.display_state(DisplayId::from_raw(1)),
            Some(DisplayState::Active)
        );
        assert_eq!(
            video.display_state(DisplayId::from_raw(0)),
            Some(DisplayState::Inactive)
        );
    }
}
