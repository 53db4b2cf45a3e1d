//! Integration tests for the session lifecycle.
//!
//! These drive the assembled application (event loop, signal watchers, VT
//! controller, and the headless collaborators) through realistic scenarios:
//! - setup and the synthesized initial ENTER
//! - VT switch round trips driven by real (thread-directed) signals
//! - construction failure at each setup step, with exact-prefix unwind
//! - the controlled-shutdown path on unrecoverable input errors
//! - teardown ordering and idempotence

use nix::sys::signal::{raise, Signal};
use pretty_assertions::assert_eq;

use vtcon_core::{
    Application, DisplayId, HeadlessBackend, InputEvent, OpenStep, SetupError, SimVt,
    TerminalSession, VtError,
};

fn setup_sim(backend: &mut HeadlessBackend) -> Application<HeadlessBackend, SimVt> {
    Application::setup(backend, || Ok(SimVt::new())).expect("setup")
}

// =============================================================================
// Setup and the initial ENTER
// =============================================================================

#[test]
fn test_setup_enters_the_session() {
    let mut backend = HeadlessBackend::new(2);
    let journal = backend.journal();
    let app = setup_sim(&mut backend);

    // The simulated VT is already foreground, so setup ends with one
    // synthesized ENTER: video wakes, displays attach, input wakes last.
    let wake = journal.position("video: wake").expect("video woken");
    let attach_first = journal
        .position("terminal: attach display-0")
        .expect("first display attached");
    let attach_second = journal
        .position("terminal: attach display-1")
        .expect("second display attached");
    let input_wake = journal.position("input: wake").expect("input woken");
    assert!(wake < attach_first);
    assert!(attach_first < attach_second);
    assert!(
        attach_second < input_wake,
        "input wake must come strictly after display reconciliation"
    );

    let term = app.terminal().expect("terminal handle");
    assert_eq!(
        term.borrow().attached_outputs(),
        vec![DisplayId::from_raw(0), DisplayId::from_raw(1)]
    );
    assert!(!app.terminate_flag().is_requested());
}

// =============================================================================
// VT switch round trip over real signals
// =============================================================================

#[test]
fn test_leave_enter_terminate_round_trip() {
    let mut backend = HeadlessBackend::new(1);
    let journal = backend.journal();
    let mut app = setup_sim(&mut backend);

    // All three signals are blocked on this thread and queue on the loop's
    // signalfd; Linux drains pending standard signals lowest-numbered first,
    // so one dispatch round handles USR1 (leave), USR2 (enter), TERM (flag).
    raise(Signal::SIGUSR1).expect("raise release");
    raise(Signal::SIGUSR2).expect("raise acquire");
    raise(Signal::SIGTERM).expect("raise terminate");

    app.run().expect("clean run");

    // LEAVE bracket: input sleeps, outputs detach, video sleeps, in that
    // order, and input sleep strictly precedes detachment.
    let sleep = journal.position("input: sleep").expect("input slept");
    let detach = journal.position("terminal: detach-all").expect("detached");
    let video_sleep = journal.position("video: sleep").expect("video slept");
    assert!(sleep < detach);
    assert!(detach < video_sleep);

    // The ENTER after the LEAVE re-attached and re-woke.
    assert_eq!(journal.count("input: wake"), 2);
    assert_eq!(journal.count("terminal: attach display-0"), 2);

    app.teardown();
    assert_eq!(journal.count("terminal: close"), 1);
}

#[test]
fn test_failed_video_wake_degrades_but_still_runs() {
    let mut backend = HeadlessBackend::new(1).with_wake_failure();
    let journal = backend.journal();
    let mut app = setup_sim(&mut backend);

    // The initial ENTER could not wake video: no outputs, but input is up
    // and a termination request still works.
    assert_eq!(journal.count("terminal: attach display-0"), 0);
    assert_eq!(journal.count("input: wake"), 1);
    let input = app.input().expect("input handle");
    assert!(input.borrow().is_awake());

    raise(Signal::SIGTERM).expect("raise terminate");
    app.run().expect("clean run");
}

// =============================================================================
// Construction failure: exact-prefix unwind
// =============================================================================

#[test]
fn test_video_open_failure_releases_nothing_later() {
    let mut backend = HeadlessBackend::new(1).with_failing_open(OpenStep::Video);
    let journal = backend.journal();

    let err = Application::<_, SimVt>::setup(&mut backend, || Ok(SimVt::new())).unwrap_err();

    assert!(matches!(err, SetupError::Video(_)));
    assert_eq!(journal.count("video: dropped"), 0, "step k itself was never created");
    assert_eq!(journal.count("input: dropped"), 0);
    assert_eq!(journal.count("terminal: dropped"), 0);
}

#[test]
fn test_input_open_failure_releases_video_exactly_once() {
    let mut backend = HeadlessBackend::new(1).with_failing_open(OpenStep::Input);
    let journal = backend.journal();

    let err = Application::<_, SimVt>::setup(&mut backend, || Ok(SimVt::new())).unwrap_err();

    assert!(matches!(err, SetupError::Input(_)));
    assert_eq!(journal.count("video: dropped"), 1);
    assert_eq!(journal.count("input: dropped"), 0);
    assert_eq!(journal.count("terminal: dropped"), 0);
}

#[test]
fn test_vt_open_failure_releases_video_and_input() {
    let mut backend = HeadlessBackend::new(1);
    let journal = backend.journal();

    let err =
        Application::<_, SimVt>::setup(&mut backend, || Err(VtError::NoFreeVt)).unwrap_err();

    assert!(matches!(err, SetupError::Vt(VtError::NoFreeVt)));
    assert_eq!(journal.count("video: dropped"), 1);
    assert_eq!(journal.count("input: dropped"), 1);
    assert_eq!(journal.count("terminal: dropped"), 0);
}

#[test]
fn test_terminal_open_failure_releases_the_full_prefix() {
    let mut backend = HeadlessBackend::new(1).with_failing_open(OpenStep::Terminal);
    let journal = backend.journal();

    let err = Application::<_, SimVt>::setup(&mut backend, || Ok(SimVt::new())).unwrap_err();

    assert!(matches!(err, SetupError::Terminal(_)));
    assert_eq!(journal.count("video: dropped"), 1);
    assert_eq!(journal.count("input: dropped"), 1);
    assert_eq!(journal.count("terminal: dropped"), 0);
}

// =============================================================================
// Input errors: controlled shutdown, not a crash
// =============================================================================

#[test]
fn test_unrecoverable_input_error_closes_session_and_requests_termination() {
    let mut backend = HeadlessBackend::new(1).with_poisoned_input();
    let journal = backend.journal();
    let mut app = setup_sim(&mut backend);

    let input = app.input().expect("input handle");
    let delivered = input
        .borrow_mut()
        .deliver(&InputEvent::from_char(30, 'q'));
    assert!(delivered, "the event must reach the forwarder");

    // The close sequence has already run by the time the flag is observed.
    let term = app.terminal().expect("terminal handle");
    assert!(term.borrow().is_closed());
    assert_eq!(journal.count("terminal: close"), 1);
    assert!(app.terminate_flag().is_requested());

    // The next loop check sees the flag: a clean exit, not an error.
    app.run().expect("controlled shutdown is a clean exit");
    app.teardown();
    assert_eq!(journal.count("terminal: close"), 1, "close must not re-run");
}

#[test]
fn test_delivered_input_reaches_the_session() {
    let mut backend = HeadlessBackend::new(1);
    let mut app = setup_sim(&mut backend);

    let input = app.input().expect("input handle");
    input.borrow_mut().deliver(&InputEvent::from_char(30, 'a'));
    input.borrow_mut().deliver(&InputEvent::from_char(48, 'b'));

    let term = app.terminal().expect("terminal handle");
    assert_eq!(term.borrow().received().len(), 2);
    assert!(!app.terminate_flag().is_requested());
}

// =============================================================================
// Teardown: reverse order, exactly once, idempotent
// =============================================================================

#[test]
fn test_teardown_releases_in_reverse_order_exactly_once() {
    let mut backend = HeadlessBackend::new(1);
    let journal = backend.journal();
    let mut app = setup_sim(&mut backend);

    app.teardown();

    let close = journal.position("terminal: close").expect("session closed");
    let term_drop = journal.position("terminal: dropped").expect("terminal released");
    let input_drop = journal.position("input: dropped").expect("input released");
    let video_drop = journal.position("video: dropped").expect("video released");
    assert!(close < term_drop);
    assert!(term_drop < input_drop, "terminal releases before input");
    assert!(input_drop < video_drop, "input releases before video");

    // A closing session reports through the close hook: termination is
    // requested as part of teardown's session close.
    assert!(app.terminate_flag().is_requested());

    // Second teardown: no effect, nothing released twice.
    app.teardown();
    assert_eq!(journal.count("terminal: close"), 1);
    assert_eq!(journal.count("terminal: dropped"), 1);
    assert_eq!(journal.count("input: dropped"), 1);
    assert_eq!(journal.count("video: dropped"), 1);

    // Handles are gone after teardown.
    assert!(app.terminal().is_none());
    assert!(app.video().is_none());
    assert!(app.input().is_none());
}
