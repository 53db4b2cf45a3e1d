//! Output activation policy.
//!
//! On a VT enter the video subsystem's display list is reconciled with the
//! terminal session's attached outputs: inactive displays are activated,
//! available displays are attached. Per-display failures are logged and
//! skipped (partial output beats no output) and never abort the remaining
//! displays or the enclosing enter sequence. The per-display outcomes are
//! aggregated into a report so the reconciliation result stays observable.

use tracing::{debug, error};

use crate::backend::traits::{
    DisplayId, DisplayState, SessionError, TerminalSession, VideoError, VideoSubsystem,
};

/// What happened to one display during reconciliation.
#[derive(Debug)]
pub enum OutputOutcome {
    /// The display is active and attached to the session.
    Attached,
    /// Activation failed; the display was skipped, not attached.
    ActivationFailed(VideoError),
    /// The display is active but could not be attached.
    AttachFailed(SessionError),
}

impl OutputOutcome {
    /// Whether the display ended up attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        matches!(self, Self::Attached)
    }
}

/// Aggregated result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Per-display outcomes, in enumeration order.
    pub outcomes: Vec<(DisplayId, OutputOutcome)>,
}

impl ReconcileReport {
    /// Number of displays attached after this pass.
    #[must_use]
    pub fn attached(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_attached()).count()
    }

    /// Number of displays skipped on a failure.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.attached()
    }
}

/// Reconcile the video subsystem's displays with the session's outputs.
///
/// For each enumerated display: activate it if inactive, then attach it as an
/// output target. Either step failing skips that display only.
pub fn reconcile_outputs<V, T>(video: &mut V, term: &mut T) -> ReconcileReport
where
    V: VideoSubsystem,
    T: TerminalSession,
{
    let mut report = ReconcileReport::default();

    for disp in video.displays() {
        match video.display_state(disp) {
            Some(DisplayState::Active) => {}
            Some(DisplayState::Inactive) => {
                if let Err(err) = video.activate_display(disp) {
                    error!(display = %disp, error = %err, "cannot activate output");
                    report.outcomes.push((disp, OutputOutcome::ActivationFailed(err)));
                    continue;
                }
            }
            // Enumerated but gone by the time we asked: treat like a failed
            // activation and move on.
            None => {
                let err = VideoError::UnknownDisplay(disp);
                error!(display = %disp, error = %err, "cannot activate output");
                report.outcomes.push((disp, OutputOutcome::ActivationFailed(err)));
                continue;
            }
        }

        match term.attach_output(disp) {
            Ok(()) => {
                debug!(display = %disp, "output attached");
                report.outcomes.push((disp, OutputOutcome::Attached));
            }
            Err(err) => {
                error!(display = %disp, error = %err, "cannot assign output");
                report.outcomes.push((disp, OutputOutcome::AttachFailed(err)));
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::{HeadlessTerminal, HeadlessVideo, Journal};
    use crate::backend::traits::TerminalSession;
    use crate::symbols::SymbolTable;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn terminal(journal: &Journal) -> HeadlessTerminal {
        let mut term =
            HeadlessTerminal::new(journal.clone(), Rc::new(RefCell::new(SymbolTable::new())));
        term.open(Box::new(|| {})).expect("open");
        term
    }

    #[test]
    fn test_all_displays_attach() {
        let journal = Journal::new();
        let mut video = HeadlessVideo::new(journal.clone(), 2);
        let mut term = terminal(&journal);

        let report = reconcile_outputs(&mut video, &mut term);

        assert_eq!(report.attached(), 2);
        assert_eq!(report.skipped(), 0);
        assert_eq!(term.attached_outputs().len(), 2);
    }

    #[test]
    fn test_failed_activation_skips_that_display_only() {
        // Three displays, one already active, one whose activation fails.
        let journal = Journal::new();
        let active = DisplayId::from_raw(0);
        let failing = DisplayId::from_raw(1);
        let mut video = HeadlessVideo::new(journal.clone(), 3)
            .with_active_display(active)
            .with_failing_display(failing);
        let mut term = terminal(&journal);

        let report = reconcile_outputs(&mut video, &mut term);

        assert_eq!(report.attached(), 2);
        assert_eq!(report.skipped(), 1);
        let attached = term.attached_outputs();
        assert!(attached.contains(&active));
        assert!(attached.contains(&DisplayId::from_raw(2)));
        assert!(
            !attached.contains(&failing),
            "a display that failed to activate must not be attached"
        );
        assert!(matches!(
            report.outcomes[1].1,
            OutputOutcome::ActivationFailed(_)
        ));
    }

    #[test]
    fn test_attach_failure_is_isolated_too() {
        let journal = Journal::new();
        let mut video = HeadlessVideo::new(journal.clone(), 2);
        let mut term = terminal(&journal);
        // A closed session refuses attachment for every display.
        term.close();

        let report = reconcile_outputs(&mut video, &mut term);

        assert_eq!(report.attached(), 0);
        assert_eq!(report.skipped(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|(_, o)| matches!(o, OutputOutcome::AttachFailed(_))));
    }
}
