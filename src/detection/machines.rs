//! Completion state machines, advanced one observation at a time.
//!
//! These know nothing about capture or time; the detector feeds them the
//! per-poll detections and acts on what they return.

use super::verdict::Phase;

/// Consecutive absences needed before an indicator counts as gone.
pub const ABSENCES_TO_CONFIRM: u32 = 2;

/// Machine A: a transient indicator has to disappear.
#[derive(Debug, Default, Clone)]
pub struct DisappearanceTracker {
    streak: u32,
    seen: bool,
}

impl DisappearanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one poll. Returns true once the indicator is confirmed gone.
    pub fn observe(&mut self, present: bool) -> bool {
        if present {
            self.seen = true;
            self.streak = 0;
            return false;
        }
        self.streak += 1;
        self.is_gone()
    }

    pub fn is_gone(&self) -> bool {
        self.streak >= ABSENCES_TO_CONFIRM
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn seen(&self) -> bool {
        self.seen
    }

    pub fn phase(&self) -> Phase {
        if self.is_gone() {
            Phase::Complete
        } else if self.streak > 0 {
            Phase::TentativelyComplete
        } else {
            Phase::InProgress
        }
    }
}

/// How machine B reached DONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The done indicator was seen
    Explicit,
    /// In-progress vanished and stayed gone on the re-check
    Implicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStep {
    Continue,
    /// In-progress went away without "done"; re-check both after a delay
    Recheck,
    Done(Completion),
}

/// Machine B: IDLE → PROCESSING_SEEN → DONE.
#[derive(Debug, Default, Clone)]
pub struct PhaseTracker {
    in_progress_seen: bool,
    done_seen: bool,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, in_progress: bool, done: bool) -> PhaseStep {
        if in_progress {
            self.in_progress_seen = true;
        }
        if done {
            self.done_seen = true;
            return PhaseStep::Done(Completion::Explicit);
        }
        if self.in_progress_seen && !in_progress {
            return PhaseStep::Recheck;
        }
        PhaseStep::Continue
    }

    /// Second look after a `Recheck`.
    pub fn resolve_recheck(&mut self, in_progress: bool, done: bool) -> PhaseStep {
        if done {
            self.done_seen = true;
            PhaseStep::Done(Completion::Explicit)
        } else if !in_progress {
            PhaseStep::Done(Completion::Implicit)
        } else {
            PhaseStep::Continue
        }
    }

    pub fn in_progress_seen(&self) -> bool {
        self.in_progress_seen
    }

    pub fn done_seen(&self) -> bool {
        self.done_seen
    }

    pub fn phase(&self) -> Phase {
        if self.done_seen {
            Phase::Complete
        } else if self.in_progress_seen {
            Phase::InProgress
        } else {
            Phase::NotStarted
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmState {
    #[default]
    Unconfirmed,
    Tentative,
    Confirmed,
}

/// Machine C: an icon must still be there on a second, delayed look.
#[derive(Debug, Default, Clone)]
pub struct ConfirmTracker {
    state: ConfirmState,
    reverts: u32,
}

impl ConfirmTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, present: bool) -> ConfirmState {
        self.state = match (self.state, present) {
            (ConfirmState::Confirmed, _) => ConfirmState::Confirmed,
            (ConfirmState::Unconfirmed, true) => ConfirmState::Tentative,
            (ConfirmState::Unconfirmed, false) => ConfirmState::Unconfirmed,
            (ConfirmState::Tentative, true) => ConfirmState::Confirmed,
            (ConfirmState::Tentative, false) => {
                self.reverts += 1;
                ConfirmState::Unconfirmed
            }
        };
        self.state
    }

    pub fn state(&self) -> ConfirmState {
        self.state
    }

    /// Times a tentative icon vanished on re-check.
    pub fn reverts(&self) -> u32 {
        self.reverts
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            ConfirmState::Unconfirmed => Phase::InProgress,
            ConfirmState::Tentative => Phase::TentativelyComplete,
            ConfirmState::Confirmed => Phase::Complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disappearance_confirms_on_second_absence() {
        let mut tracker = DisappearanceTracker::new();
        let results: Vec<bool> = [true, true, false, false]
            .iter()
            .map(|&present| tracker.observe(present))
            .collect();
        assert_eq!(results, vec![false, false, false, true]);
    }

    #[test]
    fn test_disappearance_positive_resets_streak() {
        let mut tracker = DisappearanceTracker::new();
        assert!(!tracker.observe(false));
        assert_eq!(tracker.streak(), 1);
        assert!(!tracker.observe(true));
        assert_eq!(tracker.streak(), 0);
        assert!(!tracker.observe(false));
        assert!(tracker.observe(false));
        assert!(tracker.seen());
        assert_eq!(tracker.phase(), Phase::Complete);
    }

    #[test]
    fn test_phase_done_on_first_done_frame() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.observe(false, false), PhaseStep::Continue);
        assert_eq!(tracker.phase(), Phase::NotStarted);
        assert_eq!(tracker.observe(true, false), PhaseStep::Continue);
        assert_eq!(tracker.observe(true, false), PhaseStep::Continue);
        assert_eq!(tracker.phase(), Phase::InProgress);
        assert_eq!(
            tracker.observe(false, true),
            PhaseStep::Done(Completion::Explicit)
        );
        assert_eq!(tracker.phase(), Phase::Complete);
    }

    #[test]
    fn test_phase_implicit_completion_after_recheck() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.observe(true, false), PhaseStep::Continue);
        assert_eq!(tracker.observe(true, false), PhaseStep::Continue);
        assert_eq!(tracker.observe(false, false), PhaseStep::Recheck);
        assert_eq!(
            tracker.resolve_recheck(false, false),
            PhaseStep::Done(Completion::Implicit)
        );
        assert!(!tracker.done_seen());
    }

    #[test]
    fn test_phase_recheck_sees_done_or_processing_again() {
        let mut tracker = PhaseTracker::new();
        tracker.observe(true, false);
        assert_eq!(tracker.observe(false, false), PhaseStep::Recheck);
        assert_eq!(tracker.resolve_recheck(true, false), PhaseStep::Continue);
        assert_eq!(
            tracker.resolve_recheck(false, true),
            PhaseStep::Done(Completion::Explicit)
        );
    }

    #[test]
    fn test_phase_absence_before_processing_is_not_recheck() {
        let mut tracker = PhaseTracker::new();
        assert_eq!(tracker.observe(false, false), PhaseStep::Continue);
        assert_eq!(tracker.observe(false, false), PhaseStep::Continue);
        assert!(!tracker.in_progress_seen());
    }

    #[test]
    fn test_confirm_flicker_reverts() {
        let mut tracker = ConfirmTracker::new();
        assert_eq!(tracker.observe(false), ConfirmState::Unconfirmed);
        assert_eq!(tracker.observe(true), ConfirmState::Tentative);
        assert_eq!(tracker.observe(false), ConfirmState::Unconfirmed);
        assert_eq!(tracker.reverts(), 1);
    }

    #[test]
    fn test_confirm_double_sighting_confirms() {
        let mut tracker = ConfirmTracker::new();
        assert_eq!(tracker.observe(false), ConfirmState::Unconfirmed);
        assert_eq!(tracker.observe(true), ConfirmState::Tentative);
        assert_eq!(tracker.observe(true), ConfirmState::Confirmed);
        // Sticky once confirmed
        assert_eq!(tracker.observe(false), ConfirmState::Confirmed);
        assert_eq!(tracker.phase(), Phase::Complete);
    }
}
