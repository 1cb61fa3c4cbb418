//! Outcomes of a wait call and the state it tracks while polling.

use serde::Serialize;
use std::time::Duration;

/// What decided a wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DetectionMethod {
    PrimaryOcr,
    SecondaryOcr,
    TemplateMatch,
    WindowTitle,
    /// No backend could verify; a fixed delay stood in
    FixedDelay,
    /// In-progress text vanished without an explicit "done"
    ImplicitDisappearance,
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DetectionMethod::PrimaryOcr => write!(f, "primary OCR"),
            DetectionMethod::SecondaryOcr => write!(f, "secondary OCR"),
            DetectionMethod::TemplateMatch => write!(f, "template match"),
            DetectionMethod::WindowTitle => write!(f, "window title"),
            DetectionMethod::FixedDelay => write!(f, "fixed delay"),
            DetectionMethod::ImplicitDisappearance => write!(f, "implicit disappearance"),
        }
    }
}

/// Coarse progress label of one monitored operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[default]
    NotStarted,
    InProgress,
    TentativelyComplete,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::NotStarted => write!(f, "not started"),
            Phase::InProgress => write!(f, "in progress"),
            Phase::TentativelyComplete => write!(f, "tentatively complete"),
            Phase::Complete => write!(f, "complete"),
        }
    }
}

/// Per-call polling state. Created when a wait starts, dropped when it returns.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionState {
    pub phase: Phase,
    pub negative_streak: u32,
    pub polls: u32,
    pub elapsed: Duration,
    pub last_confidence: Option<f32>,
    /// The in-progress signal was seen at least once
    pub in_progress_seen: bool,
    pub done_seen: bool,
    /// Tentative sightings that were gone on the delayed re-check
    pub reverts: u32,
}

/// Result of a wait call.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    Completed {
        method: DetectionMethod,
        elapsed: Duration,
    },
    /// Deadline passed without a signal; the caller proceeds anyway.
    OptimisticTimeout {
        elapsed: Duration,
        state: DetectionState,
    },
    /// An item never confirmed; logged as incomplete and skipped.
    Abandoned {
        elapsed: Duration,
        state: DetectionState,
    },
    /// No backend could observe the target and time fallback is off.
    CannotVerify { elapsed: Duration, reason: String },
}

impl Verdict {
    pub fn should_proceed(&self) -> bool {
        !matches!(self, Verdict::CannotVerify { .. })
    }

    /// True only when a positive signal decided.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Verdict::Completed { .. })
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Verdict::Completed { elapsed, .. }
            | Verdict::OptimisticTimeout { elapsed, .. }
            | Verdict::Abandoned { elapsed, .. }
            | Verdict::CannotVerify { elapsed, .. } => *elapsed,
        }
    }

    pub fn method(&self) -> Option<DetectionMethod> {
        match self {
            Verdict::Completed { method, .. } => Some(*method),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Completed { method, elapsed } => {
                write!(f, "completed via {} after {:.1}s", method, elapsed.as_secs_f32())
            }
            Verdict::OptimisticTimeout { elapsed, state } => write!(
                f,
                "timed out after {:.1}s ({}), proceeding",
                elapsed.as_secs_f32(),
                state.phase
            ),
            Verdict::Abandoned { elapsed, state } => {
                write!(f, "abandoned after {:.1}s", elapsed.as_secs_f32())?;
                if state.reverts > 0 {
                    write!(f, " ({} unconfirmed sightings)", state.reverts)?;
                }
                Ok(())
            }
            Verdict::CannotVerify { reason, .. } => write!(f, "cannot verify: {}", reason),
        }
    }
}
