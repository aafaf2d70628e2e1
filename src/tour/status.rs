//! Tour progress state machine — tracks a user's traversal status.

use std::fmt;

/// Why a tour ended without completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The user pressed the end-tour control.
    UserExited,
    /// The tour had no steps when the user tried to navigate.
    NoSteps,
    /// The user's recorded current step no longer exists.
    StepNotFound,
    /// Any other recorded reason string.
    Other(String),
}

impl ExitReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::UserExited => "user_exited",
            Self::NoSteps => "error_no_steps",
            Self::StepNotFound => "error_step_not_found",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per (user, guild, tour) status.
///
/// Progresses not_started → in_progress → {completed | exited}; terminal
/// states accept a fresh restart at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TourStatus {
    NotStarted,
    InProgress,
    Completed,
    Exited(ExitReason),
}

impl TourStatus {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// A restart (any terminal state back to InProgress) is always allowed.
    pub fn can_transition_to(&self, target: &TourStatus) -> bool {
        use TourStatus::*;
        matches!(
            (self, target),
            (NotStarted, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Exited(_))
                | (Completed, InProgress)
                | (Exited(_), InProgress)
        )
    }

    /// Whether this status is terminal for the current traversal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Exited(_))
    }

    /// The string written to the `status` column.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Exited(reason) => reason.as_str(),
        }
    }

    /// Parse a `status` column value. Unknown strings are treated as exit
    /// reasons so a legacy or hand-edited row never traps a user.
    pub fn parse(s: &str) -> Self {
        match s {
            "not_started" => Self::NotStarted,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "user_exited" => Self::Exited(ExitReason::UserExited),
            "error_no_steps" => Self::Exited(ExitReason::NoSteps),
            "error_step_not_found" => Self::Exited(ExitReason::StepNotFound),
            other => Self::Exited(ExitReason::Other(other.to_string())),
        }
    }
}

impl fmt::Display for TourStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A navigation action from the user-facing tour controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    Next,
    Back,
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use TourStatus::*;
        assert!(NotStarted.can_transition_to(&InProgress));
        assert!(InProgress.can_transition_to(&InProgress));
        assert!(InProgress.can_transition_to(&Completed));
        assert!(InProgress.can_transition_to(&Exited(ExitReason::UserExited)));
        // Restarts from terminal states
        assert!(Completed.can_transition_to(&InProgress));
        assert!(Exited(ExitReason::NoSteps).can_transition_to(&InProgress));
    }

    #[test]
    fn invalid_transitions() {
        use TourStatus::*;
        assert!(!NotStarted.can_transition_to(&Completed));
        assert!(!NotStarted.can_transition_to(&Exited(ExitReason::UserExited)));
        assert!(!Completed.can_transition_to(&Completed));
        assert!(!Completed.can_transition_to(&Exited(ExitReason::UserExited)));
        assert!(!Exited(ExitReason::UserExited).can_transition_to(&Completed));
    }

    #[test]
    fn is_terminal() {
        assert!(TourStatus::Completed.is_terminal());
        assert!(TourStatus::Exited(ExitReason::StepNotFound).is_terminal());
        assert!(!TourStatus::NotStarted.is_terminal());
        assert!(!TourStatus::InProgress.is_terminal());
    }

    #[test]
    fn status_string_roundtrip() {
        let statuses = [
            TourStatus::NotStarted,
            TourStatus::InProgress,
            TourStatus::Completed,
            TourStatus::Exited(ExitReason::UserExited),
            TourStatus::Exited(ExitReason::NoSteps),
            TourStatus::Exited(ExitReason::StepNotFound),
        ];
        for status in statuses {
            assert_eq!(TourStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn unknown_status_parses_as_exit_reason() {
        let parsed = TourStatus::parse("aborted_by_admin");
        assert_eq!(
            parsed,
            TourStatus::Exited(ExitReason::Other("aborted_by_admin".into()))
        );
        assert!(parsed.is_terminal());
    }
}
