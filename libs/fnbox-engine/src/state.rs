use std::fmt;
use tracing::{debug, error};

/// Lifecycle of one execution request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Pending,
    Packaging,
    Launching,
    Running,
    Completed,
    TimedOut,
    RuntimeFailed,
    Rejected,
    InfraFailed,
    Cleaned,
}

impl ExecutionState {
    /// Terminal outcomes; each is followed only by `Cleaned`
    pub fn is_outcome(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed
                | ExecutionState::TimedOut
                | ExecutionState::RuntimeFailed
                | ExecutionState::Rejected
                | ExecutionState::InfraFailed
        )
    }

    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;

        if next == InfraFailed {
            return !self.is_outcome() && self != Cleaned;
        }
        match (self, next) {
            (Pending, Packaging) => true,
            (Packaging, Launching) | (Packaging, Rejected) => true,
            (Launching, Running) => true,
            (Running, Completed) | (Running, TimedOut) | (Running, RuntimeFailed) => true,
            (from, Cleaned) => from.is_outcome(),
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Records the path one execution takes through [`ExecutionState`]
#[derive(Debug)]
pub struct StateTracker {
    current: ExecutionState,
    history: Vec<ExecutionState>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self {
            current: ExecutionState::Pending,
            history: vec![ExecutionState::Pending],
        }
    }

    pub fn current(&self) -> ExecutionState {
        self.current
    }

    pub fn history(&self) -> &[ExecutionState] {
        &self.history
    }

    pub fn advance(&mut self, next: ExecutionState) {
        if !self.current.can_transition_to(next) {
            error!(from = %self.current, to = %next, "Invalid execution state transition");
        } else {
            debug!(from = %self.current, to = %next, "Execution state");
        }
        self.current = next;
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionState::*;
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [Pending, Packaging, Launching, Running, Completed, Cleaned];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_rejection_skips_launch() {
        assert!(Packaging.can_transition_to(Rejected));
        assert!(Rejected.can_transition_to(Cleaned));
        assert!(!Rejected.can_transition_to(Launching));
        assert!(!Launching.can_transition_to(Rejected));
    }

    #[test]
    fn test_infra_failure_from_any_live_state() {
        for state in [Pending, Packaging, Launching, Running] {
            assert!(state.can_transition_to(InfraFailed), "{}", state);
        }
        assert!(!Completed.can_transition_to(InfraFailed));
        assert!(!Cleaned.can_transition_to(InfraFailed));
    }

    #[test]
    fn test_outcomes_only_lead_to_cleaned() {
        for outcome in [Completed, TimedOut, RuntimeFailed, Rejected, InfraFailed] {
            assert!(outcome.is_outcome());
            assert!(outcome.can_transition_to(Cleaned));
            assert!(!outcome.can_transition_to(Running));
        }
        assert!(!Running.can_transition_to(Cleaned));
    }

    #[test]
    fn test_tracker_history() {
        let mut tracker = StateTracker::new();
        tracker.advance(Packaging);
        tracker.advance(Rejected);
        tracker.advance(Cleaned);
        assert_eq!(tracker.current(), Cleaned);
        assert_eq!(tracker.history(), &[Pending, Packaging, Rejected, Cleaned]);
    }
}
