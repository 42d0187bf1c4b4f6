//! Timeout Supervisor: races a runner's wait against the caller's deadline.

use crate::capture::RunOutput;
use crate::error::EngineError;
use crate::runner::RunnerHandle;
use std::time::Duration;
use tracing::{error, warn};

/// How a supervised wait ended
#[derive(Debug)]
pub enum Supervised {
    /// The unit exited on its own before the deadline
    Exited(RunOutput),
    /// The deadline fired first and the unit was killed
    TimedOut,
    /// Collecting the outcome failed for reasons outside the user code
    Faulted(EngineError),
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutSupervisor {
    grace: Duration,
}

impl TimeoutSupervisor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Wait for `handle` for at most `deadline`, killing it on expiry
    pub async fn run_with_deadline(&self, handle: &mut RunnerHandle, deadline: Duration) -> Supervised {
        let waited = tokio::time::timeout(deadline, handle.wait()).await;

        match waited {
            Ok(Ok(output)) => Supervised::Exited(output),
            Ok(Err(e)) => Supervised::Faulted(e),
            Err(_) => {
                warn!(
                    unit = %handle.unit(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Deadline elapsed, killing"
                );
                if let Err(e) = handle.terminate(self.grace).await {
                    // Cleanup makes one more attempt on release
                    error!(unit = %handle.unit(), error = %e, "Failed to terminate timed-out unit");
                }
                Supervised::TimedOut
            }
        }
    }
}
