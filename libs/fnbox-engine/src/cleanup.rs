//! Cleanup Manager.
//!
//! Runs on every exit path of an execution once a workspace exists. Failures
//! are logged and reported back, never turned into an execution outcome.

use crate::runner::RunnerHandle;
use crate::workspace::Workspace;
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub failures: Vec<String>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupManager;

impl CleanupManager {
    pub fn new() -> Self {
        Self
    }

    /// Release the runner unit first (a container still holds the bind mount),
    /// then remove the workspace tree.
    pub async fn release(
        &self,
        workspace: Option<Workspace>,
        handle: Option<RunnerHandle>,
    ) -> CleanupReport {
        let mut report = CleanupReport::default();

        if let Some(handle) = handle {
            let unit = handle.unit();
            match handle.release().await {
                Ok(()) => debug!(unit = %unit, "Runner released"),
                Err(e) => {
                    warn!(unit = %unit, error = %e, "Failed to release runner");
                    report.failures.push(format!("{}: {}", unit, e));
                }
            }
        }

        if let Some(workspace) = workspace {
            let path = workspace.path().display().to_string();
            let removed = tokio::task::spawn_blocking(move || workspace.release()).await;
            match removed {
                Ok(Ok(())) => debug!(workspace = %path, "Workspace removed"),
                Ok(Err(e)) => {
                    warn!(workspace = %path, error = %e, "Failed to remove workspace");
                    report.failures.push(format!("{}: {}", path, e));
                }
                Err(e) => {
                    warn!(workspace = %path, error = %e, "Workspace removal task failed");
                    report.failures.push(format!("{}: {}", path, e));
                }
            }
        }

        report
    }
}
