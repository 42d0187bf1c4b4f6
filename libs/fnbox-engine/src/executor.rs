//! Execution Orchestrator.
//!
//! Sequences package → launch → supervise → capture → cleanup for one
//! request and folds every engine fault into an [`ExecutionResult`].

use crate::cleanup::CleanupManager;
use crate::config::{EngineSettings, LanguageConfig, LanguageConfigManager};
use crate::error::{EngineError, Result};
use crate::runner::{ContainerRunner, ProcessRunner, Runner, RunnerHandle};
use crate::state::{ExecutionState, StateTracker};
use crate::supervisor::{Supervised, TimeoutSupervisor};
use crate::workspace::{Packager, Workspace};
use bollard::Docker;
use fnbox_common::types::{
    ExecutionResult, FunctionSpec, Isolation, MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Executor {
    packager: Packager,
    supervisor: TimeoutSupervisor,
    cleanup: CleanupManager,
    process: ProcessRunner,
    container: Option<ContainerRunner>,
    default_isolation: Isolation,
}

impl Executor {
    /// `docker` is optional; without it container-isolated languages fail
    /// with an infrastructure error instead of falling back to the host.
    pub fn new(languages: LanguageConfigManager, settings: EngineSettings, docker: Option<Docker>) -> Self {
        Self {
            packager: Packager::new(settings.workspace_root, Arc::new(languages)),
            supervisor: TimeoutSupervisor::new(settings.termination_grace),
            cleanup: CleanupManager::new(),
            process: ProcessRunner::new(),
            container: docker.map(ContainerRunner::new),
            default_isolation: settings.default_isolation,
        }
    }

    pub fn container_runner(&self) -> Option<&ContainerRunner> {
        self.container.as_ref()
    }

    /// Isolation a language runs under: its own override, else the engine default
    fn isolation_for(&self, language: &LanguageConfig) -> Isolation {
        language.isolation.unwrap_or(self.default_isolation)
    }

    /// Run one function to completion. Never fails; faults come back as
    /// `InfrastructureError` results.
    pub async fn execute(&self, spec: &FunctionSpec) -> ExecutionResult {
        let execution_id = Uuid::new_v4();
        let span = info_span!("execution", %execution_id, language = %spec.language);
        self.run(spec).instrument(span).await
    }

    async fn run(&self, spec: &FunctionSpec) -> ExecutionResult {
        let mut state = StateTracker::new();
        let deadline = Duration::from_secs(u64::from(clamp_timeout(spec.timeout_seconds)));

        state.advance(ExecutionState::Packaging);
        let workspace = match self.packager.package(spec).await {
            Ok(workspace) => workspace,
            Err(EngineError::UnsupportedLanguage(language)) => {
                info!(language = %language, "Rejected unsupported language");
                state.advance(ExecutionState::Rejected);
                state.advance(ExecutionState::Cleaned);
                return ExecutionResult::unsupported_language(&language);
            }
            Err(e) => {
                error!(error = %e, "Packaging failed");
                state.advance(ExecutionState::InfraFailed);
                state.advance(ExecutionState::Cleaned);
                return ExecutionResult::infrastructure_error(e.to_string());
            }
        };

        state.advance(ExecutionState::Launching);
        let launched = match self.select_runner(workspace.language()) {
            Ok(runner) => runner.launch(&workspace).await,
            Err(e) => Err(e),
        };
        let mut handle = match launched {
            Ok(handle) => handle,
            Err(e) => {
                error!(error = %e, "Launch failed");
                state.advance(ExecutionState::InfraFailed);
                self.finish(&mut state, workspace, None).await;
                return ExecutionResult::infrastructure_error(e.to_string());
            }
        };

        state.advance(ExecutionState::Running);
        let (outcome, result) = classify(self.supervisor.run_with_deadline(&mut handle, deadline).await);
        state.advance(outcome);
        self.finish(&mut state, workspace, Some(handle)).await;

        info!(status = %result.status, "Execution finished");
        result
    }

    fn select_runner(&self, language: &LanguageConfig) -> Result<&dyn Runner> {
        let runner: &dyn Runner = match self.isolation_for(language) {
            Isolation::Process => &self.process,
            Isolation::Container => match &self.container {
                Some(runner) => runner,
                None => {
                    return Err(EngineError::BackendUnavailable(
                        "container isolation requested but no Docker client is configured"
                            .to_string(),
                    ))
                }
            },
        };
        debug!(isolation = %runner.isolation(), "Selected runner");
        Ok(runner)
    }

    async fn finish(&self, state: &mut StateTracker, workspace: Workspace, handle: Option<RunnerHandle>) {
        let report = self.cleanup.release(Some(workspace), handle).await;
        if !report.is_clean() {
            warn!(failures = ?report.failures, "Cleanup incomplete");
        }
        state.advance(ExecutionState::Cleaned);
    }
}

/// Clamp a requested timeout into the supported window
pub fn clamp_timeout(seconds: u32) -> u32 {
    seconds.clamp(MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS)
}

fn classify(outcome: Supervised) -> (ExecutionState, ExecutionResult) {
    match outcome {
        Supervised::Exited(output) if output.succeeded() => {
            (ExecutionState::Completed, ExecutionResult::success(output.stdout))
        }
        Supervised::Exited(output) => (
            ExecutionState::RuntimeFailed,
            ExecutionResult::runtime_failure(output.stdout, output.stderr, output.exit_code),
        ),
        Supervised::TimedOut => (ExecutionState::TimedOut, ExecutionResult::timeout()),
        Supervised::Faulted(e) => {
            error!(error = %e, "Failed to collect outcome");
            (
                ExecutionState::InfraFailed,
                ExecutionResult::infrastructure_error(e.to_string()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entries, process_exits, shell_language};
    use fnbox_common::types::ExecutionStatus;
    use std::path::Path;
    use tokio::time::Instant;

    fn executor(root: &Path) -> Executor {
        let mut broken = shell_language();
        broken.name = "broken".to_string();
        broken.command = "fnbox-no-such-interpreter".to_string();

        let mut boxed = shell_language();
        boxed.name = "boxed".to_string();
        boxed.isolation = Some(Isolation::Container);

        let languages = LanguageConfigManager::from_configs([shell_language(), broken, boxed]);
        let settings = EngineSettings {
            workspace_root: root.to_path_buf(),
            termination_grace: Duration::from_secs(2),
            default_isolation: Isolation::Process,
        };
        Executor::new(languages, settings, None)
    }

    fn shell(code: &str, timeout: u32) -> FunctionSpec {
        FunctionSpec::new("shell", code, timeout)
    }

    #[test]
    fn test_clamp_timeout() {
        assert_eq!(clamp_timeout(0), 1);
        assert_eq!(clamp_timeout(5), 5);
        assert_eq!(clamp_timeout(300), 30);
    }

    #[tokio::test]
    async fn test_success_returns_stdout_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let result = executor(root.path())
            .execute(&shell("printf 'a\\n  b\\n'; echo noise >&2", 5))
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "a\n  b\n");
        assert_eq!(result.error_detail, None);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_runtime_failure_keeps_stderr_and_code() {
        let root = tempfile::tempdir().unwrap();
        let result = executor(root.path())
            .execute(&shell("echo partial; echo 'boom' >&2; exit 3", 5))
            .await;

        assert_eq!(result.status, ExecutionStatus::RuntimeFailure);
        assert_eq!(result.output, "partial\n");
        assert!(result.error_detail.as_deref().unwrap().contains("boom"));
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_timeout_is_enforced() {
        let root = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let result = executor(root.path())
            .execute(&shell("echo started; while true; do :; done", 1))
            .await;

        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.output.is_empty());
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_background_child_does_not_hold_success() {
        let root = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let result = executor(root.path())
            .execute(&shell("sleep 40 & echo $!; echo done", 5))
            .await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert!(started.elapsed() < Duration::from_secs(3));

        let mut lines = result.output.lines();
        let background: u32 = lines.next().unwrap().parse().unwrap();
        assert_eq!(lines.next(), Some("done"));
        assert!(process_exits(background).await);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_timeout_kills_background_children() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let pidfile = scratch.path().join("background.pid");
        let code = format!(
            "sleep 41 >/dev/null 2>&1 & echo $! > {}; while true; do :; done",
            pidfile.display()
        );

        let result = executor(root.path()).execute(&shell(&code, 1)).await;
        assert_eq!(result.status, ExecutionStatus::Timeout);

        let background: u32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(process_exits(background).await);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_allocates_nothing() {
        let root = tempfile::tempdir().unwrap();
        let result = executor(root.path())
            .execute(&FunctionSpec::new("ruby", "puts 'hi'", 5))
            .await;

        assert_eq!(result.status, ExecutionStatus::UnsupportedLanguage);
        assert!(result.error_detail.unwrap().contains("ruby"));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_infrastructure_error() {
        let root = tempfile::tempdir().unwrap();
        let result = executor(root.path())
            .execute(&FunctionSpec::new("broken", "true", 5))
            .await;

        assert_eq!(result.status, ExecutionStatus::InfrastructureError);
        assert!(result.error_detail.unwrap().contains("fnbox-no-such-interpreter"));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_container_without_docker_is_infrastructure_error() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(root.path());
        assert!(executor.container_runner().is_none());

        let result = executor.execute(&FunctionSpec::new("boxed", "echo hi", 5)).await;
        assert_eq!(result.status, ExecutionStatus::InfrastructureError);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_no_workspace_survives_mixed_runs() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(root.path());
        let specs = [
            shell("echo ok", 5),
            shell("exit 1", 5),
            shell("while true; do :; done", 1),
            FunctionSpec::new("ruby", "puts 1", 5),
            FunctionSpec::new("broken", "true", 5),
            FunctionSpec::new("boxed", "true", 5),
        ];

        for round in 0..3 {
            for spec in &specs {
                executor.execute(spec).await;
                assert_eq!(entries(root.path()), 0, "round {} {:?}", round, spec.language);
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_executions_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let executor = executor(root.path());
        let one = shell("echo one > marker; sleep 0.3; cat marker", 5);
        let two = shell("echo two > marker; sleep 0.3; cat marker", 5);

        let (a, b) = tokio::join!(executor.execute(&one), executor.execute(&two));

        assert_eq!(a.output, "one\n");
        assert_eq!(b.output, "two\n");
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    #[ignore] // Requires python3 on the host
    async fn test_python_on_host() {
        let root = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            workspace_root: root.path().to_path_buf(),
            default_isolation: Isolation::Process,
            ..Default::default()
        };
        let executor = Executor::new(LanguageConfigManager::builtin(), settings, None);

        let result = executor
            .execute(&FunctionSpec::new("python", "print('Hello from Python')", 5))
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "Hello from Python\n");

        let result = executor
            .execute(&FunctionSpec::new("python", "raise ValueError('bad')", 5))
            .await;
        assert_eq!(result.status, ExecutionStatus::RuntimeFailure);
        assert!(result.error_detail.unwrap().contains("ValueError"));
    }

    #[tokio::test]
    #[ignore] // Requires node on the host
    async fn test_javascript_on_host() {
        let root = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            workspace_root: root.path().to_path_buf(),
            default_isolation: Isolation::Process,
            ..Default::default()
        };
        let executor = Executor::new(LanguageConfigManager::builtin(), settings, None);

        let result = executor
            .execute(&FunctionSpec::new("javascript", "console.log('Hello from JS')", 5))
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "Hello from JS\n");
    }

    #[tokio::test]
    #[ignore] // Requires node on the host
    async fn test_javascript_exit_code_on_host() {
        let root = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            workspace_root: root.path().to_path_buf(),
            default_isolation: Isolation::Process,
            ..Default::default()
        };
        let executor = Executor::new(LanguageConfigManager::builtin(), settings, None);

        let result = executor
            .execute(&FunctionSpec::new("javascript", "process.exit(1)", 5))
            .await;
        assert_eq!(result.status, ExecutionStatus::RuntimeFailure);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    #[ignore] // Requires python3 on the host
    async fn test_python_busy_loop_times_out_on_host() {
        let root = tempfile::tempdir().unwrap();
        let settings = EngineSettings {
            workspace_root: root.path().to_path_buf(),
            default_isolation: Isolation::Process,
            ..Default::default()
        };
        let executor = Executor::new(LanguageConfigManager::builtin(), settings, None);

        let started = Instant::now();
        let result = executor
            .execute(&FunctionSpec::new("python", "while True: pass", 1))
            .await;
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    #[ignore] // Requires Docker and the fnbox-python image
    async fn test_python_in_container() {
        let root = tempfile::tempdir().unwrap();
        let docker = Docker::connect_with_local_defaults().expect("Failed to connect to Docker");
        let settings = EngineSettings {
            workspace_root: root.path().to_path_buf(),
            ..Default::default()
        };
        let executor = Executor::new(LanguageConfigManager::builtin(), settings, Some(docker));

        let result = executor
            .execute(&FunctionSpec::new("python", "print('Hello from Python')", 5))
            .await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "Hello from Python\n");

        let result = executor
            .execute(&FunctionSpec::new("python", "while True: pass", 2))
            .await;
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert_eq!(entries(root.path()), 0);
    }
}
