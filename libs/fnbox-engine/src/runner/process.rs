use super::{Runner, RunnerHandle};
use crate::capture::{OutputCapture, RunOutput};
use crate::error::{EngineError, Result};
use crate::workspace::Workspace;
use async_trait::async_trait;
use fnbox_common::types::Isolation;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Runs the host interpreter directly against the workspace file.
///
/// The interpreter leads its own process group, and every kill targets the
/// whole group, so anything the function spawns dies with it. No memory or
/// CPU ceiling is applied; use only for trusted code.
#[derive(Debug, Default, Clone)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    fn isolation(&self) -> Isolation {
        Isolation::Process
    }

    async fn launch(&self, workspace: &Workspace) -> Result<RunnerHandle> {
        let language = workspace.language();

        let mut command = Command::new(&language.command);
        command
            .args(&language.args)
            .arg(workspace.source_file_name())
            .current_dir(workspace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let child = command.spawn().map_err(|source| EngineError::Launch {
            command: language.command.clone(),
            source,
        })?;

        let handle = ProcessHandle::new(child);
        debug!(unit = %handle.unit(), command = %language.command, "Process launched");
        Ok(RunnerHandle::Process(handle))
    }
}

#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    /// Also the process group id
    pid: Option<u32>,
    terminated: bool,
    released: bool,
}

impl ProcessHandle {
    fn new(child: Child) -> Self {
        let pid = child.id();
        Self {
            child,
            pid,
            terminated: false,
            released: false,
        }
    }

    fn kill_group(&self) -> io::Result<()> {
        match self.pid {
            Some(pgid) => kill_group(pgid),
            None => Ok(()),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn unit(&self) -> String {
        match self.pid {
            Some(pid) => format!("pid {}", pid),
            None => "pid ?".to_string(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(super) async fn wait(&mut self) -> Result<RunOutput> {
        let mut stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Wait("stdout was not captured".to_string()))?;
        let mut stderr = self
            .child
            .stderr
            .take()
            .ok_or_else(|| EngineError::Wait("stderr was not captured".to_string()))?;

        let mut out = Vec::new();
        let mut err = Vec::new();
        let pgid = self.pid;
        let child = &mut self.child;

        // Background descendants inherit the pipes; killing the group once
        // the interpreter exits closes them so the readers can finish
        let exited = async move {
            let status = child.wait().await;
            if let Some(pgid) = pgid {
                if let Err(e) = kill_group(pgid) {
                    warn!(pgid, error = %e, "Failed to kill process group after exit");
                }
            }
            status
        };
        let (status, out_read, err_read) = tokio::join!(
            exited,
            stdout.read_to_end(&mut out),
            stderr.read_to_end(&mut err),
        );

        let status = status.map_err(|e| EngineError::Wait(e.to_string()))?;
        out_read.map_err(|e| EngineError::Wait(format!("stdout: {}", e)))?;
        err_read.map_err(|e| EngineError::Wait(format!("stderr: {}", e)))?;

        Ok(OutputCapture::from_buffers(out, err).finish(exit_code(status)))
    }

    pub(super) async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        // SIGKILL to the group, including descendants of an exited leader
        self.kill_group().map_err(|e| EngineError::Terminate {
            unit: self.unit(),
            reason: e.to_string(),
        })?;

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(EngineError::Terminate {
                unit: self.unit(),
                reason: e.to_string(),
            }),
            Err(_) => Err(EngineError::Terminate {
                unit: self.unit(),
                reason: format!("still running {:?} after kill", grace),
            }),
        }
    }

    pub(super) async fn release(mut self) -> Result<()> {
        self.released = true;
        // Descendants may outlive a leader that already exited
        if let Err(e) = self.kill_group() {
            warn!(unit = %self.unit(), error = %e, "Failed to kill process group on release");
        }
        match self.child.try_wait() {
            Ok(Some(_)) => Ok(()),
            // Still alive on an error path that never reached the supervisor
            _ => {
                let _ = self.child.start_kill();
                self.child
                    .wait()
                    .await
                    .map(|_| ())
                    .map_err(|e| EngineError::Terminate {
                        unit: self.unit(),
                        reason: e.to_string(),
                    })
            }
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // kill_on_drop only reaches the leader
        if !self.released {
            let _ = self.kill_group();
        }
    }
}

/// SIGKILL every process in the group; an empty group is not an error
fn kill_group(pgid: u32) -> io::Result<()> {
    let Ok(raw) = i32::try_from(pgid) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pid {} out of range", pgid),
        ));
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Exit code, with signal deaths reported shell-style as 128 + signal
fn exit_code(status: ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return i64::from(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + i64::from(signal);
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LanguageConfigManager;
    use crate::testing::{launch_shell as launch, process_exits, shell_language};
    use crate::workspace::Packager;
    use fnbox_common::types::FunctionSpec;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_streams_are_separated() {
        let root = tempfile::tempdir().unwrap();
        let (_workspace, mut handle) = launch(root.path(), "echo out; echo err >&2").await;

        let output = handle.wait().await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_runs_inside_workspace() {
        let root = tempfile::tempdir().unwrap();
        let (_workspace, mut handle) = launch(root.path(), "ls").await;

        let output = handle.wait().await.unwrap();
        assert_eq!(output.stdout, "function.sh\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let (_workspace, mut handle) = launch(root.path(), "exit 7").await;

        let output = handle.wait().await.unwrap();
        assert_eq!(output.exit_code, 7);
    }

    #[tokio::test]
    async fn test_signal_death_maps_to_128_plus_signal() {
        let root = tempfile::tempdir().unwrap();
        let (_workspace, mut handle) = launch(root.path(), "kill -9 $$").await;

        let output = handle.wait().await.unwrap();
        assert_eq!(output.exit_code, 137);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let (_workspace, mut handle) = launch(root.path(), "while true; do :; done").await;

        handle.terminate(Duration::from_secs(2)).await.unwrap();
        assert!(handle.is_terminated());
        handle.terminate(Duration::from_secs(2)).await.unwrap();
        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_after_exit_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let (_workspace, mut handle) = launch(root.path(), "true").await;

        handle.wait().await.unwrap();
        handle.terminate(Duration::from_secs(2)).await.unwrap();
        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_when_leader_exits_despite_background_child() {
        let root = tempfile::tempdir().unwrap();
        let (_workspace, mut handle) = launch(root.path(), "sleep 30 & echo $!").await;

        let output = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("wait blocked on the background child")
            .unwrap();
        assert_eq!(output.exit_code, 0);

        let background: u32 = output.stdout.trim().parse().unwrap();
        assert!(process_exits(background).await);
        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_kills_descendants() {
        let root = tempfile::tempdir().unwrap();
        let pidfile = root.path().join("background.pid");
        let code = format!(
            "sleep 30 >/dev/null 2>&1 & echo $! > {}; while true; do :; done",
            pidfile.display()
        );
        let (_workspace, mut handle) = launch(root.path(), &code).await;

        let mut background = None;
        for _ in 0..40 {
            if let Ok(pid) = std::fs::read_to_string(&pidfile) {
                if let Ok(pid) = pid.trim().parse::<u32>() {
                    background = Some(pid);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let background = background.expect("background pid was not written");

        handle.terminate(Duration::from_secs(2)).await.unwrap();
        assert!(process_exits(background).await);
        handle.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_launch_error() {
        let root = tempfile::tempdir().unwrap();
        let mut config = shell_language();
        config.command = "fnbox-no-such-interpreter".to_string();
        let languages = Arc::new(LanguageConfigManager::from_configs([config]));
        let workspace = Packager::new(root.path(), languages)
            .package(&FunctionSpec::new("shell", "true", 5))
            .await
            .unwrap();

        let err = ProcessRunner::new().launch(&workspace).await.unwrap_err();
        assert!(matches!(err, EngineError::Launch { .. }));
    }
}
