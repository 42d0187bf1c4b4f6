use super::{Runner, RunnerHandle};
use crate::capture::{OutputCapture, RunOutput};
use crate::error::{EngineError, Result};
use crate::workspace::Workspace;
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{EventMessage, HostConfig};
use bollard::system::EventsOptions;
use bollard::Docker;
use fnbox_common::types::Isolation;
use futures_util::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Mount point of the workspace inside the container
pub const CONTAINER_WORKDIR: &str = "/app";

/// Label set on every container this runner creates
pub const CONTAINER_LABEL: &str = "fnbox.managed";

/// How far back the exit listener replays daemon events, to absorb clock skew
const EVENT_REPLAY_WINDOW: Duration = Duration::from_secs(60);

type OutputStream = Pin<Box<dyn Stream<Item = std::result::Result<LogOutput, DockerError>> + Send>>;

/// Docker-based runner.
///
/// **Container rules:**
/// 1. Image per language, pulled on first use if missing locally
/// 2. Workspace bind-mounted read-write at `/app`, used as working dir
/// 3. Memory ceiling from the language config, swap capped to the same value
/// 4. Network disabled
/// 5. `auto_remove` set, so a normal exit leaves nothing behind
/// 6. Output attached before start, so nothing is lost to auto-removal
/// 7. Exit code read from the `die` event, which outlives the container
///
/// The `Docker` client is injected by the composition root and shared by
/// every request; bollard clients are cheap to clone and safe to share.
#[derive(Clone)]
pub struct ContainerRunner {
    docker: Docker,
}

impl ContainerRunner {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Check the daemon is reachable
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::BackendUnavailable(e.to_string()))
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| {
                EngineError::BackendUnavailable(format!("failed to pull image {}: {}", image, e))
            })?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }
}

#[async_trait]
impl Runner for ContainerRunner {
    fn isolation(&self) -> Isolation {
        Isolation::Container
    }

    async fn launch(&self, workspace: &Workspace) -> Result<RunnerHandle> {
        let language = workspace.language();
        self.ensure_image(&language.image).await?;

        let name = format!("fnbox-{}", uuid::Uuid::new_v4());
        let since = event_cursor();

        let mut cmd = Vec::with_capacity(language.args.len() + 2);
        cmd.push(language.command.clone());
        cmd.extend(language.args.iter().cloned());
        cmd.push(workspace.source_file_name());

        let memory = language.memory_limit_bytes();
        let config = Config {
            image: Some(language.image.clone()),
            cmd: Some(cmd),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            labels: Some(HashMap::from([(
                CONTAINER_LABEL.to_string(),
                "true".to_string(),
            )])),
            host_config: Some(HostConfig {
                memory: Some(memory),
                memory_swap: Some(memory),
                auto_remove: Some(true),
                network_mode: Some("none".to_string()),
                binds: Some(vec![format!(
                    "{}:{}:rw",
                    workspace.path().display(),
                    CONTAINER_WORKDIR
                )]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: name.as_str(),
            platform: None,
        };

        let created = self
            .docker
            .create_container(Some(create_options), config)
            .await?;

        // Guard the container as soon as it exists: any early return below
        // drops the handle, which force-removes it
        let mut handle = ContainerHandle::new(self.docker.clone(), created.id, name);

        let AttachContainerResults { output, .. } = self
            .docker
            .attach_container(
                &handle.id,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        handle.output = Some(output);

        // The daemon replays events from `since`, so a container that dies
        // before the listener connects is still observed
        handle.exit = Some(tokio::spawn(wait_for_exit(
            self.docker.clone(),
            handle.id.clone(),
            since,
        )));

        self.docker
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await?;

        debug!(
            unit = %handle.unit(),
            image = %language.image,
            memory_bytes = memory,
            "Container launched"
        );
        Ok(RunnerHandle::Container(handle))
    }
}

fn event_cursor() -> String {
    // A clock before the epoch replays from 0; the id filter still applies
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.saturating_sub(EVENT_REPLAY_WINDOW).as_secs().to_string()
}

async fn wait_for_exit(docker: Docker, id: String, since: String) -> Result<i64> {
    let filters = HashMap::from([
        ("type".to_string(), vec!["container".to_string()]),
        ("container".to_string(), vec![id.clone()]),
        ("event".to_string(), vec!["die".to_string()]),
    ]);
    let mut events = docker.events(Some(EventsOptions::<String> {
        since: Some(since),
        until: None,
        filters,
    }));

    while let Some(event) = events.next().await {
        let event = event?;
        match die_exit_code(&event) {
            Some(code) => return Ok(code),
            None => warn!(container = %id, action = ?event.action, "Event without exit code"),
        }
    }
    Err(EngineError::Wait(format!(
        "event stream for container {} ended before it exited",
        id
    )))
}

/// Exit code carried by a container `die` event
fn die_exit_code(event: &EventMessage) -> Option<i64> {
    if event.action.as_deref() != Some("die") {
        return None;
    }
    event
        .actor
        .as_ref()?
        .attributes
        .as_ref()?
        .get("exitCode")?
        .parse()
        .ok()
}

/// 404: already removed. 409: not running, or removal already in progress.
fn is_gone(error: &DockerError) -> bool {
    matches!(
        error,
        DockerError::DockerResponseServerError {
            status_code: 404 | 409,
            ..
        }
    )
}

pub struct ContainerHandle {
    docker: Docker,
    id: String,
    name: String,
    output: Option<OutputStream>,
    exit: Option<JoinHandle<Result<i64>>>,
    terminated: bool,
    removed: bool,
}

impl fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("terminated", &self.terminated)
            .field("removed", &self.removed)
            .finish()
    }
}

impl ContainerHandle {
    fn new(docker: Docker, id: String, name: String) -> Self {
        Self {
            docker,
            id,
            name,
            output: None,
            exit: None,
            terminated: false,
            removed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> String {
        format!("container {}", self.name)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub(super) async fn wait(&mut self) -> Result<RunOutput> {
        let mut capture = OutputCapture::new();
        let unit = self.unit();

        // The attach stream ends when the container stops
        if let Some(output) = self.output.as_mut() {
            while let Some(frame) = output.next().await {
                match frame {
                    Ok(frame) => capture.push_log(frame),
                    Err(e) => {
                        warn!(unit = %unit, error = %e, "Error reading container output");
                        break;
                    }
                }
            }
        }
        self.output = None;

        let exit = self
            .exit
            .as_mut()
            .ok_or_else(|| EngineError::Wait("container exit was not observed".to_string()))?;
        let exit_code = match exit.await {
            Ok(result) => result?,
            Err(e) => return Err(EngineError::Wait(e.to_string())),
        };
        self.exit = None;

        let mut output = capture.finish(exit_code);
        if exit_code == 137 {
            output
                .stderr
                .push_str("\n[Container killed: likely exceeded memory limit]");
        }
        Ok(output)
    }

    pub(super) async fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.terminated = true;

        let options = KillContainerOptions { signal: "SIGKILL" };
        match self.docker.kill_container(&self.id, Some(options)).await {
            Ok(()) => {}
            // Exited (and maybe auto-removed) in the meantime
            Err(e) if is_gone(&e) => return Ok(()),
            Err(e) => {
                return Err(EngineError::Terminate {
                    unit: self.unit(),
                    reason: e.to_string(),
                })
            }
        }

        let Some(exit) = self.exit.as_mut() else {
            return Ok(());
        };
        match tokio::time::timeout(grace, exit).await {
            Ok(_) => {
                self.exit = None;
                Ok(())
            }
            Err(_) => Err(EngineError::Terminate {
                unit: self.unit(),
                reason: format!("exit not observed within {:?} of kill", grace),
            }),
        }
    }

    /// Force-remove the instance; auto-removal may already have done it
    pub(super) async fn release(mut self) -> Result<()> {
        if let Some(exit) = self.exit.take() {
            exit.abort();
        }
        self.output = None;
        self.removed = true;

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(&self.id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_gone(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if let Some(exit) = self.exit.take() {
            exit.abort();
        }
        if self.removed {
            return;
        }

        // Dropped without release (panic or cancelled request); cannot be async here
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(container = %self.name, "No runtime to remove container on drop");
            return;
        };
        let docker = self.docker.clone();
        let id = self.id.clone();
        let name = self.name.clone();
        runtime.spawn(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            match docker.remove_container(&id, Some(options)).await {
                Ok(()) => {}
                Err(e) if is_gone(&e) => {}
                Err(e) => warn!(container = %name, error = %e, "Failed to remove container on drop"),
            }
        });
    }
}
