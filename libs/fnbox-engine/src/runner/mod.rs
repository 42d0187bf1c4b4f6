//! Execution Runner.
//!
//! A [`Runner`] launches packaged code and hands back a [`RunnerHandle`] for
//! the live unit. The handle is the only thing the supervisor and the cleanup
//! path touch; which backend sits behind it is decided once, at launch.

mod container;
mod process;

pub use container::{ContainerHandle, ContainerRunner, CONTAINER_LABEL, CONTAINER_WORKDIR};
pub use process::{ProcessHandle, ProcessRunner};

use crate::capture::RunOutput;
use crate::error::Result;
use crate::workspace::Workspace;
use async_trait::async_trait;
use fnbox_common::types::Isolation;
use std::time::Duration;

#[async_trait]
pub trait Runner: Send + Sync {
    fn isolation(&self) -> Isolation;

    /// Start the interpreter for `workspace`'s language against its source file
    async fn launch(&self, workspace: &Workspace) -> Result<RunnerHandle>;
}

/// Live execution unit: a host process or a container instance
#[derive(Debug)]
pub enum RunnerHandle {
    Process(ProcessHandle),
    Container(ContainerHandle),
}

impl RunnerHandle {
    /// Human-readable identity for logs, e.g. `pid 4242`
    pub fn unit(&self) -> String {
        match self {
            RunnerHandle::Process(handle) => handle.unit(),
            RunnerHandle::Container(handle) => handle.unit(),
        }
    }

    /// Block until the unit exits, collecting its streams.
    ///
    /// Cancel-safe: dropping the future leaves the handle ready for
    /// [`RunnerHandle::terminate`].
    pub async fn wait(&mut self) -> Result<RunOutput> {
        match self {
            RunnerHandle::Process(handle) => handle.wait().await,
            RunnerHandle::Container(handle) => handle.wait().await,
        }
    }

    /// Forcibly stop the unit and wait up to `grace` for it to be gone.
    /// Only the first call does anything.
    pub async fn terminate(&mut self, grace: Duration) -> Result<()> {
        match self {
            RunnerHandle::Process(handle) => handle.terminate(grace).await,
            RunnerHandle::Container(handle) => handle.terminate(grace).await,
        }
    }

    pub fn is_terminated(&self) -> bool {
        match self {
            RunnerHandle::Process(handle) => handle.is_terminated(),
            RunnerHandle::Container(handle) => handle.is_terminated(),
        }
    }

    /// Reclaim whatever the unit still holds on the host
    pub async fn release(self) -> Result<()> {
        match self {
            RunnerHandle::Process(handle) => handle.release().await,
            RunnerHandle::Container(handle) => handle.release().await,
        }
    }
}
