//! Sandboxed function execution.
//!
//! An [`Executor`] takes a [`FunctionSpec`](fnbox_common::types::FunctionSpec),
//! writes the code into a throwaway workspace, runs it under a host process or
//! a Docker container with a hard deadline, and always tears both down before
//! returning an [`ExecutionResult`](fnbox_common::types::ExecutionResult).

mod capture;
mod cleanup;
pub mod config;
mod error;
mod executor;
pub mod runner;
mod state;
mod supervisor;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use capture::{OutputCapture, RunOutput};
pub use cleanup::{CleanupManager, CleanupReport};
pub use config::{EngineSettings, LanguageConfig, LanguageConfigManager};
pub use error::{EngineError, Result};
pub use executor::{clamp_timeout, Executor};
pub use state::{ExecutionState, StateTracker};
pub use supervisor::{Supervised, TimeoutSupervisor};
