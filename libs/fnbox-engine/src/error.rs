use thiserror::Error;

/// Faults raised inside the engine.
///
/// None of these cross `Executor::execute`; each is folded into an
/// `ExecutionResult` there.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to launch {command}: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Failed to collect output: {0}")]
    Wait(String),

    #[error("Failed to terminate {unit}: {reason}")]
    Terminate { unit: String, reason: String },

    #[error("Isolation backend unavailable: {0}")]
    BackendUnavailable(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
