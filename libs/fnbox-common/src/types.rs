use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Smallest accepted per-function timeout, in seconds
pub const MIN_TIMEOUT_SECONDS: u32 = 1;
/// Largest accepted per-function timeout, in seconds
pub const MAX_TIMEOUT_SECONDS: u32 = 30;

/// A name that matches no variant, from `Language` or `Isolation` parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Interpreters a function may be written for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::JavaScript];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }
}

impl FromStr for Language {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "python" => Ok(Language::Python),
            "javascript" => Ok(Language::JavaScript),
            _ => Err(UnknownVariant {
                kind: "language",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a function is isolated from the host while it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Host interpreter, no resource ceiling. Development only.
    Process,
    /// Memory-capped, auto-removed container
    Container,
}

impl FromStr for Isolation {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "process" => Ok(Isolation::Process),
            "container" | "docker" => Ok(Isolation::Container),
            _ => Err(UnknownVariant {
                kind: "isolation",
                value: s.to_string(),
            }),
        }
    }
}

impl Default for Isolation {
    fn default() -> Self {
        Isolation::Container
    }
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Isolation::Process => f.write_str("process"),
            Isolation::Container => f.write_str("container"),
        }
    }
}

/// What the engine needs to run one function.
///
/// `language` stays a plain tag so that a record holding an unknown language
/// still reaches the engine and gets rejected there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub language: String,
    pub code: String,
    pub timeout_seconds: u32,
}

impl FunctionSpec {
    pub fn new(language: impl Into<String>, code: impl Into<String>, timeout_seconds: u32) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            timeout_seconds,
        }
    }
}

/// A stored function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub id: u64,
    pub name: String,
    pub route: String,
    pub language: Language,
    pub timeout: u32,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FunctionRecord {
    pub fn spec(&self) -> FunctionSpec {
        FunctionSpec::new(self.language.as_str(), self.code.clone(), self.timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCreate {
    pub name: String,
    pub route: String,
    pub language: Language,
    pub timeout: u32,
    pub code: String,
}

impl FunctionCreate {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.route.trim().is_empty() {
            return Err("route must not be empty".to_string());
        }
        validate_timeout(self.timeout)
    }
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub timeout: Option<u32>,
    #[serde(default)]
    pub code: Option<String>,
}

impl FunctionUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.route.is_none()
            && self.language.is_none()
            && self.timeout.is_none()
            && self.code.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err("name must not be empty".to_string());
        }
        if matches!(&self.route, Some(route) if route.trim().is_empty()) {
            return Err("route must not be empty".to_string());
        }
        match self.timeout {
            Some(timeout) => validate_timeout(timeout),
            None => Ok(()),
        }
    }

    /// Apply the present fields onto `record`
    pub fn apply(self, record: &mut FunctionRecord) {
        if let Some(name) = self.name {
            record.name = name;
        }
        if let Some(route) = self.route {
            record.route = route;
        }
        if let Some(language) = self.language {
            record.language = language;
        }
        if let Some(timeout) = self.timeout {
            record.timeout = timeout;
        }
        if let Some(code) = self.code {
            record.code = code;
        }
        record.updated_at = Utc::now();
    }
}

fn validate_timeout(timeout: u32) -> Result<(), String> {
    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
        return Err(format!(
            "timeout must be between {} and {} seconds",
            MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    RuntimeFailure,
    Timeout,
    UnsupportedLanguage,
    InfrastructureError,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::RuntimeFailure => "runtime_failure",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::UnsupportedLanguage => "unsupported_language",
            ExecutionStatus::InfrastructureError => "infrastructure_error",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single outcome record of one execution request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
}

impl ExecutionResult {
    pub fn success(output: String) -> Self {
        Self {
            status: ExecutionStatus::Success,
            output,
            error_detail: None,
            exit_code: Some(0),
        }
    }

    pub fn runtime_failure(output: String, stderr: String, exit_code: i64) -> Self {
        Self {
            status: ExecutionStatus::RuntimeFailure,
            output,
            error_detail: Some(stderr),
            exit_code: Some(exit_code),
        }
    }

    pub fn timeout() -> Self {
        Self {
            status: ExecutionStatus::Timeout,
            output: String::new(),
            error_detail: None,
            exit_code: None,
        }
    }

    pub fn unsupported_language(language: &str) -> Self {
        Self {
            status: ExecutionStatus::UnsupportedLanguage,
            output: String::new(),
            error_detail: Some(format!("language not supported: {}", language)),
            exit_code: None,
        }
    }

    pub fn infrastructure_error(detail: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::InfrastructureError,
            output: String::new(),
            error_detail: Some(detail.into()),
            exit_code: None,
        }
    }
}
