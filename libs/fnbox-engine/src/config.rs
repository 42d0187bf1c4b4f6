// Language configuration management for the execution engine
use anyhow::{bail, Context, Result};
use fnbox_common::types::{Isolation, Language};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Memory ceiling applied to containers when a language does not set one
pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 128;

/// How long a forcibly terminated unit gets to be observed as gone
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Base name of the packaged source file; the extension comes from the language
pub const SOURCE_FILE_STEM: &str = "function";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub image: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub file_extension: String,
    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u32,
    /// Overrides the engine-wide isolation for this language
    #[serde(default)]
    pub isolation: Option<Isolation>,
}

fn default_version() -> String {
    "latest".to_string()
}

fn default_memory_limit() -> u32 {
    DEFAULT_MEMORY_LIMIT_MB
}

impl LanguageConfig {
    /// File name of the packaged source, e.g. `function.py`
    pub fn source_file_name(&self) -> String {
        format!(
            "{}.{}",
            SOURCE_FILE_STEM,
            self.file_extension.trim_start_matches('.')
        )
    }

    pub fn memory_limit_bytes(&self) -> i64 {
        i64::from(self.memory_limit_mb) * 1024 * 1024
    }

    /// Built-in configuration for a supported language
    pub fn builtin(language: Language) -> Self {
        match language {
            Language::Python => Self {
                name: "python".to_string(),
                version: "3.12".to_string(),
                image: "fnbox-python:latest".to_string(),
                command: "python3".to_string(),
                args: vec!["-u".to_string()],
                file_extension: "py".to_string(),
                memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
                isolation: None,
            },
            Language::JavaScript => Self {
                name: "javascript".to_string(),
                version: "20".to_string(),
                image: "fnbox-javascript:latest".to_string(),
                command: "node".to_string(),
                args: Vec::new(),
                file_extension: "js".to_string(),
                memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
                isolation: None,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LanguagesJson {
    pub languages: Vec<LanguageConfig>,
}

/// Fixed language → runtime map, built once at startup
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    pub fn from_configs(configs: impl IntoIterator<Item = LanguageConfig>) -> Self {
        let configs = configs
            .into_iter()
            .map(|config| (config.name.to_lowercase(), config))
            .collect();
        Self { configs }
    }

    /// Built-in python and javascript runtimes
    pub fn builtin() -> Self {
        Self::from_configs(Language::ALL.into_iter().map(LanguageConfig::builtin))
    }

    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let languages_json: LanguagesJson = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        if languages_json.languages.is_empty() {
            bail!("No languages configured in {}", config_path.display());
        }

        Ok(Self::from_configs(languages_json.languages))
    }

    /// Load from `config_path`, or fall back to the built-in runtimes when the file is absent
    pub fn load_or_builtin(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            Ok(Self::builtin())
        }
    }

    /// Get configuration for a language tag
    pub fn get_config(&self, language: &str) -> Option<&LanguageConfig> {
        self.configs.get(&language.to_lowercase())
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn to_json(&self) -> LanguagesJson {
        let mut languages: Vec<LanguageConfig> = self.configs.values().cloned().collect();
        languages.sort_by(|a, b| a.name.cmp(&b.name));
        LanguagesJson { languages }
    }
}

/// Engine-wide knobs that are not per language
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Directory under which per-execution workspaces are created
    pub workspace_root: PathBuf,
    pub termination_grace: Duration,
    pub default_isolation: Isolation,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            termination_grace: DEFAULT_TERMINATION_GRACE,
            default_isolation: Isolation::Container,
        }
    }
}
