//! Workspace Packager.
//!
//! Turns a `FunctionSpec` into a single-use directory holding exactly one
//! source file. The language is resolved before anything touches the
//! filesystem, so an unsupported language costs nothing to reject.

use crate::config::{LanguageConfig, LanguageConfigManager};
use crate::error::{EngineError, Result};
use fnbox_common::types::FunctionSpec;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// Prefix of every workspace directory created under the root
pub const WORKSPACE_PREFIX: &str = "fnbox-ws-";

/// Ephemeral, exclusively owned directory for one execution.
///
/// Removed by [`Workspace::release`]; if that never runs (panic, cancelled
/// request) the inner `TempDir` still removes the tree on drop.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    source_file: PathBuf,
    language: LanguageConfig,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    /// Source file name relative to the workspace directory
    pub fn source_file_name(&self) -> String {
        self.language.source_file_name()
    }

    pub fn language(&self) -> &LanguageConfig {
        &self.language
    }

    /// Remove the directory tree, reporting failure instead of swallowing it
    pub fn release(mut self) -> io::Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Packager {
    root: PathBuf,
    languages: Arc<LanguageConfigManager>,
}

impl Packager {
    pub fn new(root: impl Into<PathBuf>, languages: Arc<LanguageConfigManager>) -> Self {
        Self {
            root: root.into(),
            languages,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the language without allocating anything
    pub fn resolve(&self, language: &str) -> Result<&LanguageConfig> {
        self.languages
            .get_config(language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(language.to_string()))
    }

    /// Create a fresh workspace holding `spec.code` verbatim
    pub async fn package(&self, spec: &FunctionSpec) -> Result<Workspace> {
        let language = self.resolve(&spec.language)?.clone();

        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.root)
            .map_err(EngineError::Workspace)?;
        let path = dir.path().to_path_buf();
        let source_file = path.join(language.source_file_name());

        // From here on `dir` owns the tree, so an early return removes it
        tokio::fs::write(&source_file, spec.code.as_bytes())
            .await
            .map_err(EngineError::Workspace)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Container images may run as an unprivileged user
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(EngineError::Workspace)?;
            tokio::fs::set_permissions(&source_file, std::fs::Permissions::from_mode(0o644))
                .await
                .map_err(EngineError::Workspace)?;
        }

        debug!(
            workspace = %path.display(),
            language = %language.name,
            source_size = spec.code.len(),
            "Workspace packaged"
        );

        Ok(Workspace {
            dir: Some(dir),
            path,
            source_file,
            language,
        })
    }
}
