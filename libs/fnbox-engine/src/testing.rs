//! Helpers shared by the unit tests: a POSIX `sh` language that runs on the
//! host process runner, so lifecycle tests need neither Docker nor an
//! interpreter beyond `/bin/sh`.

use crate::config::{LanguageConfig, LanguageConfigManager};
use crate::runner::{ProcessRunner, Runner, RunnerHandle};
use crate::workspace::{Packager, Workspace};
use fnbox_common::types::{FunctionSpec, Isolation};
use std::path::Path;
use std::sync::Arc;

pub fn shell_language() -> LanguageConfig {
    LanguageConfig {
        name: "shell".to_string(),
        version: "posix".to_string(),
        image: "busybox:latest".to_string(),
        command: "sh".to_string(),
        args: Vec::new(),
        file_extension: "sh".to_string(),
        memory_limit_mb: 64,
        isolation: Some(Isolation::Process),
    }
}

pub fn shell_languages() -> Arc<LanguageConfigManager> {
    Arc::new(LanguageConfigManager::from_configs([shell_language()]))
}

pub fn shell_packager(root: &Path) -> Packager {
    Packager::new(root, shell_languages())
}

pub async fn launch_shell(root: &Path, code: &str) -> (Workspace, RunnerHandle) {
    let workspace = shell_packager(root)
        .package(&FunctionSpec::new("shell", code, 5))
        .await
        .unwrap();
    let handle = ProcessRunner::new().launch(&workspace).await.unwrap();
    (workspace, handle)
}

/// Entries currently under a workspace root
pub fn entries(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}

/// Polls `/proc` until `pid` is gone or a zombie, for up to two seconds
pub async fn process_exits(pid: u32) -> bool {
    for _ in 0..40 {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Err(_) => return true,
            // State is the first field after the parenthesised command name
            Ok(stat) => {
                let state = stat.rsplit(')').next().and_then(|rest| rest.split_whitespace().next());
                if state == Some("Z") {
                    return true;
                }
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}
