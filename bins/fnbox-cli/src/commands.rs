// CLI commands for managing fnbox
use anyhow::{bail, Context, Result};
use bollard::Docker;
use fnbox_common::types::{ExecutionResult, FunctionSpec, Isolation};
use fnbox_engine::{EngineSettings, Executor, LanguageConfigManager};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::generator::TemplateGenerator;

const LANGUAGES_PATH: &str = "config/languages.json";

fn dockerfile_path(base: &Path, name: &str) -> PathBuf {
    base.join("dockerfiles").join(name).join("Dockerfile")
}

/// Initialize a new fnbox project
pub fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing fnbox project at: {}", path);

    let project_path = Path::new(path);
    fs::create_dir_all(project_path.join("config"))
        .with_context(|| format!("Failed to create {}/config", path))?;

    // Start from the built-in runtimes unless a config is already there
    let languages_json_path = project_path.join(LANGUAGES_PATH);
    let languages = if languages_json_path.exists() {
        println!("  ⏭️  Keeping existing {}", LANGUAGES_PATH);
        LanguageConfigManager::load(&languages_json_path)?
    } else {
        let languages = LanguageConfigManager::builtin();
        let json_content = serde_json::to_string_pretty(&languages.to_json())
            .context("Failed to serialize languages.json")?;
        fs::write(&languages_json_path, json_content)
            .context("Failed to write languages.json")?;
        println!("  ✅ Created: {}", LANGUAGES_PATH);
        languages
    };

    let generator = TemplateGenerator::new()?;
    for name in languages.list_languages() {
        let Some(language) = languages.get_config(&name) else {
            continue;
        };
        let dockerfile = dockerfile_path(project_path, &name);
        if dockerfile.exists() {
            println!("  ⏭️  Keeping existing dockerfiles/{}/Dockerfile", name);
            continue;
        }
        if let Some(parent) = dockerfile.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dockerfile, generator.generate_dockerfile(language)?)
            .with_context(|| format!("Failed to write {}", dockerfile.display()))?;
        println!("  ✅ Created: dockerfiles/{}/Dockerfile", name);
    }

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Build runtime images: fnbox-cli build-image --name python");
    println!("  2. Start the API: REDIS_URL=redis://127.0.0.1:6379 fnbox-api");

    Ok(())
}

/// Build Docker image for a language
pub fn build_docker_image(name: &str, no_cache: bool) -> Result<()> {
    println!("🐳 Building Docker image for: {}", name);

    let languages = LanguageConfigManager::load_or_builtin(Path::new(LANGUAGES_PATH))?;
    let language = languages
        .get_config(name)
        .ok_or_else(|| anyhow::anyhow!("Language '{}' not found in config", name))?;

    let dockerfile = dockerfile_path(Path::new("."), &language.name);
    if !dockerfile.exists() {
        bail!(
            "Dockerfile not found at {}. Generate it first with the init command.",
            dockerfile.display()
        );
    }

    let mut docker_args = vec![
        "build".to_string(),
        "-t".to_string(),
        language.image.clone(),
        "-f".to_string(),
        dockerfile.to_string_lossy().to_string(),
    ];
    if no_cache {
        docker_args.push("--no-cache".to_string());
    }
    // The language's own directory is the build context
    docker_args.push(
        dockerfile
            .parent()
            .map(|dir| dir.to_string_lossy().to_string())
            .unwrap_or_else(|| ".".to_string()),
    );

    println!("\n🔨 Running: docker {}", docker_args.join(" "));

    let status = Command::new("docker")
        .args(&docker_args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("Failed to execute docker build. Is Docker installed and running?")?;

    if !status.success() {
        bail!("Docker build failed with exit code: {:?}", status.code());
    }

    println!("\n✅ Docker image {} built successfully!", language.image);
    Ok(())
}

/// Run one snippet through the engine
pub async fn run_function(
    languages_path: &Path,
    language: &str,
    file: &Path,
    timeout: u32,
    isolation: Option<Isolation>,
) -> Result<ExecutionResult> {
    let code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let languages = LanguageConfigManager::load_or_builtin(languages_path)?;

    let mut settings = EngineSettings::default();
    if let Some(isolation) = isolation {
        settings.default_isolation = isolation;
    }

    let needs_docker = match languages.get_config(language) {
        Some(config) => config.isolation.unwrap_or(settings.default_isolation) == Isolation::Container,
        None => false,
    };
    let docker = if needs_docker {
        Some(Docker::connect_with_local_defaults().context("Failed to connect to Docker")?)
    } else {
        None
    };

    let executor = Executor::new(languages, settings, docker);
    Ok(executor
        .execute(&FunctionSpec::new(language, code, timeout))
        .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnbox_common::types::ExecutionStatus;

    const SHELL_LANGUAGES: &str = r#"{
        "languages": [
            {
                "name": "shell",
                "image": "busybox:latest",
                "command": "sh",
                "file_extension": "sh",
                "isolation": "process"
            }
        ]
    }"#;

    #[test]
    fn test_init_writes_config_and_dockerfiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();

        init_project(path).unwrap();

        let languages = LanguageConfigManager::load(&dir.path().join(LANGUAGES_PATH)).unwrap();
        assert_eq!(languages.list_languages(), vec!["javascript", "python"]);

        let python = fs::read_to_string(dockerfile_path(dir.path(), "python")).unwrap();
        assert!(python.starts_with("# GENERATED BY fnbox-cli"));
        assert!(dockerfile_path(dir.path(), "javascript").exists());
    }

    #[test]
    fn test_init_keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        init_project(path).unwrap();

        let dockerfile = dockerfile_path(dir.path(), "python");
        fs::write(&dockerfile, "FROM custom").unwrap();
        init_project(path).unwrap();

        assert_eq!(fs::read_to_string(&dockerfile).unwrap(), "FROM custom");
    }

    #[tokio::test]
    async fn test_run_function_on_host() {
        let dir = tempfile::tempdir().unwrap();
        let languages = dir.path().join("languages.json");
        fs::write(&languages, SHELL_LANGUAGES).unwrap();
        let file = dir.path().join("hello.sh");
        fs::write(&file, "echo hello").unwrap();

        let result = run_function(&languages, "shell", &file, 5, None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.output, "hello\n");
    }

    #[tokio::test]
    async fn test_run_function_unknown_language() {
        let dir = tempfile::tempdir().unwrap();
        let languages = dir.path().join("languages.json");
        fs::write(&languages, SHELL_LANGUAGES).unwrap();
        let file = dir.path().join("hello.rb");
        fs::write(&file, "puts 1").unwrap();

        let result = run_function(&languages, "ruby", &file, 5, None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::UnsupportedLanguage);
    }

    #[tokio::test]
    async fn test_run_function_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_function(
            &dir.path().join("languages.json"),
            "python",
            &dir.path().join("absent.py"),
            5,
            Some(Isolation::Process),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("absent.py"));
    }
}
