mod error;
mod handlers;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use bollard::Docker;
use fnbox_common::config::{ServiceConfig, StoreBackend};
use fnbox_common::redis::RedisFunctionStore;
use fnbox_common::store::{FunctionStore, MemoryFunctionStore};
use fnbox_common::types::Isolation;
use fnbox_engine::{EngineSettings, Executor, LanguageConfigManager};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub struct AppState {
    pub store: Arc<dyn FunctionStore>,
    pub executor: Arc<Executor>,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env().context("Invalid service configuration")?;
    init_tracing(config.log_json);

    info!("fnbox API booting...");

    let store: Arc<dyn FunctionStore> = match config.store {
        StoreBackend::Redis => {
            let store = RedisFunctionStore::connect(&config.redis_url)
                .await
                .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))?;
            info!("Connected to Redis: {}", config.redis_url);
            Arc::new(store)
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; functions are lost on restart");
            Arc::new(MemoryFunctionStore::new())
        }
    };

    let languages = LanguageConfigManager::load_or_builtin(&config.languages_path)?;
    info!(languages = ?languages.list_languages(), "Languages loaded");

    let mut settings = EngineSettings {
        default_isolation: config.isolation,
        ..Default::default()
    };
    if let Some(root) = config.workspace_root {
        tokio::fs::create_dir_all(&root)
            .await
            .with_context(|| format!("Failed to create workspace root {}", root.display()))?;
        settings.workspace_root = root;
    }

    // Docker is only needed when something runs in a container
    let wants_container = config.isolation == Isolation::Container
        || languages
            .list_languages()
            .iter()
            .filter_map(|name| languages.get_config(name))
            .any(|language| language.isolation == Some(Isolation::Container));
    let docker = if wants_container {
        let docker = Docker::connect_with_local_defaults().context("Failed to connect to Docker")?;
        match docker.ping().await {
            Ok(_) => info!("Connected to Docker"),
            Err(e) => warn!(error = %e, "Docker is not reachable yet"),
        }
        Some(docker)
    } else {
        info!("Process isolation only; Docker not configured");
        None
    };

    let executor = Executor::new(languages, settings, docker);
    let state = Arc::new(AppState {
        store,
        executor: Arc::new(executor),
    });

    let app = routes::router(state);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
