use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use classbook::auth::{Directory, StaticDirectory};
use classbook::config::Config;
use classbook::engine::Engine;
use classbook::http::{create_router, AppState};
use classbook::notify::{LogNotifier, NotificationDispatcher};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    classbook::observability::init(config.metrics_port);

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let directory = match &config.users_file {
        Some(path) => {
            let dir = StaticDirectory::load(path)?;
            info!("loaded {} users from {}", dir.len(), path.display());
            dir
        }
        None => {
            warn!("CLASSBOOK_USERS_FILE not set, every request will be unauthenticated");
            StaticDirectory::new()
        }
    };
    let directory: Arc<dyn Directory> = Arc::new(directory);

    let engine = Arc::new(Engine::new(config.wal_path(), directory.clone(), config.policy())?);
    tokio::spawn(classbook::compactor::run_compactor(
        engine.clone(),
        config.compact_threshold,
    ));

    let (notifications, _dispatcher) = NotificationDispatcher::start(Arc::new(LogNotifier));
    let app = create_router(AppState::new(engine, directory, notifications));

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("classbook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  locale: {:?}", config.locale);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("classbook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining requests");
}
