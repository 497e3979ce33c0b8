// Flametree telemetry server - main.rs
// Bootstraps the logging core, wires the middleware and retention scheduler,
// and serves the observability endpoints.

use std::sync::Arc;

use serde_json::json;

use flametree_telemetry::{
    app_state::AppState, config::TelemetryConfig, retention::LogRetentionScheduler,
    server::build_router, StructuredLogger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TelemetryConfig::from_env();
    std::fs::create_dir_all(&config.log_dir)?;

    let state = AppState::new(config.clone());
    let logger = state.logger.clone();

    logger.info(
        "Telemetry core initialized",
        Some(json!({
            "module": "Bootstrap",
            "level": config.log_level.as_str(),
            "logDir": config.log_dir.display().to_string(),
            "retentionDays": config.retention_days,
            "consoleEnabled": config.console_enabled,
            "production": config.production,
        })),
    );

    install_panic_hook(logger.clone());

    // The retention sweep only runs against the production file sink.
    if config.production {
        LogRetentionScheduler::new(
            logger.clone(),
            config.data_dir.clone(),
            config.retention_days,
        )
        .spawn();
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;

    logger.info(
        "Server listening",
        Some(json!({
            "module": "Bootstrap",
            "addr": config.listen_addr,
        })),
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(logger.clone()))
        .await?;

    logger.info("Process shut down", Some(json!({"module": "Process"})));
    Ok(())
}

/// Narrate panics at FATAL, then give the sinks a moment to flush before the
/// default hook takes the process down.
fn install_panic_hook(logger: Arc<StructuredLogger>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        logger.fatal(
            "Uncaught panic",
            Some(json!({
                "module": "Process",
                "error": info.to_string(),
            })),
        );
        std::thread::sleep(std::time::Duration::from_secs(1));
        default_hook(info);
    }));
}

async fn shutdown_signal(logger: Arc<StructuredLogger>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        logger.info(
            "Shutdown signal received",
            Some(json!({"module": "Process", "signal": "SIGINT"})),
        );
    }
}
