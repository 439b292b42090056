//! MailCatch - Capture server entry point

use anyhow::Result;
use mailcatch_api::{create_router, AppState, MailReader};
use mailcatch_common::config::{Config, LoggingConfig};
use mailcatch_core::{CaptureService, ConnectionPolicy, SmtpServer, MAIL_ROOT_LABEL};
use mailcatch_storage::create_storage;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting MailCatch server...");

    if config.smtp.domains.is_empty() {
        info!("No capture domains configured; every recipient will be refused");
    }

    // Initialize file storage
    let storage = Arc::new(create_storage(&config.storage)?);

    let capture = Arc::new(CaptureService::new(
        ConnectionPolicy::from_config(&config.smtp),
        storage.clone(),
    ));
    let index = capture.index();

    // Start SMTP server
    let smtp_server = SmtpServer::new(&config, capture);
    let listener = smtp_server.bind().await?;
    let smtp_handle = tokio::spawn(async move {
        if let Err(e) = smtp_server.serve(listener).await {
            error!("SMTP server error: {}", e);
        }
    });

    // Start API server if configured
    let api_handle = match config.api.enabled() {
        Some((port, secret)) => {
            let reader = MailReader::new(storage, index, MAIL_ROOT_LABEL);
            let app = create_router(AppState::new(reader, secret));
            let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.api.host, port)).await?;
            info!("Starting API server on {}", listener.local_addr()?);

            Some(tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, app).await {
                    error!("API server error: {}", e);
                }
            }))
        }
        None => {
            info!("Read API disabled (needs api.port and an api.secret of adequate length)");
            None
        }
    };

    info!("MailCatch server started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    smtp_handle.abort();
    if let Some(handle) = api_handle {
        handle.abort();
    }

    info!("MailCatch server shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
