pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod notify;
pub mod pipeline;

#[cfg(test)]
mod privacy_audit;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use crate::api::{api_router, serve_until_interrupted, ApiContext, ServerError};
use crate::config::{ConfigError, Settings};
use crate::db::{open_database, DatabaseError};
use crate::notify::BroadcastNotifier;
use crate::pipeline::processor::{DocumentProcessor, ProcessingError};
use crate::pipeline::prompts::seed_catalog;

/// Buffered notifications per subscriber before the oldest are dropped.
const NOTIFICATION_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Processor setup failed: {0}")]
    Processor(#[from] ProcessingError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Start the service and block until Ctrl-C.
///
/// Collaborator clients are blocking, so the processor is built before the
/// async runtime starts.
pub fn run() -> Result<(), StartupError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let settings = Settings::from_env()?;
    {
        let conn = open_database(&settings.database_path)?;
        let seeded = seed_catalog(&conn)?;
        tracing::info!(
            path = %settings.database_path.display(),
            seeded,
            "Database ready"
        );
    }

    let notifier = Arc::new(BroadcastNotifier::new(NOTIFICATION_CAPACITY));
    let mut notifications = notifier.subscribe();
    let processor = Arc::new(DocumentProcessor::from_settings(&settings, notifier)?);
    let ctx = ApiContext::new(processor.clone(), &settings);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => tracing::debug!(event = notification.name(), "Notification"),
                    Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Notification log lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });
        serve_until_interrupted(settings.bind_addr, api_router(ctx)).await
    })?;

    // Last handle: dropping it stops and joins the worker pool.
    drop(processor);
    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}
