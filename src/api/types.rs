//! Shared state and request types for the HTTP layer.

use std::path::PathBuf;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::config::{EvolutionThresholds, InsightSettings, Settings, TrendWindows};
use crate::db::open_database;
use crate::models::enums::{DocumentSource, SelectionPolicy};
use crate::pipeline::processor::DocumentProcessor;

// ═══════════════════════════════════════════════════════════
// API context
// ═══════════════════════════════════════════════════════════

/// Shared context for all routes. Handlers open their own connection per
/// request; no record state is cached here.
#[derive(Clone)]
pub struct ApiContext {
    pub processor: Arc<DocumentProcessor>,
    pub database_path: Arc<PathBuf>,
    pub trend: TrendWindows,
    pub evolution: EvolutionThresholds,
    pub insights: InsightSettings,
    pub feedback_stats_days: i64,
}

impl ApiContext {
    pub fn new(processor: Arc<DocumentProcessor>, settings: &Settings) -> Self {
        Self {
            processor,
            database_path: Arc::new(settings.database_path.clone()),
            trend: settings.trend,
            evolution: settings.evolution,
            insights: settings.insights,
            feedback_stats_days: settings.feedback_stats_days,
        }
    }

    /// Run blocking store and collaborator work off the async runtime.
    pub async fn blocking<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&ApiContext, &Connection) -> Result<T, ApiError> + Send + 'static,
    {
        let ctx = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_database(&ctx.database_path)?;
            work(&ctx, &conn)
        })
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))?
    }
}

// ═══════════════════════════════════════════════════════════
// Request bodies
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct ProcessDocumentRequest {
    pub text: String,
    #[serde(default = "default_source")]
    pub source: DocumentSource,
    pub filename: Option<String>,
    pub policy: Option<SelectionPolicy>,
}

fn default_source() -> DocumentSource {
    DocumentSource::Manual
}

#[derive(Debug, Default, Deserialize)]
pub struct ReprocessRequest {
    pub policy: Option<SelectionPolicy>,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub patient_id: Uuid,
    pub rating: u8,
    pub corrections: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub days: Option<i64>,
}

/// Path ids arrive as strings so a malformed id maps to our 400 body.
pub fn parse_patient_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest("patient id must be a UUID".into()))
}
