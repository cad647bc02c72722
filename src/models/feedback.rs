use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::QualityBand;

/// Append-only reviewer rating. `prompt_version` and `cost_usd` are
/// snapshots of the patient record at feedback time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub rating: u8,
    pub corrections: Option<String>,
    pub quality: QualityBand,
    pub prompt_version: Option<String>,
    pub cost_usd: f64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStatistics {
    pub version: String,
    pub avg_rating: f64,
    pub avg_cost: f64,
    pub usage_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub id: Uuid,
    pub date: NaiveDate,
    pub total_processed: i64,
    pub avg_accuracy: Option<f64>,
    pub avg_cost: f64,
    pub avg_duration_ms: f64,
    pub dominant_prompt_version: Option<String>,
    pub created_at: NaiveDateTime,
}
