use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ModelParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

/// A versioned prompt with its running statistics.
///
/// `avg_rating`, `avg_cost` and `usage_count` are a fold over the feedback
/// records tagged with `version`; `revision` guards concurrent updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub version: String,
    pub description: String,
    pub template: String,
    pub parameters: ModelParameters,
    pub avg_rating: f64,
    pub avg_cost: f64,
    pub usage_count: i64,
    pub active: bool,
    pub ab_eligible: bool,
    pub last_used: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub revision: i64,
}

impl PromptTemplate {
    pub fn is_rated(&self) -> bool {
        self.usage_count > 0
    }

    /// Version string as a numeric tuple, `"v3.10"` → `[3, 10]`.
    pub fn version_key(&self) -> Vec<u64> {
        version_key(&self.version)
    }
}

pub fn version_key(version: &str) -> Vec<u64> {
    version
        .trim_start_matches(['v', 'V'])
        .split('.')
        .map(|part| part.parse::<u64>().unwrap_or(0))
        .collect()
}

/// Ranked, read-only view of a template for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptPerformance {
    pub rank: usize,
    pub version: String,
    pub description: String,
    pub avg_rating: f64,
    pub avg_cost: f64,
    pub usage_count: i64,
    pub active: bool,
    pub ab_eligible: bool,
    pub last_used: Option<NaiveDateTime>,
}
