use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{DocumentSource, FailureClass, PatientStatus, PiiKind, Priority};

/// An ingested clinical document. Never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source: DocumentSource,
    pub filename: Option<String>,
}

impl Document {
    pub fn manual(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: DocumentSource::Manual,
            filename: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    pub test_name: String,
    pub value: String,
    pub normal_range: Option<String>,
}

/// Vault tokens for the four PII fields. A token may be a vault token or a
/// record identifier; the gateway tells them apart on the way back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientTokens {
    pub name: Option<String>,
    pub ssn: Option<String>,
    pub dob: Option<String>,
    pub address: Option<String>,
}

impl PatientTokens {
    pub fn get(&self, kind: PiiKind) -> Option<&str> {
        match kind {
            PiiKind::Name => self.name.as_deref(),
            PiiKind::Ssn => self.ssn.as_deref(),
            PiiKind::Dob => self.dob.as_deref(),
            PiiKind::Address => self.address.as_deref(),
        }
    }

    pub fn set(&mut self, kind: PiiKind, token: String) {
        match kind {
            PiiKind::Name => self.name = Some(token),
            PiiKind::Ssn => self.ssn = Some(token),
            PiiKind::Dob => self.dob = Some(token),
            PiiKind::Address => self.address = Some(token),
        }
    }

    pub fn is_empty(&self) -> bool {
        PiiKind::ALL.iter().all(|k| self.get(*k).is_none())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: Uuid,
    pub tokens: PatientTokens,
    pub condition: Option<String>,
    pub department: Option<String>,
    pub priority: Priority,
    pub lab_results: Vec<LabResult>,
    /// Document text with every detected PII value replaced by its label.
    pub redacted_text: Option<String>,
    pub source: DocumentSource,
    pub filename: Option<String>,
    pub ai_summary: Option<String>,
    pub prompt_version: Option<String>,
    pub strategy: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub duration_ms: i64,
    pub status: PatientStatus,
    pub processed: bool,
    pub failure_class: Option<FailureClass>,
    pub failure_hint: Option<String>,
    pub revision: i64,
    pub created_at: NaiveDateTime,
    pub processed_at: Option<NaiveDateTime>,
}

impl PatientRecord {
    /// A fresh `pending` record with no generation metrics.
    pub fn pending(tokens: PatientTokens, source: DocumentSource, filename: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tokens,
            condition: None,
            department: None,
            priority: Priority::Normal,
            lab_results: Vec::new(),
            redacted_text: None,
            source,
            filename,
            ai_summary: None,
            prompt_version: None,
            strategy: None,
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            status: PatientStatus::Pending,
            processed: false,
            failure_class: None,
            failure_hint: None,
            revision: 0,
            created_at: chrono::Local::now().naive_local(),
            processed_at: None,
        }
    }

    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// What a successful generation writes back onto the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub summary: String,
    pub prompt_version: String,
    pub strategy: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub duration_ms: i64,
}
