//! Document processing facade.
//!
//! Single entry point for the exposed operations: ingest a document
//! (detect → redact → extract → tokenize → store → dispatch), decrypt a
//! stored patient, submit feedback, report prompt performance, and
//! reprocess. Collaborators are injected so the whole flow runs against
//! `MockVault` and `MockModelClient` in tests.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{ConfigField, Settings};
use crate::db::{get_patient, insert_patient, list_templates, reset_for_reprocess, DatabaseError};
use crate::models::enums::{FailureClass, PatientStatus, PiiKind, SelectionPolicy};
use crate::models::{Document, PatientRecord, PatientTokens, PromptPerformance};
use crate::notify::Notifier;
use crate::pipeline::clinical::{self, ClinicalFields};
use crate::pipeline::detection::{contains_any_value, redact, DetectedEntity, McpDetector, PiiDetector, PiiEntity};
use crate::pipeline::feedback::{record_feedback, FeedbackError, FeedbackInput, UpdatedMetrics};
use crate::pipeline::generation::{
    AnthropicClient, DirectModelStrategy, GenerationOutcome, ModelClient, ModelError, SummaryOrchestrator,
    VaultFunctionStrategy,
};
use crate::pipeline::prompts::{rank_templates, PromptSelector};
use crate::pipeline::queue::{Dispatch, Dispatcher, QueueError, WorkerPool};
use crate::pipeline::vault::{DecryptedPatient, SkyflowClient, TokenizationGateway, VaultError, VaultService};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Why a document was held back for manual review.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ReviewReason {
    MissingPii { missing: Vec<PiiKind> },
    TokenizationFailed { class: FailureClass, hint: String },
}

impl ReviewReason {
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            Self::MissingPii { .. } => None,
            Self::TokenizationFailed { class, .. } => Some(*class),
        }
    }
}

impl std::fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPii { missing } => {
                let kinds: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
                write!(f, "required fields not found: {}", kinds.join(", "))
            }
            Self::TokenizationFailed { class, hint } => write!(f, "tokenization failed ({class}): {hint}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Configuration error: {0}")]
    Configuration(&'static str),

    #[error("Document has no identifiable condition or department")]
    InsufficientData,

    #[error("Document requires review: {0}")]
    ReviewRequired(ReviewReason),

    #[error("Patient not found: {0}")]
    PatientNotFound(Uuid),

    /// A record about to be stored still carries a detected value.
    #[error("Refusing to persist raw {0} value")]
    RawPii(PiiKind),

    #[error("Vault error: {0}")]
    Vault(#[from] VaultError),

    #[error("Model client error: {0}")]
    Model(#[from] ModelError),

    #[error("Feedback error: {0}")]
    Feedback(#[from] FeedbackError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl ProcessingError {
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            Self::Configuration(_) => Some(FailureClass::Configuration),
            Self::ReviewRequired(reason) => reason.class(),
            Self::PatientNotFound(_) => Some(FailureClass::NotFound),
            Self::Vault(e) => Some(e.class()),
            Self::Model(e) => Some(e.class()),
            Self::Feedback(FeedbackError::PatientNotFound(_)) => Some(FailureClass::NotFound),
            Self::Feedback(FeedbackError::InvalidRating(_)) => Some(FailureClass::MalformedRequest),
            Self::Feedback(FeedbackError::Contention { .. }) => Some(FailureClass::Transient),
            _ => None,
        }
    }

    /// Message safe to show a user: classification and masked configuration
    /// hints, never PII or credential values.
    pub fn user_hint(&self) -> String {
        match self {
            Self::Configuration(hint) => (*hint).to_string(),
            Self::Vault(VaultError::Configuration(hint)) => (*hint).to_string(),
            Self::Model(ModelError::Configuration(hint)) => (*hint).to_string(),
            Self::InsufficientData => "no condition or department could be identified".into(),
            Self::ReviewRequired(reason) => reason.to_string(),
            Self::PatientNotFound(_) => "patient not found".into(),
            Self::RawPii(_) => "document could not be stored safely".into(),
            Self::Feedback(FeedbackError::InvalidRating(_)) => "rating must be between 1 and 5".into(),
            Self::Feedback(FeedbackError::PatientNotFound(_)) => "patient not found".into(),
            Self::Database(_) | Self::Feedback(_) | Self::Queue(_) => "storage error".into(),
            Self::Vault(e) => format!("vault request failed ({})", e.class()),
            Self::Model(e) => format!("model request failed ({})", e.class()),
        }
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Success,
    ReviewRequired,
    InsufficientData,
}

/// What happened to summary generation for a stored record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GenerationReport {
    Queued {
        job_id: i64,
    },
    Processed {
        prompt_version: String,
        strategy: String,
        cost_usd: f64,
        duration_ms: i64,
    },
    Failed {
        class: FailureClass,
        hint: String,
    },
}

impl From<Dispatch> for GenerationReport {
    fn from(dispatch: Dispatch) -> Self {
        match dispatch {
            Dispatch::Queued { job_id } => Self::Queued { job_id },
            Dispatch::Completed(GenerationOutcome::Processed(outcome)) => Self::Processed {
                prompt_version: outcome.prompt_version,
                strategy: outcome.strategy,
                cost_usd: outcome.cost_usd,
                duration_ms: outcome.duration_ms,
            },
            Dispatch::Completed(GenerationOutcome::Failed { class, hint }) => Self::Failed { class, hint },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub status: ProcessStatus,
    pub detected_entities: Vec<DetectedEntity>,
    pub patient_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<ReviewReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationReport>,
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

pub struct DocumentProcessor {
    detector: PiiDetector,
    gateway: Arc<TokenizationGateway>,
    dispatcher: Dispatcher,
    required_pii: Vec<PiiKind>,
}

impl DocumentProcessor {
    pub fn new(
        detector: PiiDetector,
        gateway: Arc<TokenizationGateway>,
        dispatcher: Dispatcher,
        required_pii: Vec<PiiKind>,
    ) -> Self {
        Self {
            detector,
            gateway,
            dispatcher,
            required_pii,
        }
    }

    /// Wire the production collaborators. Starts the worker pool when the
    /// queue is enabled; a pool that fails to start degrades to inline
    /// generation.
    pub fn from_settings(settings: &Settings, notifier: Arc<dyn Notifier>) -> Result<Self, ProcessingError> {
        for field in settings.missing_vault_fields() {
            tracing::warn!(hint = Settings::missing_hint(field), "Vault is not fully configured");
        }
        if settings.model.api_key.is_none() {
            tracing::warn!(
                hint = Settings::missing_hint(ConfigField::ModelCredential),
                "Direct model fallback is disabled"
            );
        }

        let vault: Arc<dyn VaultService> = Arc::new(SkyflowClient::new(settings.vault.clone())?);
        let model: Arc<dyn ModelClient> = Arc::new(AnthropicClient::new(settings.model.clone())?);
        let gateway = Arc::new(TokenizationGateway::new(vault.clone()));

        let detector = match McpDetector::from_settings(&settings.vault) {
            Some(external) => PiiDetector::with_external(Box::new(external)),
            None => PiiDetector::local(),
        };

        let orchestrator = Arc::new(SummaryOrchestrator::new(
            vec![
                Arc::new(VaultFunctionStrategy::new(vault)),
                Arc::new(DirectModelStrategy::new(model, gateway.clone())),
            ],
            Arc::new(PromptSelector::new(&settings.selection)),
            notifier,
            settings.selection.default_policy,
            settings.model.model.clone(),
        ));

        let dispatcher = if settings.worker.use_queue {
            match WorkerPool::start(&settings.database_path, orchestrator.clone(), &settings.worker) {
                Ok(pool) => Dispatcher::with_pool(orchestrator, pool),
                Err(e) => {
                    tracing::warn!(error = %e, "Worker pool unavailable, generating inline");
                    Dispatcher::inline(orchestrator)
                }
            }
        } else {
            Dispatcher::inline(orchestrator)
        };

        Ok(Self::new(detector, gateway, dispatcher, settings.required_pii.clone()))
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Ingest one document and hand the stored record to generation.
    pub fn process_document(
        &self,
        conn: &Connection,
        document: &Document,
        policy: Option<SelectionPolicy>,
    ) -> Result<ProcessResult, ProcessingError> {
        let entities = self.detector.detect(&document.text);
        let detected_entities: Vec<DetectedEntity> = entities.iter().map(PiiEntity::describe).collect();
        let redacted = redact(&document.text, &entities);
        let fields = clinical::extract(&redacted);

        let tokens = match self.admit(&entities, &fields) {
            Ok(tokens) => tokens,
            Err(ProcessingError::InsufficientData) => {
                tracing::info!(entities = entities.len(), "Document has insufficient clinical data");
                return Ok(ProcessResult {
                    status: ProcessStatus::InsufficientData,
                    detected_entities,
                    patient_id: None,
                    review: None,
                    generation: None,
                });
            }
            Err(ProcessingError::ReviewRequired(reason)) => {
                let mut record = new_record(document, fields, redacted);
                record.status = PatientStatus::ReviewRequired;
                record.failure_class = reason.class();
                record.failure_hint = Some(reason.to_string());
                ensure_no_raw_pii(&record, &entities)?;
                insert_patient(conn, &record)?;
                tracing::warn!(patient_id = %record.id, reason = %reason, "Document held for review");
                return Ok(ProcessResult {
                    status: ProcessStatus::ReviewRequired,
                    detected_entities,
                    patient_id: Some(record.id),
                    review: Some(reason),
                    generation: None,
                });
            }
            Err(e) => return Err(e),
        };

        let mut record = new_record(document, fields, redacted);
        record.tokens = tokens;
        ensure_no_raw_pii(&record, &entities)?;
        insert_patient(conn, &record)?;
        tracing::info!(patient_id = %record.id, entities = entities.len(), "Patient record stored");

        let dispatch = self.dispatcher.dispatch(conn, &record.id, policy)?;
        Ok(ProcessResult {
            status: ProcessStatus::Success,
            detected_entities,
            patient_id: Some(record.id),
            review: None,
            generation: Some(dispatch.into()),
        })
    }

    /// Gate a document on clinical content and required PII, then tokenize.
    fn admit(&self, entities: &[PiiEntity], fields: &ClinicalFields) -> Result<PatientTokens, ProcessingError> {
        if !fields.is_sufficient() {
            return Err(ProcessingError::InsufficientData);
        }

        let missing: Vec<PiiKind> = self
            .required_pii
            .iter()
            .copied()
            .filter(|kind| !entities.iter().any(|e| e.kind == *kind))
            .collect();
        if !missing.is_empty() {
            return Err(ProcessingError::ReviewRequired(ReviewReason::MissingPii { missing }));
        }

        match self.gateway.tokenize(entities) {
            Ok(tokenized) => Ok(tokenized.tokens),
            Err(e) => {
                let hint = match &e {
                    VaultError::Configuration(hint) => (*hint).to_string(),
                    other => other.to_string(),
                };
                Err(ProcessingError::ReviewRequired(ReviewReason::TokenizationFailed {
                    class: e.class(),
                    hint,
                }))
            }
        }
    }

    /// Resolve a stored patient's tokens. Per-field failures are reported
    /// in the result, even when no field resolves.
    pub fn decrypt(&self, conn: &Connection, patient_id: &Uuid) -> Result<DecryptedPatient, ProcessingError> {
        let record = get_patient(conn, patient_id)?.ok_or(ProcessingError::PatientNotFound(*patient_id))?;
        let decrypted = self.gateway.decrypt(&record.tokens)?;
        if decrypted.resolved_count() == 0 && !record.tokens.is_empty() {
            tracing::warn!(patient_id = %record.id, "No stored field could be resolved");
        }
        tracing::info!(patient_id = %record.id, resolved = decrypted.resolved_count(), "Patient decrypted");
        Ok(decrypted)
    }

    pub fn submit_feedback(&self, conn: &Connection, input: &FeedbackInput) -> Result<UpdatedMetrics, ProcessingError> {
        Ok(record_feedback(conn, input)?)
    }

    pub fn prompt_performance(&self, conn: &Connection) -> Result<Vec<PromptPerformance>, ProcessingError> {
        Ok(rank_templates(list_templates(conn)?))
    }

    /// Send a stored record through generation again.
    pub fn reprocess(
        &self,
        conn: &Connection,
        patient_id: &Uuid,
        policy: Option<SelectionPolicy>,
    ) -> Result<GenerationReport, ProcessingError> {
        let record = get_patient(conn, patient_id)?.ok_or(ProcessingError::PatientNotFound(*patient_id))?;
        if record.status == PatientStatus::ReviewRequired {
            return Err(ProcessingError::ReviewRequired(ReviewReason::MissingPii {
                missing: PiiKind::ALL
                    .iter()
                    .copied()
                    .filter(|kind| record.tokens.get(*kind).is_none())
                    .collect(),
            }));
        }
        reset_for_reprocess(conn, &record.id)?;
        tracing::info!(patient_id = %record.id, "Reprocessing patient");
        Ok(self.dispatcher.dispatch(conn, &record.id, policy)?.into())
    }
}

fn new_record(document: &Document, fields: ClinicalFields, redacted: String) -> PatientRecord {
    let mut record = PatientRecord::pending(PatientTokens::default(), document.source, document.filename.clone());
    record.condition = fields.condition;
    record.department = fields.department;
    record.priority = fields.priority;
    record.lab_results = fields.lab_results;
    record.redacted_text = Some(redacted);
    record
}

/// Fail if any text field of `record` still contains a detected value.
pub fn ensure_no_raw_pii(record: &PatientRecord, entities: &[PiiEntity]) -> Result<(), ProcessingError> {
    let mut fields: Vec<&str> = Vec::new();
    fields.extend(record.redacted_text.as_deref());
    fields.extend(record.condition.as_deref());
    fields.extend(record.department.as_deref());
    fields.extend(record.filename.as_deref());
    for lab in &record.lab_results {
        fields.push(&lab.test_name);
        fields.push(&lab.value);
        fields.extend(lab.normal_range.as_deref());
    }
    fields.extend(PiiKind::ALL.iter().filter_map(|kind| record.tokens.get(*kind)));

    for field in fields {
        if let Some(kind) = contains_any_value(field, entities) {
            tracing::error!(kind = %kind, "Raw PII reached a record field");
            return Err(ProcessingError::RawPii(kind));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SelectionSettings, DEFAULT_MODEL};
    use crate::db::{count_patients_by_status, open_memory_database};
    use crate::models::enums::{DetectionSource, DocumentSource};
    use crate::notify::RecordingNotifier;
    use crate::pipeline::detection::Span;
    use crate::pipeline::generation::MockModelClient;
    use crate::pipeline::prompts::seed_catalog;
    use crate::pipeline::vault::gateway::FieldResult;
    use crate::pipeline::vault::mock::MockFailure;
    use crate::pipeline::vault::MockVault;

    const DOC: &str = "Patient Name: Maria Lopez\n\
        SSN: 123-45-6789\n\
        DOB: 03/15/1980\n\
        Condition: Type 2 diabetes\n\
        Department: Endocrinology\n\
        HbA1c: 8.1% (Normal: 4.0-5.6%)\n\
        Maria Lopez reports improved energy.";

    struct Harness {
        conn: Connection,
        vault: Arc<MockVault>,
        notifier: Arc<RecordingNotifier>,
        processor: DocumentProcessor,
    }

    fn harness(vault: MockVault) -> Harness {
        let conn = open_memory_database().unwrap();
        seed_catalog(&conn).unwrap();
        let vault = Arc::new(vault);
        let notifier = Arc::new(RecordingNotifier::new());
        let gateway = Arc::new(TokenizationGateway::new(vault.clone()));
        let orchestrator = Arc::new(SummaryOrchestrator::new(
            vec![
                Arc::new(VaultFunctionStrategy::new(vault.clone())),
                Arc::new(DirectModelStrategy::new(Arc::new(MockModelClient::new()), gateway.clone())),
            ],
            Arc::new(PromptSelector::new(&SelectionSettings {
                default_policy: SelectionPolicy::BestPerforming,
                min_ratings: 1,
                ab_seed: Some(5),
            })),
            notifier.clone(),
            SelectionPolicy::BestPerforming,
            DEFAULT_MODEL,
        ));
        let processor = DocumentProcessor::new(
            PiiDetector::local(),
            gateway,
            Dispatcher::inline(orchestrator),
            vec![PiiKind::Name],
        );
        Harness {
            conn,
            vault,
            notifier,
            processor,
        }
    }

    #[test]
    fn processes_document_end_to_end() {
        let h = harness(MockVault::new().with_functions());
        let result = h.processor.process_document(&h.conn, &Document::manual(DOC), None).unwrap();

        assert_eq!(result.status, ProcessStatus::Success);
        assert!(result.detected_entities.iter().any(|e| e.kind == PiiKind::Ssn));
        assert!(matches!(result.generation, Some(GenerationReport::Processed { .. })));

        let record = get_patient(&h.conn, &result.patient_id.unwrap()).unwrap().unwrap();
        assert_eq!(record.status, PatientStatus::Processed);
        assert_eq!(record.condition.as_deref(), Some("Type 2 diabetes"));
        assert_eq!(record.department.as_deref(), Some("Endocrinology"));
        assert_eq!(record.lab_results.len(), 1);
        assert!(record.tokens.name.as_deref().is_some_and(|t| t.starts_with("tok_")));
        assert_eq!(h.notifier.names(), vec!["processing_started", "patient_processed"]);
    }

    #[test]
    fn stored_record_contains_no_detected_value() {
        let h = harness(MockVault::new().with_functions());
        let result = h.processor.process_document(&h.conn, &Document::manual(DOC), None).unwrap();
        let record = get_patient(&h.conn, &result.patient_id.unwrap()).unwrap().unwrap();

        let serialized = serde_json::to_string(&record).unwrap();
        for value in h.vault.stored_values() {
            assert!(!serialized.contains(&value), "stored record leaks a detected value");
        }
        let redacted = record.redacted_text.unwrap();
        assert!(redacted.contains("[NAME] reports improved energy."));
        assert!(redacted.contains("[SSN]"));
    }

    #[test]
    fn insufficient_data_creates_no_record() {
        let h = harness(MockVault::new());
        let doc = Document::manual("Patient Name: Maria Lopez\nSSN: 123-45-6789\nVisit went well.");
        let result = h.processor.process_document(&h.conn, &doc, None).unwrap();

        assert_eq!(result.status, ProcessStatus::InsufficientData);
        assert!(result.patient_id.is_none());
        assert!(!result.detected_entities.is_empty());
        assert!(h.vault.calls().is_empty());
        for status in [PatientStatus::Pending, PatientStatus::ReviewRequired, PatientStatus::Processed] {
            assert_eq!(count_patients_by_status(&h.conn, status).unwrap(), 0);
        }
    }

    #[test]
    fn missing_required_name_needs_review() {
        let h = harness(MockVault::new());
        let doc = Document::manual("SSN: 123-45-6789\nCondition: asthma\nDepartment: Pulmonology");
        let result = h.processor.process_document(&h.conn, &doc, None).unwrap();

        assert_eq!(result.status, ProcessStatus::ReviewRequired);
        assert_eq!(
            result.review,
            Some(ReviewReason::MissingPii {
                missing: vec![PiiKind::Name]
            })
        );
        let record = get_patient(&h.conn, &result.patient_id.unwrap()).unwrap().unwrap();
        assert!(record.tokens.is_empty());
        assert!(!record.redacted_text.unwrap().contains("123-45-6789"));
    }

    #[test]
    fn tokenization_failure_stores_nothing_partial() {
        let h = harness(MockVault::new().fail_tokenize(PiiKind::Dob, MockFailure::Transient));
        let result = h.processor.process_document(&h.conn, &Document::manual(DOC), None).unwrap();

        assert_eq!(result.status, ProcessStatus::ReviewRequired);
        assert!(matches!(
            result.review,
            Some(ReviewReason::TokenizationFailed {
                class: FailureClass::Transient,
                ..
            })
        ));
        let record = get_patient(&h.conn, &result.patient_id.unwrap()).unwrap().unwrap();
        assert_eq!(record.status, PatientStatus::ReviewRequired);
        assert!(record.tokens.is_empty());
        assert!(record.ai_summary.is_none());
    }

    #[test]
    fn decrypt_round_trip() {
        let h = harness(MockVault::new().with_functions());
        let result = h.processor.process_document(&h.conn, &Document::manual(DOC), None).unwrap();
        let decrypted = h.processor.decrypt(&h.conn, &result.patient_id.unwrap()).unwrap();

        assert_eq!(decrypted.name.value(), Some("Maria Lopez"));
        assert_eq!(decrypted.ssn.value(), Some("123-45-6789"));
        assert_eq!(decrypted.address, FieldResult::Absent);
    }

    #[test]
    fn two_word_diagnosis_keeps_condition_and_name() {
        let h = harness(MockVault::new().with_functions());
        let doc = Document::manual("Condition: Atrial Fibrillation\nDepartment: Cardiology\nSeen today with John Smith at bedside.");
        let result = h.processor.process_document(&h.conn, &doc, None).unwrap();
        assert_eq!(result.status, ProcessStatus::Success);

        let id = result.patient_id.unwrap();
        let record = get_patient(&h.conn, &id).unwrap().unwrap();
        assert_eq!(record.condition.as_deref(), Some("Atrial Fibrillation"));
        let redacted = record.redacted_text.unwrap();
        assert!(redacted.contains("Condition: Atrial Fibrillation"));
        assert!(redacted.contains("with [NAME] at bedside"));

        let decrypted = h.processor.decrypt(&h.conn, &id).unwrap();
        assert_eq!(decrypted.name.value(), Some("John Smith"));
    }

    #[test]
    fn decrypt_unknown_patient() {
        let h = harness(MockVault::new());
        let id = Uuid::new_v4();
        assert!(matches!(
            h.processor.decrypt(&h.conn, &id),
            Err(ProcessingError::PatientNotFound(missing)) if missing == id
        ));
    }

    #[test]
    fn feedback_and_performance() {
        let h = harness(MockVault::new().with_functions());
        let result = h.processor.process_document(&h.conn, &Document::manual(DOC), None).unwrap();
        let metrics = h
            .processor
            .submit_feedback(
                &h.conn,
                &FeedbackInput {
                    patient_id: result.patient_id.unwrap(),
                    rating: 5,
                    corrections: Some("Add HbA1c trend".into()),
                },
            )
            .unwrap();
        let version = metrics.prompt_version.unwrap();

        let ranked = h.processor.prompt_performance(&h.conn).unwrap();
        assert_eq!(ranked[0].version, version);
        assert_eq!(ranked[0].usage_count, 1);
    }

    #[test]
    fn reprocess_runs_generation_again() {
        let h = harness(MockVault::new().with_functions());
        let result = h.processor.process_document(&h.conn, &Document::manual(DOC), None).unwrap();
        let id = result.patient_id.unwrap();

        let report = h.processor.reprocess(&h.conn, &id, Some(SelectionPolicy::Latest)).unwrap();
        assert!(matches!(report, GenerationReport::Processed { ref prompt_version, .. } if prompt_version == "v4.0"));
        assert!(get_patient(&h.conn, &id).unwrap().unwrap().processed);
    }

    #[test]
    fn reprocess_rejects_review_records() {
        let h = harness(MockVault::new());
        let doc = Document::manual("Condition: asthma\nDepartment: Pulmonology");
        let result = h.processor.process_document(&h.conn, &doc, None).unwrap();
        let err = h.processor.reprocess(&h.conn, &result.patient_id.unwrap(), None).unwrap_err();
        assert!(matches!(err, ProcessingError::ReviewRequired(_)));
    }

    #[test]
    fn leak_guard_rejects_raw_values() {
        let entity = PiiEntity::new(
            PiiKind::Name,
            "Maria Lopez",
            0.9,
            Span { start: 0, end: 11 },
            DetectionSource::Local,
        );
        let mut record = PatientRecord::pending(PatientTokens::default(), DocumentSource::Upload, None);
        record.redacted_text = Some("Maria Lopez has asthma".into());
        assert!(matches!(
            ensure_no_raw_pii(&record, &[entity]),
            Err(ProcessingError::RawPii(PiiKind::Name))
        ));
    }

    #[test]
    fn user_hints_are_masked() {
        let err = ProcessingError::Vault(VaultError::Configuration(Settings::missing_hint(
            ConfigField::VaultCredential,
        )));
        assert_eq!(err.user_hint(), "vault credential missing");
        assert_eq!(err.class(), Some(FailureClass::Configuration));
        assert_eq!(
            ProcessingError::Vault(VaultError::Server { status: 502 }).user_hint(),
            "vault request failed (transient)"
        );
    }
}
