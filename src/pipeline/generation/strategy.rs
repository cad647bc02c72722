//! Generation strategies, tried in order by the orchestrator.
//!
//! Each strategy has a capability probe, a retry budget and a uniform
//! invoke contract. The vault function runs the model next to the PII; the
//! direct model call is the fallback and only ever sees redacted text or a
//! single detokenized name.

use std::sync::Arc;

use thiserror::Error;
use zeroize::Zeroizing;

use super::template::{render, PromptContext, TemplateError};
use super::{GenerationParams, ModelClient, ModelError};
use crate::models::enums::{FailureClass, PiiKind};
use crate::models::{PatientRecord, PromptTemplate};
use crate::pipeline::clinical::format_lab_results;
use crate::pipeline::vault::{
    FunctionParameters, FunctionPatientData, FunctionRequest, TokenizationGateway, VaultError, VaultService,
};

pub const UNKNOWN_CONDITION: &str = "Unknown";
pub const GENERAL_DEPARTMENT: &str = "General";
const UNNAMED_PATIENT: &str = "the patient";

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Prompt template is malformed: {0}")]
    Template(#[from] TemplateError),
}

impl StrategyError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Vault(e) => e.class(),
            Self::Model(e) => e.class(),
            Self::Template(_) => FailureClass::MalformedRequest,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Vault(e) => e.is_retryable(),
            Self::Model(e) => e.is_retryable(),
            Self::Template(_) => false,
        }
    }

    /// Message safe to persist and show. Response bodies are never echoed.
    pub fn hint(&self) -> String {
        match self {
            Self::Vault(VaultError::Configuration(hint)) | Self::Model(ModelError::Configuration(hint)) => {
                (*hint).to_string()
            }
            Self::Vault(VaultError::MalformedResponse(_)) => "vault returned an unreadable response".into(),
            Self::Model(ModelError::MalformedResponse(_)) => "model returned an unreadable response".into(),
            other => other.to_string(),
        }
    }
}

/// Everything a strategy needs for one attempt.
pub struct GenerationInput<'a> {
    pub record: &'a PatientRecord,
    pub template: &'a PromptTemplate,
    /// Parameters after per-record adjustment (priority, model).
    pub params: &'a GenerationParams,
}

impl GenerationInput<'_> {
    fn condition(&self) -> &str {
        self.record.condition.as_deref().unwrap_or(UNKNOWN_CONDITION)
    }

    fn department(&self) -> &str {
        self.record.department.as_deref().unwrap_or(GENERAL_DEPARTMENT)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyOutput {
    pub summary: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// Model the tokens were billed against.
    pub model: String,
}

pub trait GenerationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy can run at all with the current configuration.
    fn probe(&self) -> bool;

    /// Extra attempts allowed after a retryable failure.
    fn retry_budget(&self) -> u32;

    fn invoke(&self, input: &GenerationInput<'_>) -> Result<StrategyOutput, StrategyError>;
}

// ═══════════════════════════════════════════════════════════
// Vault-confined generation
// ═══════════════════════════════════════════════════════════

pub struct VaultFunctionStrategy {
    vault: Arc<dyn VaultService>,
}

impl VaultFunctionStrategy {
    pub fn new(vault: Arc<dyn VaultService>) -> Self {
        Self { vault }
    }
}

impl GenerationStrategy for VaultFunctionStrategy {
    fn name(&self) -> &'static str {
        "vault_function"
    }

    fn probe(&self) -> bool {
        self.vault.supports_functions()
    }

    fn retry_budget(&self) -> u32 {
        1
    }

    fn invoke(&self, input: &GenerationInput<'_>) -> Result<StrategyOutput, StrategyError> {
        let tokens = &input.record.tokens;
        let token = |kind: PiiKind| tokens.get(kind).unwrap_or_default().to_string();

        let request = FunctionRequest {
            prompt_template: input.template.template.clone(),
            patient_data: FunctionPatientData {
                name_token: token(PiiKind::Name),
                ssn_token: token(PiiKind::Ssn),
                dob_token: token(PiiKind::Dob),
                condition: input.condition().to_string(),
                department: input.department().to_string(),
                lab_results: format_lab_results(&input.record.lab_results),
            },
            parameters: FunctionParameters {
                model: input.params.model.clone(),
                temperature: input.params.temperature,
                max_tokens: input.params.max_tokens,
            },
        };

        let response = self.vault.invoke_function(&request)?;
        Ok(StrategyOutput {
            summary: response.summary,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            model: input.params.model.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Direct model call
// ═══════════════════════════════════════════════════════════

pub struct DirectModelStrategy {
    model: Arc<dyn ModelClient>,
    gateway: Arc<TokenizationGateway>,
}

impl DirectModelStrategy {
    pub fn new(model: Arc<dyn ModelClient>, gateway: Arc<TokenizationGateway>) -> Self {
        Self { model, gateway }
    }

    /// Prompt built from the redacted document text captured at ingestion.
    fn document_prompt(redacted_text: &str) -> String {
        format!(
            "You are an expert medical AI assistant. Analyze the following patient medical document \
             and provide a professional clinical summary.\n\n\
             MEDICAL DOCUMENT:\n{redacted_text}\n\n\
             ANALYSIS REQUIREMENTS:\n\
             1. Assess the patient's current condition and severity\n\
             2. Identify key clinical findings, lab results, and vital signs\n\
             3. Note any critical values or concerning trends\n\
             4. Recommend specific, evidence-based next steps or interventions\n\
             5. Maintain a professional, objective clinical tone\n\n\
             Format: Provide a concise clinical summary (3-5 sentences) focusing on the most \
             important findings and recommendations."
        )
    }

    /// Template prompt with only the name detokenized.
    fn template_prompt(&self, input: &GenerationInput<'_>) -> Result<Zeroizing<String>, StrategyError> {
        let name = match input.record.tokens.get(PiiKind::Name) {
            Some(token) => match self.gateway.detokenize(token, PiiKind::Name) {
                Ok(name) => name,
                Err(VaultError::Configuration(hint)) => return Err(VaultError::Configuration(hint).into()),
                Err(e) => {
                    tracing::warn!(patient_id = %input.record.id, class = %e.class(), "Name unavailable for fallback prompt");
                    Zeroizing::new(UNNAMED_PATIENT.to_string())
                }
            },
            None => Zeroizing::new(UNNAMED_PATIENT.to_string()),
        };
        let labs = format_lab_results(&input.record.lab_results);
        let context = PromptContext {
            name: name.as_str(),
            condition: input.condition(),
            department: input.department(),
            lab_results: &labs,
        };
        Ok(Zeroizing::new(render(&input.template.template, &context)?))
    }
}

impl GenerationStrategy for DirectModelStrategy {
    fn name(&self) -> &'static str {
        "direct_model"
    }

    fn probe(&self) -> bool {
        self.model.is_configured()
    }

    fn retry_budget(&self) -> u32 {
        0
    }

    fn invoke(&self, input: &GenerationInput<'_>) -> Result<StrategyOutput, StrategyError> {
        let prompt = match input.record.redacted_text.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(text) => Zeroizing::new(Self::document_prompt(text)),
            None => self.template_prompt(input)?,
        };
        let completion = self.model.complete(&prompt, input.params)?;
        Ok(StrategyOutput {
            summary: completion.text,
            input_tokens: completion.input_tokens,
            output_tokens: completion.output_tokens,
            model: input.params.model.clone(),
        })
    }
}
