//! Drives one stored patient record through prompt selection and the
//! strategy chain, then persists the outcome.

use std::sync::Arc;
use std::time::Instant;

use rusqlite::Connection;
use uuid::Uuid;

use super::pricing;
use super::state::{transition, AttemptState, Event};
use super::strategy::{GenerationInput, GenerationStrategy, StrategyError, StrategyOutput};
use super::template::validate;
use super::GenerationParams;
use crate::config::{ConfigField, Settings};
use crate::db::{record_failure, record_summary, require_patient, DatabaseError};
use crate::models::enums::{FailureClass, Priority, SelectionPolicy};
use crate::models::{PatientRecord, PromptTemplate, SummaryOutcome};
use crate::notify::{Notification, Notifier};
use crate::pipeline::prompts::{PromptError, PromptSelector};

/// Temperature used for urgent records regardless of the template.
pub const URGENT_TEMPERATURE: f32 = 0.3;

/// Terminal result of one orchestration. Both variants are already persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    Processed(SummaryOutcome),
    Failed { class: FailureClass, hint: String },
}

/// Template parameters adjusted for the record.
pub fn adapt_parameters(template: &PromptTemplate, priority: Priority, model: &str) -> GenerationParams {
    let temperature = match priority {
        Priority::Urgent => URGENT_TEMPERATURE,
        Priority::Normal => template.parameters.temperature,
    };
    GenerationParams {
        model: model.to_string(),
        temperature,
        max_tokens: template.parameters.max_tokens,
    }
}

pub struct SummaryOrchestrator {
    /// Tried in order: index 0 is the primary, index 1 the fallback.
    strategies: Vec<Arc<dyn GenerationStrategy>>,
    selector: Arc<PromptSelector>,
    notifier: Arc<dyn Notifier>,
    default_policy: SelectionPolicy,
    model: String,
}

impl SummaryOrchestrator {
    pub fn new(
        strategies: Vec<Arc<dyn GenerationStrategy>>,
        selector: Arc<PromptSelector>,
        notifier: Arc<dyn Notifier>,
        default_policy: SelectionPolicy,
        model: impl Into<String>,
    ) -> Self {
        Self {
            strategies,
            selector,
            notifier,
            default_policy,
            model: model.into(),
        }
    }

    /// Generate a summary for a stored record. Only store errors are
    /// returned as `Err`; every generation failure ends as a persisted
    /// `failed` record and `GenerationOutcome::Failed`.
    pub fn generate(
        &self,
        conn: &Connection,
        patient_id: &Uuid,
        policy: Option<SelectionPolicy>,
    ) -> Result<GenerationOutcome, DatabaseError> {
        let record = require_patient(conn, patient_id)?;
        let span = tracing::info_span!("process_patient", patient_id = %record.id);
        let _guard = span.enter();

        let started = Instant::now();
        self.notifier.emit(Notification::ProcessingStarted { patient_id: record.id });

        let policy = policy.unwrap_or(self.default_policy);
        let template = match self.usable_template(conn, policy) {
            Ok(template) => template,
            Err(PromptError::Database(e)) => return Err(e),
            Err(e @ PromptError::NoCandidates { .. }) => {
                tracing::warn!(policy = %policy, "No usable prompt template");
                return self.fail(conn, &record, FailureClass::Configuration, e.to_string());
            }
        };

        let params = adapt_parameters(&template, record.priority, &self.model);
        let input = GenerationInput {
            record: &record,
            template: &template,
            params: &params,
        };

        let available: Vec<bool> = (0..2)
            .map(|i| self.strategies.get(i).is_some_and(|s| s.probe()))
            .collect();
        let mut state = transition(
            AttemptState::SelectedPrompt,
            Event::Probed {
                primary: available[0],
                fallback: available[1],
            },
        );

        let mut last_error: Option<StrategyError> = None;
        let mut produced: Option<(&'static str, StrategyOutput)> = None;

        while !state.is_terminal() {
            let index = match state {
                AttemptState::PrimaryAttempt => 0,
                AttemptState::FallbackAttempt => 1,
                _ => break,
            };
            let strategy = self.strategies.get(index).filter(|_| available[index]);
            let event = match strategy {
                Some(strategy) => match attempt(strategy.as_ref(), &input) {
                    Ok(output) => {
                        produced = Some((strategy.name(), output));
                        Event::Succeeded
                    }
                    Err(e) => {
                        tracing::warn!(strategy = strategy.name(), class = %e.class(), "Generation strategy failed");
                        last_error = Some(e);
                        Event::Exhausted
                    }
                },
                None => Event::Exhausted,
            };
            state = transition(state, event);
        }

        match (state, produced) {
            (AttemptState::Success, Some((strategy, output))) => {
                let outcome = SummaryOutcome {
                    cost_usd: pricing::cost_usd(&output.model, output.input_tokens, output.output_tokens),
                    summary: output.summary,
                    prompt_version: template.version.clone(),
                    strategy: strategy.to_string(),
                    input_tokens: output.input_tokens,
                    output_tokens: output.output_tokens,
                    duration_ms: started.elapsed().as_millis() as i64,
                };
                record_summary(conn, &record.id, &outcome)?;
                tracing::info!(
                    version = %outcome.prompt_version,
                    strategy = %outcome.strategy,
                    input_tokens = outcome.input_tokens,
                    output_tokens = outcome.output_tokens,
                    duration_ms = outcome.duration_ms,
                    "Summary generated"
                );
                self.notifier.emit(Notification::PatientProcessed {
                    patient_id: record.id,
                    prompt_version: outcome.prompt_version.clone(),
                    strategy: outcome.strategy.clone(),
                    cost_usd: outcome.cost_usd,
                    duration_ms: outcome.duration_ms,
                });
                Ok(GenerationOutcome::Processed(outcome))
            }
            _ => {
                let (class, hint) = match last_error {
                    Some(e) => (e.class(), e.hint()),
                    None => (
                        FailureClass::Configuration,
                        Settings::missing_hint(ConfigField::ModelCredential).to_string(),
                    ),
                };
                self.fail(conn, &record, class, hint)
            }
        }
    }

    /// Select a template whose placeholders all resolve, reselecting past
    /// structurally broken ones.
    fn usable_template(&self, conn: &Connection, policy: SelectionPolicy) -> Result<PromptTemplate, PromptError> {
        let mut excluded: Vec<String> = Vec::new();
        loop {
            let template = self.selector.select_excluding(conn, policy, &excluded)?;
            match validate(&template.template) {
                Ok(()) => {
                    if !excluded.is_empty() {
                        tracing::info!(version = %template.version, skipped = excluded.len(), "Reselected prompt template");
                    }
                    return Ok(template);
                }
                Err(e) => {
                    tracing::warn!(version = %template.version, error = %e, "Prompt template is malformed");
                    excluded.push(template.version);
                }
            }
        }
    }

    fn fail(
        &self,
        conn: &Connection,
        record: &PatientRecord,
        class: FailureClass,
        hint: String,
    ) -> Result<GenerationOutcome, DatabaseError> {
        record_failure(conn, &record.id, class, &hint)?;
        tracing::warn!(class = %class, "Summary generation failed");
        self.notifier.emit(Notification::PatientFailed {
            patient_id: record.id,
            class,
        });
        Ok(GenerationOutcome::Failed { class, hint })
    }
}

/// One strategy with its retry budget. Only retryable failures are retried.
fn attempt(strategy: &dyn GenerationStrategy, input: &GenerationInput<'_>) -> Result<StrategyOutput, StrategyError> {
    let mut retries_left = strategy.retry_budget();
    loop {
        match strategy.invoke(input) {
            Ok(output) => return Ok(output),
            Err(e) if e.is_retryable() && retries_left > 0 => {
                retries_left -= 1;
                tracing::debug!(strategy = strategy.name(), class = %e.class(), "Retrying generation strategy");
            }
            Err(e) => return Err(e),
        }
    }
}
