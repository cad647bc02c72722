use std::sync::Arc;

use serde::Serialize;
use zeroize::{Zeroize, Zeroizing};

use super::{is_record_identifier, VaultError, VaultService};
use crate::models::enums::{FailureClass, PiiKind};
use crate::models::PatientTokens;
use crate::pipeline::detection::{PiiEntity, Span};

/// Token issued for one detected entity.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenAssignment {
    pub kind: PiiKind,
    pub span: Span,
    pub token: String,
}

/// Result of tokenizing every entity of a document.
#[derive(Debug, Clone, Default)]
pub struct TokenizedEntities {
    pub assignments: Vec<TokenAssignment>,
    /// Patient fields: the token of the most confident entity of each kind.
    pub tokens: PatientTokens,
}

/// Outcome of resolving one patient field.
#[derive(Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldResult {
    Resolved { value: String },
    Undetokenizable { class: FailureClass },
    Absent,
}

impl FieldResult {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Resolved { value } => Some(value),
            _ => None,
        }
    }
}

impl std::fmt::Debug for FieldResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved { .. } => f.write_str("Resolved(<redacted>)"),
            Self::Undetokenizable { class } => write!(f, "Undetokenizable({class})"),
            Self::Absent => f.write_str("Absent"),
        }
    }
}

impl Drop for FieldResult {
    fn drop(&mut self) {
        if let Self::Resolved { value } = self {
            value.zeroize();
        }
    }
}

/// Resolved PII for one patient. Lives for a single response.
#[derive(Debug, Clone, Serialize)]
pub struct DecryptedPatient {
    pub name: FieldResult,
    pub ssn: FieldResult,
    pub dob: FieldResult,
    pub address: FieldResult,
}

impl DecryptedPatient {
    fn fields(&self) -> [&FieldResult; 4] {
        [&self.name, &self.ssn, &self.dob, &self.address]
    }

    pub fn resolved_count(&self) -> usize {
        self.fields().iter().filter(|f| f.is_resolved()).count()
    }
}

/// Exchanges PII for vault tokens and back.
#[derive(Clone)]
pub struct TokenizationGateway {
    vault: Arc<dyn VaultService>,
}

impl TokenizationGateway {
    pub fn new(vault: Arc<dyn VaultService>) -> Self {
        Self { vault }
    }

    /// Tokenize every entity. All-or-nothing: the first vault error aborts
    /// and no partial token set is returned. Repeated values of the same
    /// kind share one token.
    pub fn tokenize(&self, entities: &[PiiEntity]) -> Result<TokenizedEntities, VaultError> {
        let mut result = TokenizedEntities::default();
        let mut best: [Option<f32>; 4] = [None; 4];

        for (i, entity) in entities.iter().enumerate() {
            let reused = entities[..i]
                .iter()
                .zip(&result.assignments)
                .find(|(earlier, _)| earlier.kind == entity.kind && earlier.value == entity.value)
                .map(|(_, assignment)| assignment.token.clone());

            let token = match reused {
                Some(token) => token,
                None => self.vault.tokenize(&entity.value, entity.kind).map_err(|e| {
                    tracing::warn!(kind = %entity.kind, error = %e, "Tokenization failed, aborting document");
                    e
                })?,
            };

            let slot = PiiKind::ALL.iter().position(|k| *k == entity.kind).unwrap_or(0);
            if best[slot].map_or(true, |c| entity.confidence > c) {
                best[slot] = Some(entity.confidence);
                result.tokens.set(entity.kind, token.clone());
            }
            result.assignments.push(TokenAssignment {
                kind: entity.kind,
                span: entity.span,
                token,
            });
        }

        tracing::debug!(count = result.assignments.len(), "Entities tokenized");
        Ok(result)
    }

    /// Resolve one stored token. Record identifiers go to record lookup
    /// first; vault tokens go to the token exchange first. A "not found"
    /// from the primary method is retried once via the other.
    pub fn detokenize(&self, token: &str, kind: PiiKind) -> Result<Zeroizing<String>, VaultError> {
        let by_record = is_record_identifier(token);
        let primary = if by_record {
            self.vault.lookup_record(token, kind)
        } else {
            self.vault.detokenize(token)
        };

        match primary {
            Ok(value) => Ok(Zeroizing::new(value)),
            Err(VaultError::NotFound) => {
                tracing::debug!(kind = %kind, by_record, "Primary resolution missed, trying alternate");
                let alternate = if by_record {
                    self.vault.detokenize(token)
                } else {
                    self.vault.lookup_record(token, kind)
                };
                alternate.map(Zeroizing::new)
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve every stored field. Per-field failures become
    /// `Undetokenizable` and are left for the caller to report; only a
    /// configuration error aborts the request.
    pub fn decrypt(&self, tokens: &PatientTokens) -> Result<DecryptedPatient, VaultError> {
        let resolve = |kind: PiiKind| -> Result<FieldResult, VaultError> {
            let Some(token) = tokens.get(kind) else {
                return Ok(FieldResult::Absent);
            };
            match self.detokenize(token, kind) {
                Ok(value) => Ok(FieldResult::Resolved {
                    value: value.as_str().to_string(),
                }),
                Err(e @ VaultError::Configuration(_)) => Err(e),
                Err(e) => {
                    tracing::warn!(kind = %kind, class = %e.class(), "Field could not be detokenized");
                    Ok(FieldResult::Undetokenizable { class: e.class() })
                }
            }
        };

        Ok(DecryptedPatient {
            name: resolve(PiiKind::Name)?,
            ssn: resolve(PiiKind::Ssn)?,
            dob: resolve(PiiKind::Dob)?,
            address: resolve(PiiKind::Address)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::DetectionSource;
    use crate::pipeline::vault::mock::{MockFailure, MockVault, VaultCall};

    const RECORD_ID: &str = "4df78a15-27ae-43b4-ad17-4260e6d579a9";

    fn entity(kind: PiiKind, value: &str, confidence: f32, start: usize) -> PiiEntity {
        PiiEntity::new(
            kind,
            value,
            confidence,
            Span { start, end: start + value.len() },
            DetectionSource::Local,
        )
    }

    fn gateway(vault: MockVault) -> (TokenizationGateway, Arc<MockVault>) {
        let vault = Arc::new(vault);
        (TokenizationGateway::new(vault.clone()), vault)
    }

    #[test]
    fn tokenizes_all_entities() {
        let (gw, _) = gateway(MockVault::new());
        let entities = vec![
            entity(PiiKind::Name, "Maria Lopez", 0.9, 0),
            entity(PiiKind::Ssn, "123-45-6789", 0.98, 20),
        ];
        let result = gw.tokenize(&entities).unwrap();
        assert_eq!(result.assignments.len(), 2);
        assert!(result.tokens.name.is_some());
        assert!(result.tokens.ssn.is_some());
        assert!(result.tokens.dob.is_none());
    }

    #[test]
    fn repeated_values_share_a_token() {
        let (gw, vault) = gateway(MockVault::new());
        let entities = vec![
            entity(PiiKind::Name, "Maria Lopez", 0.9, 0),
            entity(PiiKind::Name, "Maria Lopez", 0.85, 40),
        ];
        let result = gw.tokenize(&entities).unwrap();
        assert_eq!(result.assignments[0].token, result.assignments[1].token);
        assert_eq!(vault.calls().len(), 1);
    }

    #[test]
    fn patient_field_uses_most_confident_entity() {
        let (gw, vault) = gateway(MockVault::new());
        let entities = vec![
            entity(PiiKind::Dob, "2024-01-10", 0.6, 0),
            entity(PiiKind::Dob, "03/15/1980", 0.92, 20),
        ];
        let result = gw.tokenize(&entities).unwrap();
        let dob = gw.detokenize(result.tokens.dob.as_deref().unwrap(), PiiKind::Dob).unwrap();
        assert_eq!(dob.as_str(), "03/15/1980");
        assert_eq!(vault.stored_values().len(), 2);
    }

    #[test]
    fn equally_confident_names_keep_the_earliest() {
        let (gw, _) = gateway(MockVault::new());
        let entities = vec![
            entity(PiiKind::Name, "John Smith", 0.85, 10),
            entity(PiiKind::Name, "Mary Jones", 0.85, 40),
        ];
        let result = gw.tokenize(&entities).unwrap();
        let name = gw.detokenize(result.tokens.name.as_deref().unwrap(), PiiKind::Name).unwrap();
        assert_eq!(name.as_str(), "John Smith");
    }

    #[test]
    fn tokenization_is_all_or_nothing() {
        let (gw, _) = gateway(MockVault::new().fail_tokenize(PiiKind::Ssn, MockFailure::Authentication));
        let entities = vec![
            entity(PiiKind::Name, "Maria Lopez", 0.9, 0),
            entity(PiiKind::Ssn, "123-45-6789", 0.98, 20),
        ];
        let err = gw.tokenize(&entities).unwrap_err();
        assert_eq!(err.class(), FailureClass::Authentication);
    }

    #[test]
    fn record_identifier_resolves_by_lookup_first() {
        let (gw, vault) = gateway(MockVault::new());
        vault.insert(RECORD_ID, PiiKind::Ssn, "123-45-6789");

        let value = gw.detokenize(RECORD_ID, PiiKind::Ssn).unwrap();
        assert_eq!(value.as_str(), "123-45-6789");
        assert_eq!(vault.calls(), vec![VaultCall::Lookup(RECORD_ID.into())]);
    }

    #[test]
    fn token_not_found_retries_once_via_lookup() {
        let (gw, vault) = gateway(MockVault::new().fail_detokenize(MockFailure::NotFound));
        vault.insert("tok_legacy", PiiKind::Name, "Maria Lopez");

        let value = gw.detokenize("tok_legacy", PiiKind::Name).unwrap();
        assert_eq!(value.as_str(), "Maria Lopez");
        assert_eq!(
            vault.calls(),
            vec![VaultCall::Detokenize("tok_legacy".into()), VaultCall::Lookup("tok_legacy".into())]
        );
    }

    #[test]
    fn non_not_found_errors_are_not_retried() {
        let (gw, vault) = gateway(MockVault::new().fail_detokenize(MockFailure::Authentication));
        let err = gw.detokenize("tok_1", PiiKind::Name).unwrap_err();
        assert_eq!(err.class(), FailureClass::Authentication);
        assert_eq!(vault.calls().len(), 1);
    }

    #[test]
    fn decrypt_reports_fields_individually() {
        let (gw, vault) = gateway(MockVault::new());
        vault.insert("tok_name", PiiKind::Name, "Maria Lopez");
        let tokens = PatientTokens {
            name: Some("tok_name".into()),
            ssn: Some("tok_gone".into()),
            dob: None,
            address: None,
        };
        let decrypted = gw.decrypt(&tokens).unwrap();
        assert_eq!(decrypted.name.value(), Some("Maria Lopez"));
        assert_eq!(decrypted.ssn, FieldResult::Undetokenizable { class: FailureClass::NotFound });
        assert_eq!(decrypted.dob, FieldResult::Absent);
    }

    #[test]
    fn decrypt_reports_every_field_when_nothing_resolves() {
        let (gw, _) = gateway(MockVault::new());
        let tokens = PatientTokens {
            name: Some("tok_gone".into()),
            ssn: Some("tok_also_gone".into()),
            ..Default::default()
        };
        let decrypted = gw.decrypt(&tokens).unwrap();
        assert_eq!(decrypted.resolved_count(), 0);
        assert_eq!(decrypted.name, FieldResult::Undetokenizable { class: FailureClass::NotFound });
        assert_eq!(decrypted.ssn, FieldResult::Undetokenizable { class: FailureClass::NotFound });
        assert_eq!(decrypted.address, FieldResult::Absent);
    }

    #[test]
    fn decrypt_configuration_error_is_fatal() {
        let (gw, _) = gateway(MockVault::new().fail_detokenize(MockFailure::Configuration));
        let tokens = PatientTokens {
            name: Some("tok_1".into()),
            ..Default::default()
        };
        assert!(matches!(gw.decrypt(&tokens), Err(VaultError::Configuration(_))));
    }

    #[test]
    fn field_debug_is_redacted() {
        let field = FieldResult::Resolved { value: "Maria Lopez".into() };
        assert!(!format!("{field:?}").contains("Maria"));
    }
}
