use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use uuid::Uuid;

use super::{FunctionRequest, FunctionResponse, VaultError, VaultService};
use crate::models::enums::PiiKind;

/// Failure a `MockVault` can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Configuration,
    Authentication,
    NotFound,
    Transient,
    Unavailable,
}

impl MockFailure {
    fn to_error(self) -> VaultError {
        match self {
            Self::Configuration => VaultError::Configuration("vault credential missing"),
            Self::Authentication => VaultError::Authentication { status: 401 },
            Self::NotFound => VaultError::NotFound,
            Self::Transient => VaultError::Server { status: 503 },
            Self::Unavailable => VaultError::FunctionUnavailable,
        }
    }
}

/// Calls observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultCall {
    Tokenize(PiiKind),
    Detokenize(String),
    Lookup(String),
    Function,
}

#[derive(Default)]
struct MockState {
    /// token or record id → (kind, value)
    entries: HashMap<String, (PiiKind, String)>,
    calls: Vec<VaultCall>,
    next_token: u64,
    tokenize_failures: HashMap<PiiKind, MockFailure>,
    detokenize_failure: Option<MockFailure>,
    lookup_failure: Option<MockFailure>,
    function_script: VecDeque<Result<FunctionResponse, MockFailure>>,
}

/// In-memory vault for tests.
pub struct MockVault {
    state: Mutex<MockState>,
    issue_record_ids: bool,
    functions: bool,
}

impl Default for MockVault {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVault {
    /// Issues `tok_N` tokens; no vault function configured.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            issue_record_ids: false,
            functions: false,
        }
    }

    /// Tokenize returns UUID-shaped record identifiers instead of tokens.
    pub fn issuing_record_ids(mut self) -> Self {
        self.issue_record_ids = true;
        self
    }

    pub fn with_functions(mut self) -> Self {
        self.functions = true;
        self
    }

    pub fn fail_tokenize(self, kind: PiiKind, failure: MockFailure) -> Self {
        self.lock().tokenize_failures.insert(kind, failure);
        self
    }

    pub fn fail_detokenize(self, failure: MockFailure) -> Self {
        self.lock().detokenize_failure = Some(failure);
        self
    }

    pub fn fail_lookup(self, failure: MockFailure) -> Self {
        self.lock().lookup_failure = Some(failure);
        self
    }

    /// Queue the outcome of the next function invocation. An empty queue
    /// answers with a fixed successful summary.
    pub fn script_function(self, outcome: Result<FunctionResponse, MockFailure>) -> Self {
        self.lock().function_script.push_back(outcome);
        self
    }

    /// Store a value under an explicit token or record id.
    pub fn insert(&self, key: &str, kind: PiiKind, value: &str) {
        self.lock().entries.insert(key.to_string(), (kind, value.to_string()));
    }

    pub fn calls(&self) -> Vec<VaultCall> {
        self.lock().calls.clone()
    }

    pub fn stored_values(&self) -> Vec<String> {
        self.lock().entries.values().map(|(_, v)| v.clone()).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl VaultService for MockVault {
    fn tokenize(&self, value: &str, kind: PiiKind) -> Result<String, VaultError> {
        let mut state = self.lock();
        state.calls.push(VaultCall::Tokenize(kind));
        if let Some(failure) = state.tokenize_failures.get(&kind) {
            return Err(failure.to_error());
        }
        let token = if self.issue_record_ids {
            Uuid::new_v4().to_string()
        } else {
            state.next_token += 1;
            format!("tok_{:06}", state.next_token)
        };
        state.entries.insert(token.clone(), (kind, value.to_string()));
        Ok(token)
    }

    fn detokenize(&self, token: &str) -> Result<String, VaultError> {
        let mut state = self.lock();
        state.calls.push(VaultCall::Detokenize(token.to_string()));
        if let Some(failure) = state.detokenize_failure {
            return Err(failure.to_error());
        }
        state
            .entries
            .get(token)
            .map(|(_, v)| v.clone())
            .ok_or(VaultError::NotFound)
    }

    fn lookup_record(&self, record_id: &str, kind: PiiKind) -> Result<String, VaultError> {
        let mut state = self.lock();
        state.calls.push(VaultCall::Lookup(record_id.to_string()));
        if let Some(failure) = state.lookup_failure {
            return Err(failure.to_error());
        }
        match state.entries.get(record_id) {
            Some((stored_kind, value)) if *stored_kind == kind => Ok(value.clone()),
            _ => Err(VaultError::NotFound),
        }
    }

    fn invoke_function(&self, _request: &FunctionRequest) -> Result<FunctionResponse, VaultError> {
        let mut state = self.lock();
        state.calls.push(VaultCall::Function);
        if !self.functions {
            return Err(VaultError::FunctionUnavailable);
        }
        match state.function_script.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(failure)) => Err(failure.to_error()),
            None => Ok(FunctionResponse {
                summary: "Vault-confined summary.".into(),
                input_tokens: 300,
                output_tokens: 120,
            }),
        }
    }

    fn supports_functions(&self) -> bool {
        self.functions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_then_detokenize() {
        let vault = MockVault::new();
        let token = vault.tokenize("Maria Lopez", PiiKind::Name).unwrap();
        assert!(token.starts_with("tok_"));
        assert_eq!(vault.detokenize(&token).unwrap(), "Maria Lopez");
        assert!(matches!(vault.detokenize("tok_missing"), Err(VaultError::NotFound)));
    }

    #[test]
    fn record_ids_resolve_by_lookup() {
        let vault = MockVault::new().issuing_record_ids();
        let id = vault.tokenize("123-45-6789", PiiKind::Ssn).unwrap();
        assert!(super::super::is_record_identifier(&id));
        assert_eq!(vault.lookup_record(&id, PiiKind::Ssn).unwrap(), "123-45-6789");
        assert!(matches!(vault.lookup_record(&id, PiiKind::Name), Err(VaultError::NotFound)));
    }

    #[test]
    fn scripted_function_outcomes_in_order() {
        let vault = MockVault::new()
            .with_functions()
            .script_function(Err(MockFailure::Transient));
        let request = FunctionRequest {
            prompt_template: String::new(),
            patient_data: super::super::FunctionPatientData {
                name_token: String::new(),
                ssn_token: String::new(),
                dob_token: String::new(),
                condition: String::new(),
                department: String::new(),
                lab_results: String::new(),
            },
            parameters: super::super::FunctionParameters {
                model: String::new(),
                temperature: 0.0,
                max_tokens: 1,
            },
        };
        assert!(vault.invoke_function(&request).is_err());
        assert!(vault.invoke_function(&request).is_ok());
        assert_eq!(vault.calls(), vec![VaultCall::Function, VaultCall::Function]);
    }
}
