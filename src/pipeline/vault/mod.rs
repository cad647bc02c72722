//! Vault access: exchanging PII for tokens and back.
//!
//! `VaultService` is the narrow contract to the vault; `SkyflowClient` is the
//! HTTP implementation and `MockVault` the in-memory one used by tests.
//! `TokenizationGateway` layers the all-or-nothing tokenize and the
//! recovering detokenize on top.

pub mod client;
pub mod gateway;
pub mod identifier;
pub mod mock;

pub use client::SkyflowClient;
pub use gateway::*;
pub use identifier::is_record_identifier;
pub use mock::MockVault;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::enums::{FailureClass, PiiKind};

#[derive(Error, Debug)]
pub enum VaultError {
    /// Carries a masked hint, never the configured value.
    #[error("Vault not configured: {0}")]
    Configuration(&'static str),

    #[error("Vault rejected credentials (status {status})")]
    Authentication { status: u16 },

    #[error("Vault record or token not found")]
    NotFound,

    #[error("Vault function unavailable")]
    FunctionUnavailable,

    #[error("Vault function reported failure: {0}")]
    FunctionFailed(String),

    #[error("Vault request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Vault unreachable: {0}")]
    Connection(String),

    #[error("Vault rate limited the request")]
    RateLimited,

    #[error("Vault rejected the request (status {status})")]
    BadRequest { status: u16 },

    #[error("Vault returned error (status {status})")]
    Server { status: u16 },

    #[error("Malformed vault response: {0}")]
    MalformedResponse(String),
}

impl VaultError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Configuration(_) => FailureClass::Configuration,
            Self::Authentication { .. } => FailureClass::Authentication,
            Self::NotFound => FailureClass::NotFound,
            Self::FunctionUnavailable => FailureClass::Unsupported,
            Self::BadRequest { .. } | Self::MalformedResponse(_) => FailureClass::MalformedRequest,
            Self::FunctionFailed(_)
            | Self::Timeout(_)
            | Self::Connection(_)
            | Self::RateLimited
            | Self::Server { .. } => FailureClass::Transient,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    /// Map a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication { status },
            404 => Self::NotFound,
            429 => Self::RateLimited,
            400..=499 => Self::BadRequest { status },
            _ => Self::Server { status },
        }
    }
}

/// Patient fields forwarded to a vault function. Tokens only; the function
/// resolves them inside the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionPatientData {
    pub name_token: String,
    pub ssn_token: String,
    pub dob_token: String,
    pub condition: String,
    pub department: String,
    pub lab_results: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionParameters {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionRequest {
    pub prompt_template: String,
    pub patient_data: FunctionPatientData,
    pub parameters: FunctionParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub summary: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Narrow contract to the PII vault. Implementations are blocking and must
/// bound every call with a timeout.
pub trait VaultService: Send + Sync {
    /// Store `value` and return the opaque token bound to it.
    fn tokenize(&self, value: &str, kind: PiiKind) -> Result<String, VaultError>;

    /// Exchange a vault token for its value.
    fn detokenize(&self, token: &str) -> Result<String, VaultError>;

    /// Read the `kind` column of a record by its identifier.
    fn lookup_record(&self, record_id: &str, kind: PiiKind) -> Result<String, VaultError>;

    /// Run the configured vault function on tokenized data.
    fn invoke_function(&self, request: &FunctionRequest) -> Result<FunctionResponse, VaultError>;

    /// Whether vault-confined generation is configured at all.
    fn supports_functions(&self) -> bool;
}
