//! Summary generation: model access, prompt rendering, the ordered
//! strategy list and the orchestrator that walks it.

pub mod anthropic;
pub mod orchestrator;
pub mod pricing;
pub mod state;
pub mod strategy;
pub mod template;

pub use anthropic::{AnthropicClient, MockModelClient};
pub use orchestrator::*;
pub use state::{transition, AttemptState, Event};
pub use strategy::*;
pub use template::{render, TemplateError};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::enums::FailureClass;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model not configured: {0}")]
    Configuration(&'static str),

    #[error("Model rejected credentials (status {status})")]
    Authentication { status: u16 },

    #[error("Model rate limited the request")]
    RateLimited,

    #[error("Model rejected the request (status {status})")]
    BadRequest { status: u16 },

    #[error("Model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model unreachable: {0}")]
    Connection(String),

    #[error("Model returned error (status {status})")]
    Server { status: u16 },

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}

impl ModelError {
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Configuration(_) => FailureClass::Configuration,
            Self::Authentication { .. } => FailureClass::Authentication,
            Self::BadRequest { .. } | Self::MalformedResponse(_) => FailureClass::MalformedRequest,
            Self::RateLimited | Self::Timeout(_) | Self::Connection(_) | Self::Server { .. } => {
                FailureClass::Transient
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication { status },
            429 => Self::RateLimited,
            400..=499 => Self::BadRequest { status },
            _ => Self::Server { status },
        }
    }
}

/// Parameters of a single completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Narrow contract to the generative model service. Blocking, bounded by
/// the implementation's timeout.
pub trait ModelClient: Send + Sync {
    fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<Completion, ModelError>;

    /// Whether a credential is configured. Unconfigured clients fail every call.
    fn is_configured(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ModelError::from_status(401).class(), FailureClass::Authentication);
        assert_eq!(ModelError::from_status(400).class(), FailureClass::MalformedRequest);
        assert!(ModelError::from_status(429).is_retryable());
        assert!(ModelError::from_status(529).is_retryable());
        assert!(!ModelError::Configuration("model credential missing").is_retryable());
    }
}
