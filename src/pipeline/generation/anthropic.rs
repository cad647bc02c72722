use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::{Completion, GenerationParams, ModelClient, ModelError};
use crate::config::{ConfigField, ModelSettings, Settings};

const API_VERSION: &str = "2023-06-01";

/// Blocking client for the Anthropic messages API.
pub struct AnthropicClient {
    settings: ModelSettings,
    client: reqwest::blocking::Client,
}

impl AnthropicClient {
    pub fn new(settings: ModelSettings) -> Result<Self, ModelError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ModelError::Connection(e.to_string()))?;
        Ok(Self { settings, client })
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

fn completion_from_response(response: MessagesResponse) -> Result<Completion, ModelError> {
    let text = response
        .content
        .into_iter()
        .find_map(|block| block.text)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ModelError::MalformedResponse("no text content".into()))?;
    Ok(Completion {
        text,
        input_tokens: response.usage.input_tokens,
        output_tokens: response.usage.output_tokens,
    })
}

impl ModelClient for AnthropicClient {
    fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<Completion, ModelError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(ModelError::Configuration(Settings::missing_hint(ConfigField::ModelCredential)))?;

        let url = format!("{}/v1/messages", self.settings.base_url);
        let body = MessagesRequest {
            model: &params.model,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(self.settings.timeout)
                } else if e.is_connect() {
                    ModelError::Connection("connection refused".into())
                } else {
                    ModelError::Connection(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::from_status(status.as_u16()));
        }

        let parsed: MessagesResponse = response
            .json()
            .map_err(|e| ModelError::MalformedResponse(e.without_url().to_string()))?;
        completion_from_response(parsed)
    }

    fn is_configured(&self) -> bool {
        self.settings.api_key.is_some()
    }
}

/// Failure a `MockModelClient` can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockModelFailure {
    Authentication,
    RateLimited,
    BadRequest,
}

impl MockModelFailure {
    fn to_error(self) -> ModelError {
        match self {
            Self::Authentication => ModelError::Authentication { status: 401 },
            Self::RateLimited => ModelError::RateLimited,
            Self::BadRequest => ModelError::BadRequest { status: 400 },
        }
    }
}

/// Mock model client for testing. Answers from a script, then with a fixed
/// completion once the script runs dry.
pub struct MockModelClient {
    script: Mutex<VecDeque<Result<Completion, MockModelFailure>>>,
    prompts: Mutex<Vec<(String, GenerationParams)>>,
    configured: bool,
}

impl Default for MockModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModelClient {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            configured: true,
        }
    }

    /// Behaves like a client with no API key.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    pub fn script(self, outcome: Result<Completion, MockModelFailure>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(outcome);
        }
        self
    }

    /// Prompts and parameters received so far.
    pub fn requests(&self) -> Vec<(String, GenerationParams)> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl ModelClient for MockModelClient {
    fn complete(&self, prompt: &str, params: &GenerationParams) -> Result<Completion, ModelError> {
        if !self.configured {
            return Err(ModelError::Configuration(Settings::missing_hint(ConfigField::ModelCredential)));
        }
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((prompt.to_string(), params.clone()));
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Ok(completion)) => Ok(completion),
            Some(Err(failure)) => Err(failure.to_error()),
            None => Ok(Completion {
                text: "Direct model summary.".into(),
                input_tokens: 250,
                output_tokens: 90,
            }),
        }
    }

    fn is_configured(&self) -> bool {
        self.configured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> GenerationParams {
        GenerationParams {
            model: "claude-3-5-sonnet-20241022".into(),
            temperature: 0.7,
            max_tokens: 500,
        }
    }

    #[test]
    fn parses_messages_response() {
        let body = json!({
            "content": [{"type": "text", "text": "Stable diabetic patient."}],
            "usage": {"input_tokens": 412, "output_tokens": 88}
        });
        let parsed: MessagesResponse = serde_json::from_value(body).unwrap();
        let completion = completion_from_response(parsed).unwrap();
        assert_eq!(completion.text, "Stable diabetic patient.");
        assert_eq!(completion.input_tokens, 412);
        assert_eq!(completion.output_tokens, 88);
    }

    #[test]
    fn empty_content_is_malformed() {
        let parsed: MessagesResponse = serde_json::from_value(json!({"content": []})).unwrap();
        assert!(matches!(
            completion_from_response(parsed),
            Err(ModelError::MalformedResponse(_))
        ));
    }

    #[test]
    fn request_body_shape() {
        let p = params();
        let body = MessagesRequest {
            model: &p.model,
            max_tokens: p.max_tokens,
            temperature: p.temperature,
            messages: vec![Message { role: "user", content: "hi" }],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["max_tokens"], 500);
    }

    #[test]
    fn missing_key_is_configuration_error() {
        let client = AnthropicClient::new(Settings::default().model).unwrap();
        assert!(!client.is_configured());
        let err = client.complete("hi", &params()).unwrap_err();
        assert!(matches!(err, ModelError::Configuration("model credential missing")));
    }

    #[test]
    fn mock_follows_script_then_default() {
        let mock = MockModelClient::new().script(Err(MockModelFailure::RateLimited));
        assert!(matches!(mock.complete("a", &params()), Err(ModelError::RateLimited)));
        assert_eq!(mock.complete("b", &params()).unwrap().input_tokens, 250);
        assert_eq!(mock.requests().len(), 2);
    }
}
