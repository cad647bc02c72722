use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

use super::{FunctionRequest, FunctionResponse, VaultError, VaultService};
use crate::config::{ConfigField, Settings, VaultSettings};
use crate::models::enums::PiiKind;

/// Vault table column holding each PII kind.
fn column_for(kind: PiiKind) -> &'static str {
    match kind {
        PiiKind::Name => "name",
        PiiKind::Ssn => "ssn",
        PiiKind::Dob => "date_of_birth",
        PiiKind::Address => "address",
    }
}

/// `MM/DD/YYYY` dates are stored as `YYYY-MM-DD`; anything else passes through.
pub fn normalize_dob(value: &str) -> String {
    NaiveDate::parse_from_str(value.trim(), "%m/%d/%Y")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|_| value.trim().to_string())
}

/// Blocking HTTP client for a Skyflow-style data vault.
pub struct SkyflowClient {
    settings: VaultSettings,
    client: reqwest::blocking::Client,
    function_client: reqwest::blocking::Client,
}

impl SkyflowClient {
    pub fn new(settings: VaultSettings) -> Result<Self, VaultError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| VaultError::Connection(e.to_string()))?;
        let function_client = reqwest::blocking::Client::builder()
            .timeout(settings.function_timeout)
            .build()
            .map_err(|e| VaultError::Connection(e.to_string()))?;
        Ok(Self {
            settings,
            client,
            function_client,
        })
    }

    /// Resolved `(vault_url, vault_id, bearer_token)` or the first missing field.
    fn credentials(&self) -> Result<(&str, &str, &str), VaultError> {
        let url = self
            .settings
            .vault_url
            .as_deref()
            .ok_or(VaultError::Configuration(Settings::missing_hint(ConfigField::VaultUrl)))?;
        let id = self
            .settings
            .vault_id
            .as_deref()
            .ok_or(VaultError::Configuration(Settings::missing_hint(ConfigField::VaultId)))?;
        let token = self
            .settings
            .bearer_token
            .as_deref()
            .ok_or(VaultError::Configuration(Settings::missing_hint(ConfigField::VaultCredential)))?;
        Ok((url, id, token))
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder, timeout: Duration) -> Result<Value, VaultError> {
        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                VaultError::Timeout(timeout)
            } else if e.is_connect() {
                VaultError::Connection("connection refused".into())
            } else {
                VaultError::Connection(e.without_url().to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VaultError::from_status(status.as_u16()));
        }

        response
            .json::<Value>()
            .map_err(|e| VaultError::MalformedResponse(e.without_url().to_string()))
    }

    fn post_function(&self, url: &str, bearer: &str, body: &impl Serialize) -> Result<Value, VaultError> {
        let request = self.function_client.post(url).bearer_auth(bearer).json(body);
        self.send(request, self.settings.function_timeout)
    }
}

#[derive(Serialize)]
struct InsertRequest {
    records: Vec<InsertRecord>,
    tokenization: bool,
}

#[derive(Serialize)]
struct InsertRecord {
    fields: serde_json::Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DetokenizeRequest<'a> {
    detokenization_parameters: Vec<DetokenizeParameter<'a>>,
}

#[derive(Serialize)]
struct DetokenizeParameter<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct FunctionEnvelope<'a> {
    body: &'a FunctionRequest,
}

fn first_record(value: &Value) -> Result<&Value, VaultError> {
    value
        .get("records")
        .and_then(Value::as_array)
        .and_then(|records| records.first())
        .ok_or(VaultError::NotFound)
}

/// Pull the token for `column` out of an insert response.
fn token_from_insert(value: &Value, column: &str) -> Result<String, VaultError> {
    let record = first_record(value)?;
    ["tokens", "fields"]
        .iter()
        .filter_map(|section| record.get(section).and_then(|s| s.get(column)).and_then(Value::as_str))
        .chain(record.get("skyflow_id").and_then(Value::as_str))
        .find(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| VaultError::MalformedResponse("insert response carried no token".into()))
}

/// Normalize a function result, unwrapping `result`/`body` envelopes and
/// either token-usage key style.
fn parse_function_response(value: Value) -> Result<FunctionResponse, VaultError> {
    let mut inner = value;
    for key in ["result", "body"] {
        if let Some(wrapped) = inner.get(key).cloned() {
            inner = match wrapped {
                Value::String(text) => serde_json::from_str(&text)
                    .map_err(|e| VaultError::MalformedResponse(format!("function body: {e}")))?,
                other => other,
            };
            break;
        }
    }

    if inner.get("success").and_then(Value::as_bool) == Some(false) {
        let reason = inner
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("function returned success=false");
        return Err(VaultError::FunctionFailed(reason.chars().take(200).collect()));
    }

    let summary = inner
        .get("summary")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| VaultError::MalformedResponse("function result has no summary".into()))?
        .to_string();

    let usage = inner.get("tokens_used").or_else(|| inner.get("usage"));
    let count = |keys: [&str; 2]| -> i64 {
        usage
            .and_then(|u| keys.iter().find_map(|k| u.get(k).and_then(Value::as_i64)))
            .unwrap_or(0)
    };

    Ok(FunctionResponse {
        summary,
        input_tokens: count(["input_tokens", "input"]),
        output_tokens: count(["output_tokens", "output"]),
    })
}

impl VaultService for SkyflowClient {
    fn tokenize(&self, value: &str, kind: PiiKind) -> Result<String, VaultError> {
        let (base, vault_id, bearer) = self.credentials()?;
        let column = column_for(kind);
        let stored = match kind {
            PiiKind::Dob => normalize_dob(value),
            _ => value.to_string(),
        };

        let mut fields = serde_json::Map::new();
        fields.insert(column.to_string(), Value::String(stored));
        let body = InsertRequest {
            records: vec![InsertRecord { fields }],
            tokenization: true,
        };

        let url = format!("{base}/v1/vaults/{vault_id}/{}", self.settings.table);
        let request = self.client.post(&url).bearer_auth(bearer).json(&body);
        let response = self.send(request, self.settings.timeout)?;
        let token = token_from_insert(&response, column)?;
        tracing::debug!(kind = %kind, "Vault tokenized field");
        Ok(token)
    }

    fn detokenize(&self, token: &str) -> Result<String, VaultError> {
        let (base, vault_id, bearer) = self.credentials()?;
        let body = DetokenizeRequest {
            detokenization_parameters: vec![DetokenizeParameter { token }],
        };
        let url = format!("{base}/v1/vaults/{vault_id}/tokens/detokenize");
        let request = self.client.post(&url).bearer_auth(bearer).json(&body);
        let response = self.send(request, self.settings.timeout)?;

        first_record(&response)?
            .get("value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(VaultError::NotFound)
    }

    fn lookup_record(&self, record_id: &str, kind: PiiKind) -> Result<String, VaultError> {
        let (base, vault_id, bearer) = self.credentials()?;
        let url = format!("{base}/v1/vaults/{vault_id}/{}", self.settings.table);
        let request = self
            .client
            .get(&url)
            .bearer_auth(bearer)
            .query(&[("skyflow_ids", record_id), ("redaction", "PLAIN_TEXT")]);
        let response = self.send(request, self.settings.timeout)?;

        let fields = first_record(&response)?
            .get("fields")
            .ok_or(VaultError::NotFound)?;
        fields
            .get(column_for(kind))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or(VaultError::NotFound)
    }

    fn invoke_function(&self, request: &FunctionRequest) -> Result<FunctionResponse, VaultError> {
        let function_id = self
            .settings
            .function_id
            .as_deref()
            .ok_or(VaultError::FunctionUnavailable)?;
        let (base, vault_id, bearer) = self.credentials()?;
        let envelope = FunctionEnvelope { body: request };

        let scoped = format!("{base}/v1/vaults/{vault_id}/functions/{function_id}");
        let response = match self.post_function(&scoped, bearer, &envelope) {
            Err(VaultError::NotFound) => {
                tracing::warn!("Vault-scoped function URL returned 404, trying global URL");
                let global = format!("{base}/v1/functions/{function_id}");
                self.post_function(&global, bearer, &envelope)
                    .map_err(|e| match e {
                        VaultError::NotFound => VaultError::FunctionUnavailable,
                        other => other,
                    })?
            }
            other => other?,
        };

        parse_function_response(response)
    }

    fn supports_functions(&self) -> bool {
        self.settings.function_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unconfigured() -> SkyflowClient {
        SkyflowClient::new(Settings::default().vault).unwrap()
    }

    #[test]
    fn dob_normalization() {
        assert_eq!(normalize_dob("03/15/1980"), "1980-03-15");
        assert_eq!(normalize_dob("1980-03-15"), "1980-03-15");
        assert_eq!(normalize_dob("13/45/1980"), "13/45/1980");
    }

    #[test]
    fn missing_credentials_are_configuration_errors() {
        let client = unconfigured();
        let err = client.tokenize("value", PiiKind::Ssn).unwrap_err();
        assert!(matches!(err, VaultError::Configuration("vault URL missing")));
        assert!(!client.supports_functions());
    }

    #[test]
    fn function_without_id_is_unavailable() {
        let client = unconfigured();
        let request = FunctionRequest {
            prompt_template: "t".into(),
            patient_data: crate::pipeline::vault::FunctionPatientData {
                name_token: String::new(),
                ssn_token: String::new(),
                dob_token: String::new(),
                condition: "asthma".into(),
                department: "pulmonology".into(),
                lab_results: "No lab results".into(),
            },
            parameters: crate::pipeline::vault::FunctionParameters {
                model: "m".into(),
                temperature: 0.5,
                max_tokens: 100,
            },
        };
        assert!(matches!(
            client.invoke_function(&request),
            Err(VaultError::FunctionUnavailable)
        ));
    }

    #[test]
    fn insert_token_prefers_tokens_section() {
        let response = json!({"records": [{"skyflow_id": "4df78a15-27ae-43b4-ad17-4260e6d579a9",
                                            "tokens": {"ssn": "tok-ssn"}}]});
        assert_eq!(token_from_insert(&response, "ssn").unwrap(), "tok-ssn");
    }

    #[test]
    fn insert_token_falls_back_to_record_id() {
        let response = json!({"records": [{"skyflow_id": "4df78a15-27ae-43b4-ad17-4260e6d579a9"}]});
        assert_eq!(
            token_from_insert(&response, "name").unwrap(),
            "4df78a15-27ae-43b4-ad17-4260e6d579a9"
        );
        assert!(matches!(token_from_insert(&json!({"records": []}), "name"), Err(VaultError::NotFound)));
    }

    #[test]
    fn function_response_unwraps_envelope() {
        let parsed = parse_function_response(json!({
            "result": {"success": true, "summary": "Stable.", "tokens_used": {"input_tokens": 40, "output_tokens": 12}}
        }))
        .unwrap();
        assert_eq!(parsed.summary, "Stable.");
        assert_eq!(parsed.input_tokens, 40);
        assert_eq!(parsed.output_tokens, 12);
    }

    #[test]
    fn function_response_accepts_short_usage_keys() {
        let parsed = parse_function_response(json!({
            "body": "{\"success\": true, \"summary\": \"Ok\", \"tokens_used\": {\"input\": 5, \"output\": 7}}"
        }))
        .unwrap();
        assert_eq!((parsed.input_tokens, parsed.output_tokens), (5, 7));
    }

    #[test]
    fn function_failure_is_transient() {
        let err = parse_function_response(json!({"success": false, "error": "upstream timeout"})).unwrap_err();
        assert!(err.is_retryable());
        let err = parse_function_response(json!({"success": true})).unwrap_err();
        assert!(matches!(err, VaultError::MalformedResponse(_)));
    }
}
