use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::{DetectError, ExternalDetector, PiiEntity, Span};
use crate::config::VaultSettings;
use crate::models::enums::{DetectionSource, PiiKind};

const EXTERNAL_CONFIDENCE: f32 = 0.95;

/// `[ENTITY_TYPE_token]` placeholders written by the remote de-identifier.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([A-Z][A-Z_]*)_([A-Za-z0-9]+)\]").unwrap());

fn kind_for(entity_type: &str) -> Option<PiiKind> {
    match entity_type {
        "NAME" | "NAME_GIVEN" | "NAME_FAMILY" | "PERSON" | "PERSON_NAME" => Some(PiiKind::Name),
        "SSN" | "US_SSN" | "SOCIAL_SECURITY_NUMBER" => Some(PiiKind::Ssn),
        "DOB" | "DATE_OF_BIRTH" | "DATE" => Some(PiiKind::Dob),
        "ADDRESS" | "LOCATION" | "LOCATION_ADDRESS" | "STREET_ADDRESS" => Some(PiiKind::Address),
        _ => None,
    }
}

/// External detector speaking JSON-RPC to a de-identification tool server.
/// The server answers with the input text rewritten with placeholders; raw
/// values and spans are recovered by aligning that text with the input.
pub struct McpDetector {
    url: String,
    vault_id: String,
    vault_url: String,
    bearer_token: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u32,
    method: &'static str,
    params: RpcParams<'a>,
}

#[derive(Serialize)]
struct RpcParams<'a> {
    name: &'static str,
    arguments: DehydrateArguments<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DehydrateArguments<'a> {
    input_string: &'a str,
}

impl McpDetector {
    /// `None` unless detection is enabled and the vault is fully configured.
    pub fn from_settings(settings: &VaultSettings) -> Option<Self> {
        if !settings.use_detect {
            return None;
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .build()
            .ok()?;
        Some(Self {
            url: settings.detect_url.clone(),
            vault_id: settings.vault_id.clone()?,
            vault_url: settings.vault_url.clone()?,
            bearer_token: settings.bearer_token.clone()?,
            client,
        })
    }

    fn dehydrate(&self, text: &str) -> Result<String, DetectError> {
        let body = RpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "tools/call",
            params: RpcParams {
                name: "dehydrate",
                arguments: DehydrateArguments { input_string: text },
            },
        };

        let response = self
            .client
            .post(&self.url)
            .query(&[("vaultId", self.vault_id.as_str()), ("vaultUrl", self.vault_url.as_str())])
            .bearer_auth(&self.bearer_token)
            .header("Accept", "application/json, text/event-stream")
            .json(&body)
            .send()
            .map_err(|e| DetectError::Unavailable(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectError::Http(status.as_u16()));
        }
        let value: Value = response
            .json()
            .map_err(|e| DetectError::Malformed(e.without_url().to_string()))?;
        processed_text(&value)
    }
}

/// Extract the placeholder text from a JSON-RPC tool result.
fn processed_text(value: &Value) -> Result<String, DetectError> {
    if let Some(error) = value.get("error") {
        let message = error.get("message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(DetectError::Rpc(message.to_string()));
    }
    let result = value
        .get("result")
        .ok_or_else(|| DetectError::Malformed("missing result".into()))?;
    if result.get("isError").and_then(Value::as_bool) == Some(true) {
        return Err(DetectError::Rpc("tool reported an error".into()));
    }

    let from_content = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str);
    from_content
        .or_else(|| result.get("processedText").and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| DetectError::Malformed("no processed text".into()))
}

/// Recover `(entity_type, span)` pairs by walking the literal text between
/// placeholders through the original. Fails if the two texts disagree.
pub fn align_placeholders(original: &str, processed: &str) -> Result<Vec<(String, Span)>, DetectError> {
    let matches: Vec<_> = PLACEHOLDER.captures_iter(processed).collect();
    let mut aligned = Vec::with_capacity(matches.len());
    let mut cursor = 0usize;
    let mut literal_start = 0usize;

    for (i, caps) in matches.iter().enumerate() {
        let Some(whole) = caps.get(0) else { continue };
        let before = &processed[literal_start..whole.start()];
        if !original[cursor..].starts_with(before) {
            return Err(DetectError::Misaligned);
        }
        cursor += before.len();

        let after_end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(processed.len());
        let after = &processed[whole.end()..after_end];

        let value_len = if after.is_empty() {
            if i + 1 < matches.len() {
                // Two adjacent placeholders cannot be split unambiguously.
                return Err(DetectError::Misaligned);
            }
            original.len() - cursor
        } else {
            original[cursor..].find(after).ok_or(DetectError::Misaligned)?
        };

        let entity_type = caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string();
        aligned.push((entity_type, Span { start: cursor, end: cursor + value_len }));
        cursor += value_len;
        literal_start = whole.end();
    }

    if original[cursor..] != processed[literal_start..] {
        return Err(DetectError::Misaligned);
    }
    Ok(aligned)
}

/// Turn a processed text into entities over `original`. Unknown entity
/// types are aligned but not reported.
pub fn entities_from_processed(original: &str, processed: &str) -> Result<Vec<PiiEntity>, DetectError> {
    let aligned = align_placeholders(original, processed)?;
    Ok(aligned
        .into_iter()
        .filter_map(|(entity_type, span)| {
            let kind = kind_for(&entity_type)?;
            let value = original[span.start..span.end].trim();
            if value.is_empty() {
                return None;
            }
            Some(PiiEntity::new(kind, value, EXTERNAL_CONFIDENCE, span, DetectionSource::External))
        })
        .collect())
}

impl ExternalDetector for McpDetector {
    fn detect(&self, text: &str) -> Result<Vec<PiiEntity>, DetectError> {
        let processed = self.dehydrate(text)?;
        let entities = entities_from_processed(text, &processed)?;
        tracing::debug!(count = entities.len(), "External detector returned entities");
        Ok(entities)
    }
}
