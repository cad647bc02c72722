//! PII entity detection.
//!
//! Local structural patterns always run. An optional external detector adds
//! higher-precision hits; when it is missing or fails, detection silently
//! degrades to the local path. The two result sets are combined by
//! [`merge::merge_entities`].

pub mod merge;
pub mod patterns;
pub mod redact;
pub mod remote;

pub use merge::merge_entities;
pub use redact::{contains_any_value, redact};
pub use remote::McpDetector;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::models::enums::{DetectionSource, PiiKind};

/// Byte range of an entity in the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A detected PII value. The raw value is wiped when the entity is dropped.
#[derive(Clone)]
pub struct PiiEntity {
    pub kind: PiiKind,
    pub value: String,
    pub confidence: f32,
    pub span: Span,
    pub source: DetectionSource,
}

impl PiiEntity {
    pub fn new(kind: PiiKind, value: impl Into<String>, confidence: f32, span: Span, source: DetectionSource) -> Self {
        Self {
            kind,
            value: value.into(),
            confidence: clamp_confidence(confidence),
            span,
            source,
        }
    }

    /// Caller-facing view without the raw value.
    pub fn describe(&self) -> DetectedEntity {
        DetectedEntity {
            kind: self.kind,
            confidence: self.confidence,
            start: self.span.start,
            end: self.span.end,
            source: self.source,
        }
    }
}

impl std::fmt::Debug for PiiEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiiEntity")
            .field("kind", &self.kind)
            .field("value", &"<redacted>")
            .field("confidence", &self.confidence)
            .field("span", &self.span)
            .field("source", &self.source)
            .finish()
    }
}

impl Drop for PiiEntity {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub kind: PiiKind,
    pub confidence: f32,
    pub start: usize,
    pub end: usize,
    pub source: DetectionSource,
}

/// Confidence is kept in [0, 1] so both sources compare on one scale.
pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("External detector unreachable: {0}")]
    Unavailable(String),

    #[error("External detector returned status {0}")]
    Http(u16),

    #[error("External detector error: {0}")]
    Rpc(String),

    #[error("Malformed detector response: {0}")]
    Malformed(String),

    #[error("Detector output could not be aligned with the input text")]
    Misaligned,
}

/// Higher-precision detection step backed by a remote service.
pub trait ExternalDetector: Send + Sync {
    fn detect(&self, text: &str) -> Result<Vec<PiiEntity>, DetectError>;
}

/// Runs local patterns and, when configured, an external detector.
#[derive(Default)]
pub struct PiiDetector {
    external: Option<Box<dyn ExternalDetector>>,
}

impl PiiDetector {
    pub fn local() -> Self {
        Self { external: None }
    }

    pub fn with_external(external: Box<dyn ExternalDetector>) -> Self {
        Self {
            external: Some(external),
        }
    }

    /// Never fails; text without PII yields an empty list. Results are
    /// ordered by span start and never overlap.
    pub fn detect(&self, text: &str) -> Vec<PiiEntity> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let local = patterns::scan(text);
        let external = match &self.external {
            Some(detector) => match detector.detect(text) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(error = %e, "External PII detection failed, using local patterns");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let clinical = patterns::clinical_value_spans(text);
        let merged: Vec<PiiEntity> = merge_entities(local, external)
            .into_iter()
            .filter(|e| e.kind != PiiKind::Name || !clinical.iter().any(|span| span.overlaps(&e.span)))
            .collect();
        tracing::debug!(count = merged.len(), "PII detection complete");
        merged
    }
}
