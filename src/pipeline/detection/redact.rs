//! Replace detected PII in document text with kind labels.

use super::PiiEntity;
use crate::models::enums::PiiKind;

/// Values shorter than this are only redacted at their detected span.
const MIN_REPEAT_LEN: usize = 3;

/// Redact every detected span, plus every other verbatim occurrence of a
/// detected value. Overlaps resolve to the earliest and then longest match.
pub fn redact(text: &str, entities: &[PiiEntity]) -> String {
    let mut ranges: Vec<(usize, usize, PiiKind)> = Vec::new();
    for entity in entities {
        if entity.span.end <= text.len() && text.is_char_boundary(entity.span.start) && text.is_char_boundary(entity.span.end)
        {
            ranges.push((entity.span.start, entity.span.end, entity.kind));
        }
        if entity.value.trim().len() >= MIN_REPEAT_LEN {
            for (start, matched) in text.match_indices(entity.value.as_str()) {
                ranges.push((start, start + matched.len(), entity.kind));
            }
        }
    }
    ranges.sort_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, kind) in ranges {
        if start < cursor || start == end {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(kind.redaction_label());
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// True when `haystack` still contains any detected value verbatim.
pub fn contains_any_value(haystack: &str, entities: &[PiiEntity]) -> Option<PiiKind> {
    entities
        .iter()
        .find(|e| !e.value.trim().is_empty() && haystack.contains(e.value.as_str()))
        .map(|e| e.kind)
}
