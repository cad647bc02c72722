use std::cmp::Ordering;

use super::PiiEntity;
use crate::models::enums::DetectionSource;

/// External hits at or above this confidence are never displaced by a local
/// hit on an overlapping span, whatever the local confidence.
pub const EXTERNAL_PRECEDENCE: f32 = 0.85;

/// Precedence between two candidates for the same text.
///
/// 1. A confident external hit beats anything that is not one.
/// 2. Otherwise higher confidence wins.
/// 3. Equal confidence prefers the external source, then the longer span,
///    then the earlier start.
fn precedence(a: &PiiEntity, b: &PiiEntity) -> Ordering {
    let pinned = |e: &PiiEntity| e.source == DetectionSource::External && e.confidence >= EXTERNAL_PRECEDENCE;
    pinned(b)
        .cmp(&pinned(a))
        .then_with(|| b.confidence.total_cmp(&a.confidence))
        .then_with(|| {
            let external = |e: &PiiEntity| e.source == DetectionSource::External;
            external(b).cmp(&external(a))
        })
        .then_with(|| b.span.len().cmp(&a.span.len()))
        .then_with(|| a.span.start.cmp(&b.span.start))
}

/// Combine local and external detections into a non-overlapping list ordered
/// by span start. Candidates are accepted greedily in precedence order; a
/// candidate overlapping an accepted one is dropped.
pub fn merge_entities(local: Vec<PiiEntity>, external: Vec<PiiEntity>) -> Vec<PiiEntity> {
    let mut candidates: Vec<PiiEntity> = local
        .into_iter()
        .chain(external)
        .filter(|e| !e.span.is_empty() && !e.value.trim().is_empty())
        .collect();
    candidates.sort_by(precedence);

    let mut accepted: Vec<PiiEntity> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if accepted.iter().all(|kept| !kept.span.overlaps(&candidate.span)) {
            accepted.push(candidate);
        }
    }
    accepted.sort_by_key(|e| e.span.start);
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::PiiKind;
    use crate::pipeline::detection::Span;

    fn entity(kind: PiiKind, start: usize, end: usize, confidence: f32, source: DetectionSource) -> PiiEntity {
        PiiEntity::new(kind, "x".repeat(end - start), confidence, Span { start, end }, source)
    }

    #[test]
    fn confident_external_beats_stronger_local() {
        let local = vec![entity(PiiKind::Ssn, 0, 11, 0.98, DetectionSource::Local)];
        let external = vec![entity(PiiKind::Name, 0, 11, 0.9, DetectionSource::External)];
        let merged = merge_entities(local, external);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, DetectionSource::External);
        assert_eq!(merged[0].kind, PiiKind::Name);
    }

    #[test]
    fn weak_external_loses_to_stronger_local() {
        let local = vec![entity(PiiKind::Name, 5, 15, 0.85, DetectionSource::Local)];
        let external = vec![entity(PiiKind::Address, 4, 20, 0.5, DetectionSource::External)];
        let merged = merge_entities(local, external);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, DetectionSource::Local);
    }

    #[test]
    fn tie_prefers_external() {
        let local = vec![entity(PiiKind::Dob, 0, 10, 0.6, DetectionSource::Local)];
        let external = vec![entity(PiiKind::Dob, 0, 10, 0.6, DetectionSource::External)];
        let merged = merge_entities(local, external);
        assert_eq!(merged[0].source, DetectionSource::External);
    }

    #[test]
    fn disjoint_spans_all_kept_in_order() {
        let local = vec![
            entity(PiiKind::Ssn, 30, 41, 0.98, DetectionSource::Local),
            entity(PiiKind::Name, 0, 10, 0.85, DetectionSource::Local),
        ];
        let external = vec![entity(PiiKind::Dob, 15, 25, 0.95, DetectionSource::External)];
        let merged = merge_entities(local, external);
        let starts: Vec<usize> = merged.iter().map(|e| e.span.start).collect();
        assert_eq!(starts, vec![0, 15, 30]);
    }

    #[test]
    fn empty_spans_are_dropped() {
        let local = vec![entity(PiiKind::Name, 3, 3, 0.9, DetectionSource::Local)];
        assert!(merge_entities(local, Vec::new()).is_empty());
    }
}
