//! Local structural patterns and capitalization heuristics.

use std::sync::LazyLock;

use regex::Regex;

use super::{merge_entities, PiiEntity, Span};
use crate::models::enums::{DetectionSource, PiiKind};

const SSN_CONFIDENCE: f32 = 0.98;
const DOB_LABELED_CONFIDENCE: f32 = 0.92;
const DATE_UNLABELED_CONFIDENCE: f32 = 0.6;
const NAME_CONFIDENCE: f32 = 0.85;
const NAME_LABELED_CONFIDENCE: f32 = 0.9;
const ADDRESS_CONFIDENCE: f32 = 0.8;

/// How far back a field label may sit from the value it introduces.
const LABEL_WINDOW: usize = 32;

static SSN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d{4}-\d{2}-\d{2}|\d{2}/\d{2}/\d{4})\b").unwrap());

static DOB_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:dob|d\.o\.b\.?|date of birth|birth ?date|born)\b[\s:]*$").unwrap());

static CAPITALIZED_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+(?: [A-Z][a-z]+)+\b").unwrap());

static NAME_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:name|patient)\b[\s:]*$").unwrap());

/// Lines whose value is clinical vocabulary, never a person.
static CLINICAL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[ \t]*(?:condition|diagnosis|primary diagnosis|department|unit|service)[ \t]*:[ \t]*(.+)$")
        .unwrap()
});

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\d{1,5}(?: [A-Z][a-z]+){1,3} (?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Way|Place|Pl)\b\.?(?:, [A-Z][a-z]+(?: [A-Z][a-z]+)*)?(?:, [A-Z]{2})?(?: \d{5})?",
    )
    .unwrap()
});

/// Capitalized words that never start or continue a person's name.
const NON_NAME_WORDS: &[&str] = &[
    // field labels and document furniture
    "Patient", "Name", "Full", "First", "Last", "Doctor", "Medical", "Record", "Health", "History",
    "Date", "Birth", "Condition", "Department", "Priority", "Lab", "Labs", "Results", "Result",
    "Test", "Normal", "Notes", "Note", "Summary", "Assessment", "Plan", "Diagnosis", "Chief",
    "Complaint", "Clinical", "Address", "Phone", "Admission", "Discharge", "Follow", "Up",
    "Blood", "Pressure", "Heart", "Rate", "Type", "Urgent", "Stable",
    // titles
    "Dr", "Mr", "Mrs", "Ms", "Miss", "Prof",
    // departments and conditions
    "Cardiology", "Endocrinology", "Pulmonology", "Oncology", "Neurology", "General", "Medicine",
    "Emergency", "Diabetes", "Hypertension", "Asthma", "Coronary", "Artery", "Disease", "Cardiac",
    // street suffixes
    "Street", "Avenue", "Road", "Boulevard", "Lane", "Drive", "Court", "Way", "Place",
    // calendar
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday",
    "Saturday", "Sunday",
];

fn is_non_name_word(word: &str) -> bool {
    NON_NAME_WORDS.contains(&word)
}

fn preceded_by(text: &str, start: usize, label: &Regex) -> bool {
    let mut from = start.saturating_sub(LABEL_WINDOW);
    while !text.is_char_boundary(from) {
        from += 1;
    }
    let prefix = &text[from..start];
    let line = prefix.rsplit('\n').next().unwrap_or(prefix);
    label.is_match(line)
}

/// Value spans of labeled clinical lines (`Condition:`, `Diagnosis:`,
/// `Department:` and similar).
pub fn clinical_value_spans(text: &str) -> Vec<Span> {
    CLINICAL_LINE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| Span { start: m.start(), end: m.end() })
        .collect()
}

/// Run every local pattern. Overlaps between patterns are resolved by the
/// same merge rule applied to external hits.
pub fn scan(text: &str) -> Vec<PiiEntity> {
    let addresses = scan_addresses(text);
    let mut excluded: Vec<Span> = addresses.iter().map(|a| a.span).collect();
    excluded.extend(clinical_value_spans(text));

    let mut found = Vec::new();
    found.extend(scan_ssn(text));
    found.extend(scan_dates(text));
    // Street words and labeled diagnoses are not names.
    found.extend(
        scan_names(text)
            .into_iter()
            .filter(|name| !excluded.iter().any(|span| span.overlaps(&name.span))),
    );
    found.extend(addresses);
    merge_entities(found, Vec::new())
}

pub fn scan_ssn(text: &str) -> Vec<PiiEntity> {
    SSN.find_iter(text)
        .map(|m| {
            PiiEntity::new(
                PiiKind::Ssn,
                m.as_str(),
                SSN_CONFIDENCE,
                Span { start: m.start(), end: m.end() },
                DetectionSource::Local,
            )
        })
        .collect()
}

/// Dates count as a date of birth with high confidence only when labeled.
pub fn scan_dates(text: &str) -> Vec<PiiEntity> {
    DATE.find_iter(text)
        .map(|m| {
            let confidence = if preceded_by(text, m.start(), &DOB_LABEL) {
                DOB_LABELED_CONFIDENCE
            } else {
                DATE_UNLABELED_CONFIDENCE
            };
            PiiEntity::new(
                PiiKind::Dob,
                m.as_str(),
                confidence,
                Span { start: m.start(), end: m.end() },
                DetectionSource::Local,
            )
        })
        .collect()
}

pub fn scan_addresses(text: &str) -> Vec<PiiEntity> {
    ADDRESS
        .find_iter(text)
        .map(|m| {
            PiiEntity::new(
                PiiKind::Address,
                m.as_str().trim_end_matches('.'),
                ADDRESS_CONFIDENCE,
                Span { start: m.start(), end: m.start() + m.as_str().trim_end_matches('.').len() },
                DetectionSource::Local,
            )
        })
        .collect()
}

/// Runs of two or three capitalized words, after trimming words that are
/// labels, titles or clinical vocabulary.
pub fn scan_names(text: &str) -> Vec<PiiEntity> {
    let mut names = Vec::new();
    for m in CAPITALIZED_RUN.find_iter(text) {
        let mut offset = m.start();
        let mut words: Vec<(usize, &str)> = Vec::new();
        for word in m.as_str().split(' ') {
            words.push((offset, word));
            offset += word.len() + 1;
        }

        // A stop word splits the run; each remaining piece is a candidate.
        for piece in words.split(|(_, w)| is_non_name_word(w)) {
            if !(2..=3).contains(&piece.len()) {
                continue;
            }
            let (start, _) = piece[0];
            let (last_start, last_word) = piece[piece.len() - 1];
            let end = last_start + last_word.len();
            let confidence = if preceded_by(text, start, &NAME_LABEL) {
                NAME_LABELED_CONFIDENCE
            } else {
                NAME_CONFIDENCE
            };
            names.push(PiiEntity::new(
                PiiKind::Name,
                &text[start..end],
                confidence,
                Span { start, end },
                DetectionSource::Local,
            ));
        }
    }
    names
}
