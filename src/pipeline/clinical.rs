//! Clinical field extraction from free text: condition, department,
//! priority and lab result lines. None of these fields are PII.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::enums::Priority;
use crate::models::LabResult;

/// Keyword → (condition, department). First match in table order wins.
const CONDITION_TABLE: &[(&[&str], &str, &str)] = &[
    (&["diabetes", "diabetic", "hba1c"], "Diabetes", "Endocrinology"),
    (&["hypertension", "high blood pressure"], "Hypertension", "Cardiology"),
    (&["asthma", "copd", "wheez"], "Asthma", "Pulmonology"),
    (&["coronary", "cardiac", "heart failure", "myocardial"], "Cardiac", "Cardiology"),
];

const URGENT_MARKERS: &[&str] = &["urgent", "stat", "emergency", "critical"];

static CONDITION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*(?:condition|diagnosis|primary diagnosis)\s*:\s*(.+?)\s*$").unwrap());

static DEPARTMENT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*(?:department|unit|service)\s*:\s*(.+?)\s*$").unwrap());

static PRIORITY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^\s*priority\s*:\s*(\w+)").unwrap());

static LAB_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)^\s*[-*•]?\s*([A-Za-z][A-Za-z0-9 /%.-]*?)\s*:\s*([^()\n]+?)\s*\((?:normal|ref|reference)(?: range)?\s*:\s*([^)]+)\)\s*$",
    )
    .unwrap()
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]+").unwrap());

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClinicalFields {
    pub condition: Option<String>,
    pub department: Option<String>,
    pub priority: Priority,
    pub lab_results: Vec<LabResult>,
}

impl ClinicalFields {
    /// A record is worth generating only with a condition or a department.
    pub fn is_sufficient(&self) -> bool {
        self.condition.is_some() || self.department.is_some()
    }
}

/// Extract clinical fields. `text` should already be redacted when the
/// caller wants the labeled values to be PII-free.
pub fn extract(text: &str) -> ClinicalFields {
    let lower = text.to_lowercase();

    let keyword_hit = CONDITION_TABLE
        .iter()
        .find(|(keywords, _, _)| keywords.iter().any(|k| lower.contains(k)));

    let labeled_condition = CONDITION_LINE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty());

    let condition = labeled_condition.or_else(|| keyword_hit.map(|(_, condition, _)| condition.to_string()));

    let department = DEPARTMENT_LINE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| keyword_hit.map(|(_, _, department)| department.to_string()));

    ClinicalFields {
        condition,
        department,
        priority: extract_priority(text),
        lab_results: extract_labs(text),
    }
}

fn extract_priority(text: &str) -> Priority {
    if let Some(label) = PRIORITY_LINE.captures(text).and_then(|c| c.get(1)) {
        let value = label.as_str().to_lowercase();
        return if URGENT_MARKERS.contains(&value.as_str()) {
            Priority::Urgent
        } else {
            Priority::Normal
        };
    }
    // Unlabeled: only an all-caps marker counts, lowercase prose is too noisy.
    let shouted = WORD
        .find_iter(text)
        .any(|w| w.as_str() == "URGENT" || w.as_str() == "STAT");
    if shouted {
        Priority::Urgent
    } else {
        Priority::Normal
    }
}

pub fn extract_labs(text: &str) -> Vec<LabResult> {
    LAB_LINE
        .captures_iter(text)
        .filter_map(|c| {
            Some(LabResult {
                test_name: c.get(1)?.as_str().trim().to_string(),
                value: c.get(2)?.as_str().trim().to_string(),
                normal_range: c.get(3).map(|m| m.as_str().trim().to_string()),
            })
        })
        .collect()
}

/// One line per lab: `- Test: value (Normal: range)`.
pub fn format_lab_results(labs: &[LabResult]) -> String {
    if labs.is_empty() {
        return "No lab results".to_string();
    }
    labs.iter()
        .map(|lab| match &lab.normal_range {
            Some(range) => format!("- {}: {} (Normal: {})", lab.test_name, lab.value, range),
            None => format!("- {}: {}", lab.test_name, lab.value),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE: &str = "Patient Name: [NAME]\n\
        Chief complaint: fatigue, polyuria.\n\
        History of type 2 diabetes.\n\
        - HbA1c: 8.1% (Normal: <5.7%)\n\
        - Glucose: 182 mg/dL (Normal: 70-99 mg/dL)\n";

    #[test]
    fn condition_and_department_from_keywords() {
        let fields = extract(NOTE);
        assert_eq!(fields.condition.as_deref(), Some("Diabetes"));
        assert_eq!(fields.department.as_deref(), Some("Endocrinology"));
        assert!(fields.is_sufficient());
    }

    #[test]
    fn labeled_fields_take_precedence() {
        let fields = extract("Diagnosis: Community-acquired pneumonia\nDepartment: Internal Medicine\nasthma as a child");
        assert_eq!(fields.condition.as_deref(), Some("Community-acquired pneumonia"));
        assert_eq!(fields.department.as_deref(), Some("Internal Medicine"));
    }

    #[test]
    fn nothing_clinical_is_insufficient() {
        let fields = extract("Patient Name: [NAME]\nSSN: [SSN]\nPhone on file.");
        assert!(fields.condition.is_none());
        assert!(fields.department.is_none());
        assert!(!fields.is_sufficient());
    }

    #[test]
    fn parses_lab_lines() {
        let labs = extract_labs(NOTE);
        assert_eq!(labs.len(), 2);
        assert_eq!(labs[0].test_name, "HbA1c");
        assert_eq!(labs[0].value, "8.1%");
        assert_eq!(labs[0].normal_range.as_deref(), Some("<5.7%"));
        assert_eq!(labs[1].test_name, "Glucose");
    }

    #[test]
    fn priority_detection() {
        assert_eq!(extract_priority("Priority: URGENT"), Priority::Urgent);
        assert_eq!(extract_priority("Priority: routine"), Priority::Normal);
        assert_eq!(extract_priority("URGENT review requested"), Priority::Urgent);
        assert_eq!(extract_priority("not urgent, follow up in clinic"), Priority::Normal);
    }

    #[test]
    fn formats_labs_for_prompts() {
        let labs = extract_labs(NOTE);
        assert_eq!(
            format_lab_results(&labs),
            "- HbA1c: 8.1% (Normal: <5.7%)\n- Glucose: 182 mg/dL (Normal: 70-99 mg/dL)"
        );
        assert_eq!(format_lab_results(&[]), "No lab results");
    }
}
