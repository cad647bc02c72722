// Static audit: scans every source file for tracing calls that carry PII
// field names or raw values, so a regression cannot put patient identity
// into logs.

use std::fs;
use std::path::Path;

/// Patterns that MUST NOT appear in tracing macro arguments.
const PII_PATTERNS: &[&str] = &[
    // Identity fields
    "patient_name",
    "ssn",
    "dob",
    "date_of_birth",
    "address",
    // Whole-document and generated text
    "raw_text",
    "document.text",
    "redacted_text",
    "summary =",
    "%summary",
    "prompt =",
    "%prompt",
    // Interpolations that leak entity or resolved values
    "entity.value",
    "e.value",
    ".value()",
    "decrypted.name",
    // Credentials
    "bearer_token",
    "api_key",
];

const ALLOWLIST: &[&str] = &["privacy_audit.rs"];

const TRACING_MACROS: &[&str] = &[
    "tracing::info!",
    "tracing::warn!",
    "tracing::error!",
    "tracing::debug!",
    "tracing::trace!",
];

#[test]
fn no_pii_in_tracing_calls() {
    let src_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    assert!(src_dir.exists(), "Source directory not found: {}", src_dir.display());

    let mut violations = Vec::new();
    scan_directory(&src_dir, &mut violations);

    if !violations.is_empty() {
        let report = violations
            .iter()
            .map(|(file, line_num, call, pattern)| format!("  {file}:{line_num}: found '{pattern}' in: {call}"))
            .collect::<Vec<_>>()
            .join("\n");
        panic!(
            "PII AUDIT FAILED: {} violation(s) in tracing calls:\n{report}\n\n\
             Fix: log opaque ids, counts and classes instead.",
            violations.len()
        );
    }
}

#[test]
fn scanner_detects_known_violation() {
    let line = r#"tracing::info!(ssn = %entity.value, "tokenized");"#;
    assert!(!violations_in("fixture.rs", line).is_empty());
}

#[test]
fn scanner_follows_multi_line_calls() {
    let source = "tracing::warn!(\n    patient_id = %id,\n    summary = %text,\n    \"done\"\n);";
    let found = violations_in("fixture.rs", source);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].1, 1);
}

#[test]
fn scanner_passes_clean_tracing() {
    let line = r#"tracing::info!(patient_id = %record.id, entities = 3, "Patient record stored");"#;
    assert!(violations_in("fixture.rs", line).is_empty());
}

type Violation = (String, usize, String, String);

fn scan_directory(dir: &Path, violations: &mut Vec<Violation>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_directory(&path, violations);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            let filename = path.file_name().unwrap_or_default().to_string_lossy();
            if ALLOWLIST.iter().any(|a| filename.contains(a)) {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            let relative = path
                .strip_prefix(Path::new(env!("CARGO_MANIFEST_DIR")).join("src"))
                .unwrap_or(&path)
                .display()
                .to_string();
            violations.extend(violations_in(&relative, &content));
        }
    }
}

/// Collect each tracing call (possibly multi-line) and match it against
/// the pattern list. Line numbers are 1-indexed at the call start.
fn violations_in(file: &str, content: &str) -> Vec<Violation> {
    let lines: Vec<&str> = content.lines().collect();
    let mut found = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let trimmed = lines[i].trim();
        let Some(start) = TRACING_MACROS.iter().filter_map(|m| trimmed.find(m)).min() else {
            i += 1;
            continue;
        };

        let mut call = String::from(&trimmed[start..]);
        let mut depth = paren_depth(&call);
        let mut j = i + 1;
        while depth > 0 && j < lines.len() {
            let next = lines[j].trim();
            call.push(' ');
            call.push_str(next);
            depth += paren_depth(next);
            j += 1;
        }

        for pattern in PII_PATTERNS {
            if call.contains(pattern) {
                found.push((file.to_string(), i + 1, call.clone(), pattern.to_string()));
            }
        }
        i = j;
    }
    found
}

fn paren_depth(s: &str) -> i32 {
    s.chars().fold(0, |depth, ch| match ch {
        '(' => depth + 1,
        ')' => depth - 1,
        _ => depth,
    })
}
