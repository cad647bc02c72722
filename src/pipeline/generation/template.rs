//! Prompt placeholder rendering.
//!
//! Templates use `{name}`, `{condition}`, `{department}` and `{lab_results}`.
//! Any other `{…}` token, or an unclosed brace, is a structural error: the
//! orchestrator reselects a different template instead of sending a broken
//! prompt.

use thiserror::Error;

pub const PLACEHOLDERS: [&str; 4] = ["name", "condition", "department", "lab_results"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("Unclosed placeholder at byte {0}")]
    Unclosed(usize),
}

/// Values substituted into a template. `name` is a token or a detokenized
/// name depending on where the prompt is sent.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub name: &'a str,
    pub condition: &'a str,
    pub department: &'a str,
    pub lab_results: &'a str,
}

impl PromptContext<'_> {
    fn value(&self, placeholder: &str) -> Option<&str> {
        match placeholder {
            "name" => Some(self.name),
            "condition" => Some(self.condition),
            "department" => Some(self.department),
            "lab_results" => Some(self.lab_results),
            _ => None,
        }
    }
}

/// Check a template's placeholders without rendering it.
pub fn validate(template: &str) -> Result<(), TemplateError> {
    let blank = PromptContext {
        name: "",
        condition: "",
        department: "",
        lab_results: "",
    };
    render(template, &blank).map(|_| ())
}

/// Fill every placeholder. Substituted values are not rescanned.
pub fn render(template: &str, context: &PromptContext<'_>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len() + 256);
    let mut rest = template;
    let mut offset = 0usize;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or(TemplateError::Unclosed(offset + open))?;
        let placeholder = &after[..close];
        let value = context
            .value(placeholder)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(placeholder.to_string()))?;
        out.push_str(value);

        let consumed = open + 1 + close + 1;
        offset += consumed;
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    Ok(out)
}
