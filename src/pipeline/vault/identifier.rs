use std::sync::LazyLock;

use regex::Regex;

static RECORD_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
});

/// True when a stored token is a vault record identifier (8-4-4-4-12 hex)
/// rather than an exchangeable vault token.
pub fn is_record_identifier(value: &str) -> bool {
    RECORD_ID.is_match(value.trim())
}
