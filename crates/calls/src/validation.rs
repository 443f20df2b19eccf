//! Outbound call parameter validation.

use std::sync::LazyLock;

use regex::Regex;

use cr_domain::call::CallRequest;

use crate::error::CallError;

/// Optional `+`, then 2–15 digits with no leading zero.
static INTERNATIONAL_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").unwrap());

/// Strip the separators people type into phone numbers.
pub fn normalize_phone(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.'))
        .collect()
}

/// Validate and normalise a destination number.
pub fn validate_phone(raw: &str) -> Result<String, CallError> {
    if raw.trim().is_empty() {
        return Err(CallError::InvalidRequest(
            "destination number is required".into(),
        ));
    }
    let normalized = normalize_phone(raw);
    if !INTERNATIONAL_NUMBER.is_match(&normalized) {
        return Err(CallError::InvalidRequest(format!(
            "invalid destination number {raw:?}, expected international format like +14155551234"
        )));
    }
    Ok(normalized)
}

/// Return a copy of `req` with a normalised destination.
pub fn validate_request(req: &CallRequest) -> Result<CallRequest, CallError> {
    let to = validate_phone(&req.to)?;
    Ok(CallRequest { to, ..req.clone() })
}
