//! Recipient addressing.
//!
//! The backend addresses personal chats as `<digits>@c.us`. Callers may pass a
//! bare phone number (with `+`, spaces, dashes, dots or parentheses) or an
//! already-formed chat id. Anything containing `@` is treated as a chat id and
//! passed through trimmed, so normalization is idempotent.

use crate::{Error, Result};

/// Suffix of personal chat ids.
pub const CHAT_ID_SUFFIX: &str = "@c.us";

/// Normalize a send target into a chat id.
pub fn normalize_recipient(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_argument("recipient is required"));
    }
    if trimmed.contains('@') {
        return Ok(trimmed.to_string());
    }
    let digits = normalize_phone_number(trimmed)?;
    Ok(format!("{digits}{CHAT_ID_SUFFIX}"))
}

/// Reduce a phone number to its digits (international format, no `+`).
pub fn normalize_phone_number(raw: &str) -> Result<String> {
    let digits: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::invalid_argument(format!(
            "not a phone number: {raw:?}"
        )));
    }
    Ok(digits)
}
