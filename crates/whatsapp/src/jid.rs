use crate::error::{ClientError, ClientResult};
use crate::types::{Jid, DEFAULT_USER_SERVER};
use regex::Regex;
use std::sync::OnceLock;

static PHONE_RE: OnceLock<Regex> = OnceLock::new();

/// Strips the punctuation people paste into phone numbers and checks what remains
/// is an international number without the leading `+`.
pub fn normalize_phone(raw: &str) -> ClientResult<String> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '.' | '(' | ')'))
        .collect();

    let re = PHONE_RE.get_or_init(|| Regex::new(r"^\d{1,20}$").unwrap());
    if re.is_match(&digits) {
        Ok(digits)
    } else {
        Err(ClientError::Validation(format!(
            "'{}' is not a phone number with country code",
            raw
        )))
    }
}

pub fn build_jid(phone: &str) -> ClientResult<Jid> {
    let user = normalize_phone(phone)?;
    Ok(Jid::new(user, DEFAULT_USER_SERVER))
}
