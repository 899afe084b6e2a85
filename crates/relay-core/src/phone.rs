//! Phone number normalization.

use crate::error::RelayError;

/// Minimum number of digits in a usable phone number.
pub const MIN_PHONE_DIGITS: usize = 10;

/// Normalize a phone number to `+` followed by digits.
///
/// `+`, `-` and spaces are stripped wherever they appear. Any other
/// non-digit character rejects the number. There is no upper bound on
/// length.
pub fn normalize_phone(raw: &str) -> Result<String, RelayError> {
    let mut digits = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '+' | '-' | ' ' => {}
            _ => return Err(RelayError::InvalidPhone),
        }
    }

    if digits.len() < MIN_PHONE_DIGITS {
        return Err(RelayError::InvalidPhone);
    }

    Ok(format!("+{}", digits))
}

/// Mask all but the last four digits, for log output.
pub fn redact_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let visible = digits.len().saturating_sub(4);
    let tail: String = digits[visible..].iter().collect();
    format!("+{}{}", "*".repeat(visible), tail)
}
