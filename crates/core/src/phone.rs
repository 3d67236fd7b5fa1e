//! Phone number normalization for WhatsApp delivery.
//!
//! The Cloud API expects international digits without a leading `+`. Numbers
//! arrive from SAP, local overrides and admin forms in every shape people
//! type them, so everything funnels through [`normalize_phone`].

use thiserror::Error;

const NATIONAL_DIGITS: usize = 10;
const MIN_INTERNATIONAL_DIGITS: usize = 11;
const MAX_INTERNATIONAL_DIGITS: usize = 15;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number `{0}` contains unsupported characters")]
    UnsupportedCharacters(String),
    #[error("phone number `{0}` is not a valid mobile number")]
    Invalid(String),
}

pub fn normalize_phone(raw: &str, default_country_code: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }

    let mut international = false;
    let mut digits = String::with_capacity(trimmed.len());
    for (index, ch) in trimmed.chars().enumerate() {
        match ch {
            '+' if index == 0 => international = true,
            ' ' | '-' | '.' | '(' | ')' => {}
            c if c.is_ascii_digit() => digits.push(c),
            _ => return Err(PhoneError::UnsupportedCharacters(trimmed.to_string())),
        }
    }

    if let Some(rest) = digits.strip_prefix("00") {
        international = true;
        digits = rest.to_string();
    }

    if digits.is_empty() {
        return Err(PhoneError::Empty);
    }

    let country_code = default_country_code.trim().trim_start_matches('+');

    if !international {
        if digits.len() == NATIONAL_DIGITS {
            return Ok(format!("{country_code}{digits}"));
        }
        if digits.len() == NATIONAL_DIGITS + 1 && digits.starts_with('0') {
            return Ok(format!("{country_code}{}", &digits[1..]));
        }
    }

    if !country_code.is_empty()
        && digits.starts_with(country_code)
        && digits.len() == country_code.len() + NATIONAL_DIGITS
    {
        return Ok(digits);
    }

    if international
        && (MIN_INTERNATIONAL_DIGITS..=MAX_INTERNATIONAL_DIGITS).contains(&digits.len())
    {
        return Ok(digits);
    }

    Err(PhoneError::Invalid(trimmed.to_string()))
}

/// Same as [`normalize_phone`] but treats an unusable number as absent.
pub fn normalize_optional_phone(raw: Option<&str>, default_country_code: &str) -> Option<String> {
    raw.and_then(|value| normalize_phone(value, default_country_code).ok())
}

#[cfg(test)]
mod tests {
    use super::{normalize_optional_phone, normalize_phone, PhoneError};

    #[test]
    fn national_number_gets_country_code() {
        assert_eq!(normalize_phone("98765 43210", "91").as_deref(), Ok("919876543210"));
    }

    #[test]
    fn trunk_prefix_is_dropped() {
        assert_eq!(normalize_phone("09876543210", "91").as_deref(), Ok("919876543210"));
    }

    #[test]
    fn formatted_international_numbers_are_kept() {
        assert_eq!(normalize_phone("+91 (98765) 43-210", "91").as_deref(), Ok("919876543210"));
        assert_eq!(normalize_phone("0049 151 2345 6789", "91").as_deref(), Ok("4915123456789"));
        assert_eq!(normalize_phone("+44 7700 900123", "91").as_deref(), Ok("447700900123"));
    }

    #[test]
    fn already_prefixed_number_is_accepted_without_plus() {
        assert_eq!(normalize_phone("919876543210", "+91").as_deref(), Ok("919876543210"));
    }

    #[test]
    fn junk_is_rejected() {
        assert_eq!(normalize_phone("   ", "91"), Err(PhoneError::Empty));
        assert!(matches!(normalize_phone("12345", "91"), Err(PhoneError::Invalid(_))));
        assert!(matches!(
            normalize_phone("98765x43210", "91"),
            Err(PhoneError::UnsupportedCharacters(_))
        ));
        assert!(matches!(
            normalize_phone("9+876543210", "91"),
            Err(PhoneError::UnsupportedCharacters(_))
        ));
    }

    #[test]
    fn optional_helper_drops_invalid_numbers() {
        assert_eq!(normalize_optional_phone(Some("123"), "91"), None);
        assert_eq!(normalize_optional_phone(None, "91"), None);
        assert_eq!(
            normalize_optional_phone(Some("9876543210"), "91").as_deref(),
            Some("919876543210")
        );
    }
}
