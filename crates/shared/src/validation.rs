//! Common validation utilities.

use thiserror::Error;
use validator::ValidationError;

/// Smallest number of tickets a single registration may hold.
pub const MIN_TICKET_QUANTITY: i32 = 1;

/// Largest number of tickets a single registration may hold.
pub const MAX_TICKET_QUANTITY: i32 = 10;

/// Country calling code prepended to local numbers.
const COUNTRY_CODE: &str = "254";

lazy_static::lazy_static! {
    /// Canonical mobile number: country code, a `7` or `1` carrier prefix, eight digits.
    static ref CANONICAL_PHONE_REGEX: regex::Regex =
        regex::Regex::new(r"^254[17]\d{8}$").unwrap();
}

/// Reasons a phone number cannot be normalized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PhoneNumberError {
    #[error("Phone number is empty")]
    Empty,

    #[error("Phone number contains invalid characters")]
    InvalidCharacters,

    #[error("Phone number must be a valid mobile number such as 0712345678 or 254712345678")]
    InvalidFormat,
}

/// Normalizes a mobile number to the canonical `2547XXXXXXXX` form.
///
/// Accepts local (`0712345678`), bare (`712345678`) and international
/// (`254712345678`, `+254712345678`) forms. Spaces, dashes, dots and
/// parentheses are ignored.
pub fn normalize_phone_number(raw: &str) -> Result<String, PhoneNumberError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneNumberError::Empty);
    }

    let without_plus = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let mut digits = String::with_capacity(12);
    for c in without_plus.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return Err(PhoneNumberError::InvalidCharacters),
        }
    }

    let canonical = match digits.strip_prefix('0') {
        Some(local) if local.len() == 9 => format!("{COUNTRY_CODE}{local}"),
        _ if digits.len() == 9 => format!("{COUNTRY_CODE}{digits}"),
        _ => digits,
    };

    if CANONICAL_PHONE_REGEX.is_match(&canonical) {
        Ok(canonical)
    } else {
        Err(PhoneNumberError::InvalidFormat)
    }
}

/// Masks the middle digits of a phone number for log output.
pub fn mask_phone_number(phone: &str) -> String {
    if phone.len() <= 8 || !phone.is_ascii() {
        return "****".to_string();
    }
    format!("{}****{}", &phone[..4], &phone[phone.len() - 4..])
}

/// Validates that a ticket quantity is within the allowed range.
pub fn validate_ticket_quantity(quantity: i32) -> Result<(), ValidationError> {
    if (MIN_TICKET_QUANTITY..=MAX_TICKET_QUANTITY).contains(&quantity) {
        Ok(())
    } else {
        let mut err = ValidationError::new("quantity_range");
        err.message = Some(
            format!(
                "Quantity must be between {} and {}",
                MIN_TICKET_QUANTITY, MAX_TICKET_QUANTITY
            )
            .into(),
        );
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_local_and_international_forms_agree() {
        let local = normalize_phone_number("0712345678").unwrap();
        let international = normalize_phone_number("254712345678").unwrap();
        let plus = normalize_phone_number("+254712345678").unwrap();

        assert_eq!(local, "254712345678");
        assert_eq!(local, international);
        assert_eq!(local, plus);
    }

    #[test]
    fn test_bare_subscriber_number() {
        assert_eq!(normalize_phone_number("712345678").unwrap(), "254712345678");
    }

    #[test]
    fn test_carrier_prefix_one_accepted() {
        assert_eq!(normalize_phone_number("0112345678").unwrap(), "254112345678");
    }

    #[test]
    fn test_separators_ignored() {
        assert_eq!(
            normalize_phone_number(" +254 712-345-678 ").unwrap(),
            "254712345678"
        );
        assert_eq!(normalize_phone_number("(0712) 345 678").unwrap(), "254712345678");
    }

    #[test]
    fn test_eight_digits_rejected() {
        assert_eq!(
            normalize_phone_number("12345678"),
            Err(PhoneNumberError::InvalidFormat)
        );
    }

    #[test]
    fn test_wrong_country_code_rejected() {
        assert_eq!(
            normalize_phone_number("+255712345678"),
            Err(PhoneNumberError::InvalidFormat)
        );
    }

    #[test]
    fn test_landline_prefix_rejected() {
        assert_eq!(
            normalize_phone_number("0202345678"),
            Err(PhoneNumberError::InvalidFormat)
        );
    }

    #[test]
    fn test_too_long_rejected() {
        assert_eq!(
            normalize_phone_number("2547123456789"),
            Err(PhoneNumberError::InvalidFormat)
        );
    }

    #[test]
    fn test_empty_and_letters_rejected() {
        assert_eq!(normalize_phone_number("   "), Err(PhoneNumberError::Empty));
        assert_eq!(
            normalize_phone_number("07123abc78"),
            Err(PhoneNumberError::InvalidCharacters)
        );
    }

    #[test]
    fn test_mask_phone_number() {
        assert_eq!(mask_phone_number("254712345678"), "2547****5678");
        assert_eq!(mask_phone_number("short"), "****");
    }

    #[test]
    fn test_validate_ticket_quantity() {
        assert!(validate_ticket_quantity(1).is_ok());
        assert!(validate_ticket_quantity(10).is_ok());
        assert!(validate_ticket_quantity(0).is_err());
        assert!(validate_ticket_quantity(11).is_err());
        assert!(validate_ticket_quantity(-3).is_err());
    }

    proptest! {
        #[test]
        fn prop_all_forms_normalize_identically(prefix in prop::sample::select(vec!['7', '1']), rest in "[0-9]{8}") {
            let subscriber = format!("{prefix}{rest}");
            let expected = format!("254{subscriber}");

            prop_assert_eq!(normalize_phone_number(&format!("0{subscriber}")).unwrap(), expected.clone());
            prop_assert_eq!(normalize_phone_number(&format!("254{subscriber}")).unwrap(), expected.clone());
            prop_assert_eq!(normalize_phone_number(&format!("+254{subscriber}")).unwrap(), expected);
        }

        #[test]
        fn prop_short_digit_strings_rejected(digits in "[0-9]{1,8}") {
            prop_assert!(normalize_phone_number(&digits).is_err());
        }
    }
}
