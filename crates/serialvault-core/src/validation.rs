//! Identifier validation for model names and device serial numbers.
//!
//! Model names are lowercase ASCII letters, digits and hyphens. Serial
//! numbers keep their case (manufacturers print them in upper case) but are
//! restricted to a conservative ASCII set so they can be embedded in an
//! assertion payload and a log line without escaping.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static MODEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").expect("static regex is valid"));

/// Maximum accepted length of a serial number.
pub const MAX_SERIAL_LEN: usize = 128;

/// Why an identifier was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Name must not be empty")]
    EmptyName,

    #[error("Name must not contain uppercase characters")]
    UppercaseName,

    #[error("Name contains invalid characters")]
    InvalidName,

    #[error("Serial number must not be empty")]
    EmptySerial,

    #[error("Serial number contains invalid characters")]
    InvalidSerial,

    #[error("Serial number is longer than {MAX_SERIAL_LEN} characters")]
    SerialTooLong,
}

/// Validate a model name: non-empty, no uppercase, only `[a-z0-9-]`.
///
/// The checks run in that order so the error names the most specific
/// problem: `"My_Model"` is reported as uppercase, not as invalid.
pub fn validate_model_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    if name.chars().any(char::is_uppercase) {
        return Err(ValidationError::UppercaseName);
    }
    if !MODEL_NAME.is_match(name) {
        return Err(ValidationError::InvalidName);
    }
    Ok(())
}

/// Validate a device serial number.
pub fn validate_serial_number(serial: &str) -> Result<(), ValidationError> {
    if serial.is_empty() {
        return Err(ValidationError::EmptySerial);
    }
    if serial.len() > MAX_SERIAL_LEN {
        return Err(ValidationError::SerialTooLong);
    }
    if !serial
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(ValidationError::InvalidSerial);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lowercase_digits_and_hyphens() {
        for name in ["my-model-01", "router-3400", "a", "0", "x-", "-x", "a--b"] {
            assert_eq!(validate_model_name(name), Ok(()), "{name}");
        }
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = validate_model_name("").unwrap_err();
        assert_eq!(err, ValidationError::EmptyName);
        assert_eq!(err.to_string(), "Name must not be empty");
    }

    #[test]
    fn uppercase_name_is_rejected() {
        let err = validate_model_name("my-Model-01").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Name must not contain uppercase characters"
        );
        assert_eq!(
            validate_model_name("My-Model"),
            Err(ValidationError::UppercaseName)
        );
    }

    #[test]
    fn uppercase_wins_over_invalid_characters() {
        assert_eq!(
            validate_model_name("My_Model"),
            Err(ValidationError::UppercaseName)
        );
    }

    #[test]
    fn invalid_characters_are_rejected() {
        for name in ["my-model-01_", "my_model", "my model", "model.v2", "módel"] {
            let err = validate_model_name(name).unwrap_err().to_string();
            assert!(
                err.contains("Name contains invalid characters"),
                "{name}: {err}"
            );
        }
    }

    #[test]
    fn non_ascii_uppercase_counts_as_uppercase() {
        assert_eq!(
            validate_model_name("ÄBC"),
            Err(ValidationError::UppercaseName)
        );
    }

    #[test]
    fn serial_numbers_keep_case() {
        assert_eq!(validate_serial_number("A1"), Ok(()));
        assert_eq!(validate_serial_number("SN-2019.04_x"), Ok(()));
    }

    #[test]
    fn serial_number_rules() {
        assert_eq!(
            validate_serial_number(""),
            Err(ValidationError::EmptySerial)
        );
        assert_eq!(
            validate_serial_number("A 1"),
            Err(ValidationError::InvalidSerial)
        );
        assert_eq!(
            validate_serial_number("A1/../etc"),
            Err(ValidationError::InvalidSerial)
        );
        let long = "a".repeat(MAX_SERIAL_LEN + 1);
        assert_eq!(
            validate_serial_number(&long),
            Err(ValidationError::SerialTooLong)
        );
    }
}
