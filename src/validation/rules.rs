//! Field rules referenced from the `validator` derives on the record types.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use validator::ValidationError;

use super::quantity::{self, MAX_WATER_OZ};
use super::time;

fn error(code: &'static str, message: impl Into<Cow<'static, str>>) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn injection_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<\s*/?\s*(script|iframe|object|embed)\b|javascript\s*:|\bon(error|load|click|focus|blur|submit|change|input|mouse[a-z]*|key[a-z]*)\s*=")
            .expect("valid regex")
    })
}

/// Blank, or `H:MM AM/PM`.
pub fn validate_time(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() || time::is_canonical(value) {
        Ok(())
    } else {
        Err(error("time_format", "must be a time like 7:30 AM"))
    }
}

/// Blank, or a unit-bearing quantity of at most 300 oz.
pub fn validate_water(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Ok(());
    }
    match quantity::water_ounces(value) {
        None => Err(error(
            "water_format",
            "must be a quantity with a unit, e.g. 64 oz, 2000 ml, 2 L or 8 cups",
        )),
        Some(oz) if oz > MAX_WATER_OZ => Err(error(
            "water_range",
            format!("{oz:.0} oz is more than the {MAX_WATER_OZ:.0} oz daily limit"),
        )),
        Some(_) => Ok(()),
    }
}

/// Blank, or a duration of 0-24 hours.
pub fn validate_sleep_hours(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Ok(());
    }
    match quantity::sleep_hours(value) {
        Some(h) if (0.0..=24.0).contains(&h) => Ok(()),
        Some(_) => Err(error("sleep_hours_range", "must be between 0 and 24 hours")),
        None => Err(error("sleep_hours_format", "must look like 7h 30m or 7.5")),
    }
}

pub fn contains_markup_injection(value: &str) -> bool {
    injection_re().is_match(value)
}

pub fn validate_notes(value: &str) -> Result<(), ValidationError> {
    if contains_markup_injection(value) {
        Err(error("notes_markup", "must not contain script or markup"))
    } else {
        Ok(())
    }
}

/// Values 1-5 are the old five-point scale and must be migrated first.
pub fn validate_current_sleep_quality(value: i32) -> Result<(), ValidationError> {
    if (1..=5).contains(&value) {
        Err(error(
            "sleep_quality_legacy",
            "looks like a legacy 1-5 rating; expected a percentage",
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_rule() {
        assert!(validate_time("").is_ok());
        assert!(validate_time("7:30 AM").is_ok());
        assert!(validate_time("14:30").is_err());
    }

    #[test]
    fn test_water_rule() {
        assert!(validate_water("").is_ok());
        assert!(validate_water("2000 ml").is_ok());
        let err = validate_water("500 l").unwrap_err();
        assert_eq!(err.code, "water_range");
        let err = validate_water("64").unwrap_err();
        assert_eq!(err.code, "water_format");
    }

    #[test]
    fn test_notes_rule() {
        assert!(validate_notes("felt great after a walk").is_ok());
        assert!(validate_notes("<script>alert(1)</script>").is_err());
        assert!(validate_notes("<img src=x onerror=alert(1)>").is_err());
        assert!(validate_notes("JavaScript: void(0)").is_err());
        assert!(validate_notes("ate onions = lots").is_ok());
    }

    #[test]
    fn test_sleep_rules() {
        assert!(validate_sleep_hours("7h 30m").is_ok());
        assert!(validate_sleep_hours("30h").is_err());
        assert!(validate_current_sleep_quality(4).is_err());
        assert!(validate_current_sleep_quality(0).is_ok());
        assert!(validate_current_sleep_quality(80).is_ok());
    }
}
