//! Record schema enforcement.
//!
//! Two entry points:
//! - [`validate`] is strict and is what every user-originated write goes through.
//! - [`validate_and_migrate`] first upgrades legacy encodings and is used for
//!   every record read back from the remote store, the local backup, or a
//!   migration sweep.
//!
//! Neither drops data on its own: a failure is returned to the caller, which
//! either falls back to another source or keeps the raw record (see
//! [`salvage`]).

pub mod migrate;
pub mod quantity;
pub mod rules;
pub mod salvage;
pub mod time;

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;
use validator::{Validate, ValidationErrorsKind};

use crate::models::daily_log::{DailyLog, MealType, SnackType};

pub use migrate::{migrate_sleep_quality, FieldMigration};
pub use salvage::salvage;

/// Field-path messages for a rejected record, e.g. `breakfast.time: must be a time like 7:30 AM`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid food log: {}", .errors.join("; "))]
pub struct InvalidRecord {
    pub errors: Vec<String>,
}

impl InvalidRecord {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self {
            errors: vec![message.into()],
        }
    }
}

/// A record accepted by [`validate_and_migrate`] plus every rewrite that got it there.
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated {
    pub log: DailyLog,
    pub changes: Vec<FieldMigration>,
}

impl Migrated {
    pub fn was_migrated(&self) -> bool {
        !self.changes.is_empty()
    }
}

fn date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"))
}

/// `YYYY-MM-DD` and a real calendar day.
pub fn is_canonical_date(value: &str) -> bool {
    date_re().is_match(value) && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

pub fn parse_date_key(value: &str) -> Option<NaiveDate> {
    if is_canonical_date(value) {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
    } else {
        None
    }
}

/// Strict validation of an arbitrary JSON value claiming to be a food log.
pub fn validate(raw: &Value) -> Result<DailyLog, InvalidRecord> {
    let Some(obj) = raw.as_object() else {
        return Err(InvalidRecord::single("record: expected an object"));
    };

    let mut errors = Vec::new();
    match obj.get("date").and_then(Value::as_str) {
        Some(d) if is_canonical_date(d) => {}
        Some(d) => errors.push(format!("date: '{d}' is not a YYYY-MM-DD date")),
        None => errors.push("date: is required".to_string()),
    }
    for field in ["createdAt", "updatedAt"] {
        match obj.get(field).and_then(Value::as_str) {
            Some(ts) if DateTime::parse_from_rfc3339(ts).is_ok() => {}
            Some(_) => errors.push(format!("{field}: must be an ISO-8601 timestamp")),
            None => errors.push(format!("{field}: is required")),
        }
    }
    if !errors.is_empty() {
        return Err(InvalidRecord::new(errors));
    }

    let log: DailyLog = serde_json::from_value(raw.clone())
        .map_err(|e| InvalidRecord::single(format!("record: {e}")))?;
    validate_record(log)
}

/// Strict validation of a typed record, after normalizing times and trimming text.
pub fn validate_record(mut log: DailyLog) -> Result<DailyLog, InvalidRecord> {
    normalize(&mut log);

    let mut errors = schema_errors(&log);
    if let Err(e) = rules::validate_current_sleep_quality(log.sleep_quality) {
        errors.push(format!("sleepQuality: {}", message_of(&e)));
    }
    errors.extend(timestamp_errors(&log));

    if errors.is_empty() {
        Ok(log)
    } else {
        errors.sort();
        Err(InvalidRecord::new(errors))
    }
}

/// Lenient validation: upgrade legacy encodings, then apply the field rules.
///
/// Sleep quality is only range-checked here since the upgrade has already
/// mapped the five-point scale.
pub fn validate_and_migrate(raw: &Value) -> Result<Migrated, InvalidRecord> {
    validate_and_migrate_at(raw, Utc::now())
}

pub fn validate_and_migrate_at(raw: &Value, now: DateTime<Utc>) -> Result<Migrated, InvalidRecord> {
    let Some(obj) = raw.as_object() else {
        return Err(InvalidRecord::single("record: expected an object"));
    };
    let mut obj = obj.clone();
    let changes = migrate::upgrade_raw(&mut obj, now);

    match obj.get("date").and_then(Value::as_str) {
        Some(d) if is_canonical_date(d) => {}
        Some(d) => {
            return Err(InvalidRecord::single(format!(
                "date: '{d}' is not a YYYY-MM-DD date"
            )))
        }
        None => return Err(InvalidRecord::single("date: is required")),
    }

    let mut log: DailyLog = serde_json::from_value(Value::Object(obj))
        .map_err(|e| InvalidRecord::single(format!("record: {e}")))?;
    normalize(&mut log);

    let mut errors = schema_errors(&log);
    errors.extend(timestamp_errors(&log));
    if !errors.is_empty() {
        errors.sort();
        return Err(InvalidRecord::new(errors));
    }

    if changes.iter().any(|c| c.warning.is_some()) {
        tracing::warn!(date = %log.date, "Record migrated with guessed values");
    }
    Ok(Migrated { log, changes })
}

/// Trim free text and rewrite readable times into the canonical form.
/// Unreadable times are left as-is for the schema to reject.
fn normalize(log: &mut DailyLog) {
    for meal in MealType::ALL {
        let entry = log.meal_mut(meal);
        normalize_time(&mut entry.time);
        for text in [
            &mut entry.meat_dairy,
            &mut entry.vegetables_fruits,
            &mut entry.breads_cereals_grains,
            &mut entry.fats,
            &mut entry.candy_sweets,
            &mut entry.water_intake,
            &mut entry.other_drinks,
        ] {
            trim_in_place(text);
        }
    }
    for snack in SnackType::ALL {
        let entry = log.snack_mut(snack);
        normalize_time(&mut entry.time);
        trim_in_place(&mut entry.snack);
    }
    for text in [
        &mut log.bowel_movements,
        &mut log.exercise,
        &mut log.daily_water_intake,
        &mut log.notes,
        &mut log.sleep_hours,
    ] {
        trim_in_place(text);
    }
}

fn normalize_time(value: &mut String) {
    if let Some(t) = time::normalize(value) {
        *value = t;
    }
}

fn trim_in_place(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn schema_errors(log: &DailyLog) -> Vec<String> {
    let mut out = Vec::new();
    if let Err(errs) = log.validate() {
        flatten("", &errs, &mut out);
    }
    out
}

fn timestamp_errors(log: &DailyLog) -> Vec<String> {
    if log.updated_at < log.created_at {
        vec!["updatedAt: must not be earlier than createdAt".to_string()]
    } else {
        Vec::new()
    }
}

fn message_of(err: &validator::ValidationError) -> String {
    err.message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string())
}

fn flatten(prefix: &str, errors: &validator::ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let name = camel_case(field);
        let path = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}.{name}")
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for e in errs {
                    out.push(format!("{path}: {}", message_of(e)));
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (i, inner) in items {
                    flatten(&format!("{path}[{i}]"), inner, out);
                }
            }
        }
    }
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_log() -> DailyLog {
        let mut log = DailyLog::empty(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            Some("user-1".into()),
            Utc::now(),
        );
        log.breakfast.meat_dairy = "eggs".into();
        log.breakfast.water_intake = "12 oz".into();
        log.daily_water_intake = "2000 ml".into();
        log.sleep_quality = 75;
        log.sleep_hours = "7h 30m".into();
        log.notes = "slept well".into();
        log
    }

    #[test]
    fn test_strict_round_trip() {
        let log = valid_log();
        let raw = serde_json::to_value(&log).unwrap();
        assert_eq!(validate(&raw).unwrap(), log);
    }

    #[test]
    fn test_lenient_is_noop_on_current_records() {
        let log = valid_log();
        let raw = serde_json::to_value(&log).unwrap();
        let migrated = validate_and_migrate(&raw).unwrap();
        assert_eq!(migrated.log, log);
        assert!(!migrated.was_migrated());
    }

    #[test]
    fn test_strict_normalizes_times() {
        let mut raw = serde_json::to_value(valid_log()).unwrap();
        raw["lunch"]["time"] = json!("14:30");
        raw["breakfast"]["time"] = json!("9:05");
        let log = validate(&raw).unwrap();
        assert_eq!(log.lunch.time, "2:30 PM");
        assert_eq!(log.breakfast.time, "9:05 AM");
    }

    #[test]
    fn test_strict_rejects_bad_fields() {
        let mut raw = serde_json::to_value(valid_log()).unwrap();
        raw["dinner"]["time"] = json!("13:61");
        raw["dailyWaterIntake"] = json!("500 l");
        raw["notes"] = json!("<script>alert(1)</script>");
        raw["sleepQuality"] = json!(101);
        let err = validate(&raw).unwrap_err();
        let joined = err.errors.join("\n");
        assert!(joined.contains("dinner.time"), "{joined}");
        assert!(joined.contains("dailyWaterIntake"), "{joined}");
        assert!(joined.contains("notes"), "{joined}");
        assert!(joined.contains("sleepQuality"), "{joined}");
    }

    #[test]
    fn test_strict_rejects_legacy_sleep_scale() {
        let mut raw = serde_json::to_value(valid_log()).unwrap();
        raw["sleepQuality"] = json!(4);
        let err = validate(&raw).unwrap_err();
        assert!(err.errors[0].starts_with("sleepQuality"));
    }

    #[test]
    fn test_strict_requires_date_and_timestamps() {
        let err = validate(&json!({ "date": "2024-3-1" })).unwrap_err();
        assert_eq!(err.errors.len(), 3);
        assert!(err.errors[0].starts_with("date"));
        assert!(validate(&json!("not an object")).is_err());
    }

    #[test]
    fn test_water_limits() {
        let mut raw = serde_json::to_value(valid_log()).unwrap();
        raw["dailyWaterIntake"] = json!("2000 ml");
        assert!(validate(&raw).is_ok());
        raw["dailyWaterIntake"] = json!("500 l");
        assert!(validate(&raw).is_err());
    }

    #[test]
    fn test_lenient_migrates_legacy_sleep() {
        let mut raw = serde_json::to_value(valid_log()).unwrap();
        raw["sleepQuality"] = json!(3);
        let migrated = validate_and_migrate(&raw).unwrap();
        assert_eq!(migrated.log.sleep_quality, 60);
        assert!(migrated.was_migrated());
    }

    #[test]
    fn test_lenient_keeps_seven_as_percentage() {
        let mut raw = serde_json::to_value(valid_log()).unwrap();
        raw["sleepQuality"] = json!(7);
        let migrated = validate_and_migrate(&raw).unwrap();
        assert_eq!(migrated.log.sleep_quality, 7);
        assert_eq!(migrated.log.breakfast.meat_dairy, "eggs");
    }

    #[test]
    fn test_lenient_fills_legacy_gaps() {
        let raw = json!({
            "date": "2024-03-01",
            "sleepQuality": 2,
            "breakfast": { "time": "13:61", "meatDairy": "bacon" },
        });
        let migrated = validate_and_migrate(&raw).unwrap();
        assert_eq!(migrated.log.sleep_quality, 40);
        assert_eq!(migrated.log.breakfast.time, "12:00 PM");
        assert_eq!(migrated.log.breakfast.meat_dairy, "bacon");
        assert_eq!(migrated.log.lunch.time, "12:00 PM");
        assert_eq!(migrated.log.dinner.time, "6:00 PM");
    }

    #[test]
    fn test_lenient_still_rejects_out_of_range() {
        let mut raw = serde_json::to_value(valid_log()).unwrap();
        raw["sleepQuality"] = json!(140);
        assert!(validate_and_migrate(&raw).is_err());
    }

    #[test]
    fn test_camel_case_paths() {
        assert_eq!(camel_case("mid_morning_snack"), "midMorningSnack");
        assert_eq!(camel_case("notes"), "notes");
    }
}
