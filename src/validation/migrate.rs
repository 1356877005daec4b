//! Upgrades for historical record encodings.
//!
//! Everything here works on the raw JSON shape so it can run before the typed
//! record is deserialized. Each rule reports what it changed as a
//! [`FieldMigration`]; nothing is changed silently.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::time::{self, LegacyTime};
use crate::models::daily_log::{MealEntry, MealType, SnackEntry, SnackType};

/// Map an old five-point sleep rating onto the percentage scale.
///
/// Idempotent: values above 5 are already percentages and pass through.
pub fn migrate_sleep_quality(old: f64) -> f64 {
    if old.is_nan() || old <= 0.0 {
        0.0
    } else if old > 100.0 {
        old
    } else if old <= 5.0 {
        old * 20.0
    } else {
        old
    }
}

/// One field rewritten by a migration rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMigration {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    /// Set when the new value is a guess or a fallback that a person should check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl FieldMigration {
    fn new(field: impl Into<String>, old_value: Value, new_value: Value) -> Self {
        Self {
            field: field.into(),
            old_value,
            new_value,
            warning: None,
        }
    }

    fn warn(mut self, warning: impl Into<String>) -> Self {
        self.warning = Some(warning.into());
        self
    }
}

const TEXT_FIELDS: [&str; 5] = [
    "bowelMovements",
    "exercise",
    "dailyWaterIntake",
    "notes",
    "sleepHours",
];

const MEAL_TEXT_FIELDS: [&str; 7] = [
    "meatDairy",
    "vegetablesFruits",
    "breadsCerealsGrains",
    "fats",
    "candySweets",
    "waterIntake",
    "otherDrinks",
];

/// Rewrite a raw record object in place into the current encoding.
pub fn upgrade_raw(record: &mut Map<String, Value>, now: DateTime<Utc>) -> Vec<FieldMigration> {
    let mut changes = Vec::new();

    upgrade_sleep_quality(record, &mut changes);
    upgrade_timestamps(record, now, &mut changes);
    upgrade_date(record, &mut changes);

    for meal in MealType::ALL {
        upgrade_meal(record, meal, &mut changes);
    }
    for snack in SnackType::ALL {
        upgrade_snack(record, snack, &mut changes);
    }
    for field in TEXT_FIELDS {
        coerce_text(record, field, field, &mut changes);
    }

    changes
}

fn upgrade_sleep_quality(record: &mut Map<String, Value>, changes: &mut Vec<FieldMigration>) {
    let old = record.get("sleepQuality").cloned().unwrap_or(Value::Null);
    let numeric = match &old {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Null => Some(0.0),
        _ => None,
    };
    let Some(numeric) = numeric else {
        // Left for validation to reject.
        return;
    };

    let migrated = migrate_sleep_quality(numeric).round() as i64;
    let new = Value::from(migrated);
    if old != new {
        if (0.0..=5.0).contains(&numeric) && numeric > 0.0 {
            tracing::info!(from = numeric, to = migrated, "Converted legacy sleep quality");
        }
        changes.push(FieldMigration::new("sleepQuality", old, new.clone()));
        record.insert("sleepQuality".into(), new);
    }
}

fn upgrade_timestamps(
    record: &mut Map<String, Value>,
    now: DateTime<Utc>,
    changes: &mut Vec<FieldMigration>,
) {
    for field in ["createdAt", "updatedAt"] {
        let old = record.get(field).cloned().unwrap_or(Value::Null);
        let valid = old
            .as_str()
            .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok());
        if !valid {
            let new = Value::String(now.to_rfc3339());
            changes.push(FieldMigration::new(field, old, new.clone()));
            record.insert(field.into(), new);
        }
    }
}

fn upgrade_date(record: &mut Map<String, Value>, changes: &mut Vec<FieldMigration>) {
    let Some(raw) = record.get("date").and_then(Value::as_str).map(str::to_string) else {
        return;
    };
    if super::is_canonical_date(&raw) {
        return;
    }
    // Full timestamps and unpadded dates from older exports.
    let parsed = DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok());
    if let Some(date) = parsed {
        let new = Value::String(date.format("%Y-%m-%d").to_string());
        changes.push(FieldMigration::new("date", Value::String(raw), new.clone()));
        record.insert("date".into(), new);
    }
}

fn upgrade_meal(record: &mut Map<String, Value>, meal: MealType, changes: &mut Vec<FieldMigration>) {
    let key = meal.field_name();
    if !record.get(key).is_some_and(Value::is_object) {
        let old = record.get(key).cloned().unwrap_or(Value::Null);
        let new = serde_json::to_value(MealEntry::empty(meal)).unwrap_or(Value::Null);
        changes.push(FieldMigration::new(key, old, new.clone()));
        record.insert(key.into(), new);
        return;
    }
    if let Some(Value::Object(entry)) = record.get_mut(key) {
        upgrade_entry_time(entry, key, changes);
        for field in MEAL_TEXT_FIELDS {
            coerce_text(entry, field, &format!("{key}.{field}"), changes);
        }
    }
}

fn upgrade_snack(
    record: &mut Map<String, Value>,
    snack: SnackType,
    changes: &mut Vec<FieldMigration>,
) {
    let key = snack.field_name();
    match record.get(key) {
        Some(Value::Object(_)) => {}
        // Very old records stored the snack as a bare string.
        Some(Value::String(text)) => {
            let mut entry = SnackEntry::empty(snack);
            entry.snack = text.clone();
            let old = Value::String(text.clone());
            let new = serde_json::to_value(entry).unwrap_or(Value::Null);
            changes.push(FieldMigration::new(key, old, new.clone()));
            record.insert(key.into(), new);
            return;
        }
        other => {
            let old = other.cloned().unwrap_or(Value::Null);
            let new = serde_json::to_value(SnackEntry::empty(snack)).unwrap_or(Value::Null);
            changes.push(FieldMigration::new(key, old, new.clone()));
            record.insert(key.into(), new);
            return;
        }
    }
    if let Some(Value::Object(entry)) = record.get_mut(key) {
        upgrade_entry_time(entry, key, changes);
        coerce_text(entry, "snack", &format!("{key}.snack"), changes);
    }
}

fn upgrade_entry_time(entry: &mut Map<String, Value>, parent: &str, changes: &mut Vec<FieldMigration>) {
    let path = format!("{parent}.time");
    let old = entry.get("time").cloned().unwrap_or(Value::Null);
    let raw = match &old {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if time::is_canonical(&raw) || raw.is_empty() && old.is_string() {
        return;
    }

    let (new, warning) = match time::migrate_legacy(&raw) {
        LegacyTime::Exact(t) => (t, None),
        LegacyTime::Guessed(t) => {
            tracing::warn!(field = %path, from = %raw, to = %t, "Guessed meridiem for legacy time");
            let w = format!("meridiem guessed for '{raw}'; confirm {t}");
            (t, Some(w))
        }
        LegacyTime::Fallback => {
            tracing::warn!(field = %path, from = %raw, "Unreadable time replaced with default");
            let w = format!("unreadable time '{raw}' replaced with {}", time::FALLBACK_TIME);
            (time::FALLBACK_TIME.to_string(), Some(w))
        }
    };
    let new = Value::String(new);
    if new != old {
        let mut change = FieldMigration::new(path, old, new.clone());
        if let Some(w) = warning {
            change = change.warn(w);
        }
        changes.push(change);
        entry.insert("time".into(), new);
    }
}

/// Numbers and booleans in text fields become strings; null becomes blank.
fn coerce_text(
    obj: &mut Map<String, Value>,
    field: &str,
    path: &str,
    changes: &mut Vec<FieldMigration>,
) {
    let new = match obj.get(field) {
        None | Some(Value::String(_)) => return,
        Some(Value::Null) => Value::String(String::new()),
        Some(Value::Number(n)) => Value::String(n.to_string()),
        Some(Value::Bool(b)) => Value::String(b.to_string()),
        Some(_) => return,
    };
    let old = obj.insert(field.into(), new.clone()).unwrap_or(Value::Null);
    changes.push(FieldMigration::new(path, old, new));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sleep_quality_rules() {
        assert_eq!(migrate_sleep_quality(3.0), 60.0);
        assert_eq!(migrate_sleep_quality(60.0), 60.0);
        assert_eq!(migrate_sleep_quality(0.0), 0.0);
        assert_eq!(migrate_sleep_quality(-4.0), 0.0);
        assert_eq!(migrate_sleep_quality(5.0), 100.0);
        assert_eq!(migrate_sleep_quality(7.0), 7.0);
        assert_eq!(migrate_sleep_quality(140.0), 140.0);
    }

    #[test]
    fn test_sleep_quality_idempotent() {
        let mut x = 0.0;
        while x <= 100.0 {
            let once = migrate_sleep_quality(x);
            assert_eq!(migrate_sleep_quality(once), once, "not idempotent at {x}");
            x += 0.5;
        }
    }

    #[test]
    fn test_upgrade_fills_missing_structure() {
        let now = Utc::now();
        let mut raw = json!({ "date": "2024-03-01", "sleepQuality": 4 })
            .as_object()
            .cloned()
            .unwrap();
        let changes = upgrade_raw(&mut raw, now);

        assert_eq!(raw["sleepQuality"], 80);
        assert_eq!(raw["breakfast"]["time"], "8:00 AM");
        assert_eq!(raw["nighttimeSnack"]["time"], "8:00 PM");
        assert_eq!(raw["createdAt"], now.to_rfc3339());
        assert!(changes.iter().any(|c| c.field == "sleepQuality"));
        assert!(changes.iter().any(|c| c.field == "updatedAt"));
    }

    #[test]
    fn test_upgrade_times_and_text() {
        let mut raw = json!({
            "date": "2024-03-01T00:00:00Z",
            "breakfast": { "time": "13:61", "meatDairy": null },
            "lunch": { "time": "14:30", "fats": 2 },
            "dinner": { "time": "6:15" },
            "midDaySnack": "apple",
        })
        .as_object()
        .cloned()
        .unwrap();
        let changes = upgrade_raw(&mut raw, Utc::now());

        assert_eq!(raw["date"], "2024-03-01");
        assert_eq!(raw["breakfast"]["time"], "12:00 PM");
        assert_eq!(raw["breakfast"]["meatDairy"], "");
        assert_eq!(raw["lunch"]["time"], "2:30 PM");
        assert_eq!(raw["lunch"]["fats"], "2");
        assert_eq!(raw["dinner"]["time"], "6:15 AM");
        assert_eq!(raw["midDaySnack"]["snack"], "apple");

        let guessed = changes.iter().find(|c| c.field == "dinner.time").unwrap();
        assert!(guessed.warning.is_some());
        let fallback = changes.iter().find(|c| c.field == "breakfast.time").unwrap();
        assert!(fallback.warning.as_deref().unwrap().contains("unreadable"));
    }

    #[test]
    fn test_current_record_is_untouched() {
        let now = Utc::now();
        let log = crate::models::daily_log::DailyLog::empty(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            None,
            now,
        );
        let mut raw = serde_json::to_value(&log).unwrap().as_object().cloned().unwrap();
        let changes = upgrade_raw(&mut raw, now);
        assert!(changes.is_empty(), "unexpected changes: {changes:?}");
    }
}
