//! Last-resort recovery of a record that fails even lenient validation.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::{migrate, rules, validate_record, InvalidRecord};
use crate::models::daily_log::{
    DailyLog, MealEntry, MealType, SnackEntry, SnackType, MAX_NOTES_LEN, MAX_TEXT_LEN,
};

const RECOVERED_MARKER: &str = "[recovered]";

/// Build a strictly valid record for `date` out of whatever `raw` holds.
///
/// Fields that fail the schema are reset to their defaults and their original
/// text is appended to `notes` under a `[recovered]` marker, so the day keeps
/// its content even when it cannot be trusted field by field. Returns the
/// record and the list of fields that were reset.
pub fn salvage(
    raw: &Value,
    date: NaiveDate,
    user_id: Option<String>,
    now: DateTime<Utc>,
) -> (DailyLog, Vec<String>) {
    let mut log = DailyLog::empty(date, user_id, now);
    let mut recovered: Vec<String> = Vec::new();

    let Some(obj) = raw.as_object() else {
        recovered.push(format!("record: {raw}"));
        return finish(log, recovered);
    };
    let mut obj = obj.clone();
    migrate::upgrade_raw(&mut obj, now);

    for meal in MealType::ALL {
        if let Some(v) = obj.get(meal.field_name()) {
            match serde_json::from_value::<MealEntry>(v.clone()) {
                Ok(entry) => *log.meal_mut(meal) = entry,
                Err(_) => recovered.push(format!("{}: {v}", meal.field_name())),
            }
        }
    }
    for snack in SnackType::ALL {
        if let Some(v) = obj.get(snack.field_name()) {
            match serde_json::from_value::<SnackEntry>(v.clone()) {
                Ok(entry) => *log.snack_mut(snack) = entry,
                Err(_) => recovered.push(format!("{}: {v}", snack.field_name())),
            }
        }
    }
    let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
    if let Some(v) = text("bowelMovements") {
        log.bowel_movements = v;
    }
    if let Some(v) = text("exercise") {
        log.exercise = v;
    }
    if let Some(v) = text("dailyWaterIntake") {
        log.daily_water_intake = v;
    }
    if let Some(v) = text("notes") {
        log.notes = v;
    }
    if let Some(v) = text("sleepHours") {
        log.sleep_hours = v;
    }
    if let Some(v) = obj.get("sleepQuality").and_then(Value::as_i64) {
        log.sleep_quality = v.clamp(0, 100) as i32;
        if v != i64::from(log.sleep_quality) {
            recovered.push(format!("sleepQuality: {v}"));
        }
    }
    let ts = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    };
    if let Some(created) = ts("createdAt") {
        log.created_at = created.min(now);
    }
    if let Some(id) = obj
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
    {
        log.id = Some(id);
    }
    log.updated_at = now;

    // Whatever the schema still rejects gets reset field by field.
    if let Err(InvalidRecord { errors }) = validate_record(log.clone()) {
        for error in errors {
            let path = error.split(':').next().unwrap_or_default().to_string();
            if let Some(old) = reset_field(&mut log, &path) {
                if !old.is_empty() {
                    recovered.push(format!("{path}: {old}"));
                }
            }
        }
    }
    finish(log, recovered)
}

fn finish(mut log: DailyLog, recovered: Vec<String>) -> (DailyLog, Vec<String>) {
    let fields: Vec<String> = recovered
        .iter()
        .map(|r| r.split(':').next().unwrap_or_default().to_string())
        .collect();
    for line in &recovered {
        append_note(&mut log.notes, line);
    }
    match validate_record(log.clone()) {
        Ok(valid) => (valid, fields),
        Err(e) => {
            tracing::error!(errors = ?e.errors, date = %log.date, "Salvaged record still invalid; keeping empty day");
            let empty = DailyLog::empty(log.date, log.user_id.clone(), log.updated_at);
            (empty, fields)
        }
    }
}

fn append_note(notes: &mut String, line: &str) {
    let cleaned = sanitize(line);
    let mut addition = format!("{RECOVERED_MARKER} {cleaned}");
    if !notes.is_empty() {
        addition.insert(0, '\n');
    }
    let room = (MAX_NOTES_LEN as usize).saturating_sub(notes.chars().count());
    notes.extend(addition.chars().take(room));
}

fn sanitize(text: &str) -> String {
    let mut out: String = text.chars().filter(|c| *c != '<' && *c != '>').collect();
    while rules::contains_markup_injection(&out) {
        out = out.replace(':', " ").replace('=', " ");
    }
    out
}

/// Reset the field at `path` to its default, returning the old text.
fn reset_field(log: &mut DailyLog, path: &str) -> Option<String> {
    let (parent, child) = match path.split_once('.') {
        Some((p, c)) => (p, Some(c)),
        None => (path, None),
    };

    if let Some(meal) = MealType::ALL.into_iter().find(|m| m.field_name() == parent) {
        let entry = log.meal_mut(meal);
        let slot = match child? {
            "time" => {
                return Some(std::mem::replace(&mut entry.time, meal.default_time().to_string()))
            }
            "meatDairy" => &mut entry.meat_dairy,
            "vegetablesFruits" => &mut entry.vegetables_fruits,
            "breadsCerealsGrains" => &mut entry.breads_cereals_grains,
            "fats" => &mut entry.fats,
            "candySweets" => &mut entry.candy_sweets,
            "waterIntake" => &mut entry.water_intake,
            "otherDrinks" => &mut entry.other_drinks,
            _ => return None,
        };
        return Some(take_bounded(slot));
    }
    if let Some(snack) = SnackType::ALL.into_iter().find(|s| s.field_name() == parent) {
        let entry = log.snack_mut(snack);
        return match child? {
            "time" => Some(std::mem::replace(&mut entry.time, snack.default_time().to_string())),
            "snack" => Some(take_bounded(&mut entry.snack)),
            _ => None,
        };
    }
    match parent {
        "bowelMovements" => Some(take_bounded(&mut log.bowel_movements)),
        "exercise" => Some(take_bounded(&mut log.exercise)),
        "dailyWaterIntake" => Some(std::mem::take(&mut log.daily_water_intake)),
        "sleepHours" => Some(std::mem::take(&mut log.sleep_hours)),
        "sleepQuality" => {
            let old = log.sleep_quality;
            log.sleep_quality = 0;
            Some(old.to_string())
        }
        "notes" => {
            let old = std::mem::take(&mut log.notes);
            log.notes = sanitize(&old).chars().take(MAX_NOTES_LEN as usize).collect();
            None
        }
        "updatedAt" => {
            log.updated_at = log.created_at.max(log.updated_at);
            None
        }
        _ => None,
    }
}

/// Over-long text is cut at the bound instead of dropped; the rest is returned.
fn take_bounded(slot: &mut String) -> String {
    let max = MAX_TEXT_LEN as usize;
    if slot.chars().count() > max {
        let rest: String = slot.chars().skip(max).collect();
        *slot = slot.chars().take(max).collect();
        rest
    } else {
        std::mem::take(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_salvage_keeps_good_fields_and_notes_bad_ones() {
        let raw = json!({
            "date": "2024-03-01",
            "breakfast": { "time": "7:30 AM", "meatDairy": "eggs", "waterIntake": "a lot" },
            "dailyWaterIntake": "500 l",
            "sleepQuality": 140,
            "exercise": "run",
        });
        let (log, fields) = salvage(&raw, day(), None, Utc::now());

        assert_eq!(log.breakfast.meat_dairy, "eggs");
        assert_eq!(log.breakfast.water_intake, "");
        assert_eq!(log.daily_water_intake, "");
        assert_eq!(log.sleep_quality, 100);
        assert_eq!(log.exercise, "run");
        assert!(log.notes.contains("[recovered] breakfast.waterIntake: a lot"));
        assert!(log.notes.contains("500 l"));
        assert!(fields.contains(&"sleepQuality".to_string()));
        assert!(crate::validation::validate_record(log).is_ok());
    }

    #[test]
    fn test_salvage_strips_markup_from_notes() {
        let raw = json!({ "date": "2024-03-01", "notes": "ok <script>alert(1)</script>" });
        let (log, _) = salvage(&raw, day(), None, Utc::now());
        assert!(!rules::contains_markup_injection(&log.notes));
        assert!(log.notes.starts_with("ok"));
    }

    #[test]
    fn test_salvage_of_non_object() {
        let (log, fields) = salvage(&json!([1, 2]), day(), Some("u".into()), Utc::now());
        assert_eq!(log.date, day());
        assert_eq!(fields, vec!["record".to_string()]);
        assert!(log.notes.contains("[1,2]"));
    }
}
