use std::fmt::Write;

use chrono::{NaiveDate, Utc};
use serde_json::{json, Value};

use crate::models::daily_log::{date_key, DailyLog, MealType, SnackType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Text,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" => Ok(ExportFormat::Text),
            other => Err(format!("unsupported export format '{other}'")),
        }
    }
}

/// JSON document of validated records for `[start, end]`.
pub fn to_json(logs: &[DailyLog], start: NaiveDate, end: NaiveDate) -> Value {
    json!({
        "exportedAt": Utc::now(),
        "startDate": date_key(start),
        "endDate": date_key(end),
        "count": logs.len(),
        "logs": logs,
    })
}

/// Plain-text report of validated records for `[start, end]`. Empty fields are
/// left out.
pub fn to_text(logs: &[DailyLog], start: NaiveDate, end: NaiveDate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Food Journal: {} to {}", date_key(start), date_key(end));
    let _ = writeln!(out, "{} day(s)", logs.len());

    for log in logs {
        let _ = writeln!(out);
        let _ = writeln!(out, "== {} ==", log.date.format("%A, %B %-d, %Y"));
        if log.is_empty_day() {
            let _ = writeln!(out, "(nothing recorded)");
            continue;
        }

        for meal in MealType::ALL {
            let entry = log.meal(meal);
            if entry.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{} ({})", title(meal.field_name()), entry.time);
            let fields = [
                ("Meat/Dairy", &entry.meat_dairy),
                ("Vegetables/Fruits", &entry.vegetables_fruits),
                ("Breads/Cereals/Grains", &entry.breads_cereals_grains),
                ("Fats", &entry.fats),
                ("Candy/Sweets", &entry.candy_sweets),
                ("Water", &entry.water_intake),
                ("Other drinks", &entry.other_drinks),
            ];
            for (label, value) in fields {
                if !value.is_empty() {
                    let _ = writeln!(out, "  {label}: {value}");
                }
            }
        }
        for snack in SnackType::ALL {
            let entry = log.snack(snack);
            if !entry.is_empty() {
                let _ = writeln!(out, "{} ({}): {}", title(snack.field_name()), entry.time, entry.snack);
            }
        }

        let health = [
            ("Bowel movements", log.bowel_movements.clone()),
            ("Exercise", log.exercise.clone()),
            ("Daily water", log.daily_water_intake.clone()),
            ("Sleep hours", log.sleep_hours.clone()),
            (
                "Sleep quality",
                if log.sleep_quality > 0 {
                    format!("{}%", log.sleep_quality)
                } else {
                    String::new()
                },
            ),
            ("Notes", log.notes.clone()),
        ];
        for (label, value) in health {
            if !value.is_empty() {
                let _ = writeln!(out, "{label}: {value}");
            }
        }
    }
    out
}

/// `midMorningSnack` -> `Mid Morning Snack`
fn title(field: &str) -> String {
    let mut out = String::new();
    for (i, c) in field.chars().enumerate() {
        if i == 0 {
            out.extend(c.to_uppercase());
        } else if c.is_uppercase() {
            out.push(' ');
            out.push(c);
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn sample() -> Vec<DailyLog> {
        let mut a = DailyLog::empty(day(1), None, Utc::now());
        a.breakfast.time = "7:30 AM".into();
        a.breakfast.meat_dairy = "eggs".into();
        a.nighttime_snack.snack = "tea".into();
        a.sleep_quality = 80;
        let b = DailyLog::empty(day(2), None, Utc::now());
        vec![a, b]
    }

    #[test]
    fn test_text_export() {
        let text = to_text(&sample(), day(1), day(2));
        assert!(text.starts_with("Food Journal: 2024-03-01 to 2024-03-02\n2 day(s)\n"));
        assert!(text.contains("== Friday, March 1, 2024 =="));
        assert!(text.contains("Breakfast (7:30 AM)\n  Meat/Dairy: eggs\n"));
        assert!(text.contains("Nighttime Snack (8:00 PM): tea"));
        assert!(text.contains("Sleep quality: 80%"));
        assert!(!text.contains("Lunch"));
        assert!(text.contains("(nothing recorded)"));
    }

    #[test]
    fn test_json_export() {
        let doc = to_json(&sample(), day(1), day(2));
        assert_eq!(doc["count"], 2);
        assert_eq!(doc["startDate"], "2024-03-01");
        assert_eq!(doc["logs"][0]["breakfast"]["meatDairy"], "eggs");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert_eq!("txt".parse::<ExportFormat>(), Ok(ExportFormat::Text));
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
