use serde::Serialize;

use crate::models::daily_log::{DailyLog, MealEntry, MealType, SnackType};
use crate::validation::time::minutes_of_day;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Meal,
    Snack,
    Water,
    Exercise,
    Sleep,
}

impl EntryKind {
    /// Display time for entries that carry no time of their own.
    fn default_time(self) -> &'static str {
        match self {
            EntryKind::Meal | EntryKind::Snack => "12:00 PM",
            EntryKind::Water => "8:00 PM",
            EntryKind::Exercise => "5:00 PM",
            EntryKind::Sleep => "10:00 PM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub kind: EntryKind,
    pub label: String,
    pub time: String,
    pub detail: String,
}

/// The day's non-empty fields as display entries in chronological order.
/// Entries with the same time keep their field order.
pub fn build(log: &DailyLog) -> Vec<TimelineEntry> {
    let mut entries = Vec::new();

    for meal in MealType::ALL {
        let entry = log.meal(meal);
        if entry.is_empty() {
            continue;
        }
        entries.push(TimelineEntry {
            kind: EntryKind::Meal,
            label: meal.field_name().to_string(),
            time: time_or(&entry.time, meal.default_time()),
            detail: meal_detail(entry),
        });
    }
    for snack in SnackType::ALL {
        let entry = log.snack(snack);
        if entry.is_empty() {
            continue;
        }
        entries.push(TimelineEntry {
            kind: EntryKind::Snack,
            label: snack.field_name().to_string(),
            time: time_or(&entry.time, snack.default_time()),
            detail: entry.snack.clone(),
        });
    }

    let day_fields = [
        (EntryKind::Water, "dailyWaterIntake", log.daily_water_intake.clone()),
        (EntryKind::Exercise, "exercise", log.exercise.clone()),
        (EntryKind::Sleep, "sleep", sleep_detail(log)),
    ];
    for (kind, label, detail) in day_fields {
        if detail.is_empty() {
            continue;
        }
        entries.push(TimelineEntry {
            kind,
            label: label.to_string(),
            time: kind.default_time().to_string(),
            detail,
        });
    }

    // Vec::sort_by_key is stable.
    entries.sort_by_key(|e| minutes_of_day(&e.time).unwrap_or(u32::MAX));
    entries
}

fn time_or(time: &str, default: &str) -> String {
    if time.trim().is_empty() {
        default.to_string()
    } else {
        time.to_string()
    }
}

fn meal_detail(entry: &MealEntry) -> String {
    [
        &entry.meat_dairy,
        &entry.vegetables_fruits,
        &entry.breads_cereals_grains,
        &entry.fats,
        &entry.candy_sweets,
        &entry.water_intake,
        &entry.other_drinks,
    ]
    .iter()
    .filter(|s| !s.trim().is_empty())
    .map(|s| s.trim())
    .collect::<Vec<_>>()
    .join(", ")
}

fn sleep_detail(log: &DailyLog) -> String {
    match (log.sleep_hours.trim(), log.sleep_quality) {
        ("", 0) => String::new(),
        ("", q) => format!("quality {q}%"),
        (h, 0) => h.to_string(),
        (h, q) => format!("{h}, quality {q}%"),
    }
}
