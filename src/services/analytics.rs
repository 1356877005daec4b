use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::models::daily_log::{DailyLog, MealType, SnackType};
use crate::validation::quantity;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MealDistribution {
    pub breakfast: usize,
    pub lunch: usize,
    pub dinner: usize,
    pub snacks: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub days_logged: usize,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub meals: MealDistribution,
    pub average_water_oz: Option<f64>,
    pub average_sleep_quality: Option<f64>,
    pub average_sleep_hours: Option<f64>,
}

/// Fold a window of records into summary figures. Empty days are ignored.
pub fn summarize(logs: &[DailyLog], today: NaiveDate) -> Analytics {
    let mut dates: Vec<NaiveDate> = logs
        .iter()
        .filter(|l| !l.is_empty_day())
        .map(|l| l.date)
        .collect();
    dates.sort();
    dates.dedup();

    let (current_streak, longest_streak) = streaks(&dates, today);

    let mut meals = MealDistribution::default();
    let mut water = Vec::new();
    let mut sleep_quality = Vec::new();
    let mut sleep_hours = Vec::new();

    for log in logs {
        for meal in MealType::ALL {
            if !log.meal(meal).is_empty() {
                match meal {
                    MealType::Breakfast => meals.breakfast += 1,
                    MealType::Lunch => meals.lunch += 1,
                    MealType::Dinner => meals.dinner += 1,
                }
            }
        }
        meals.snacks += SnackType::ALL
            .iter()
            .filter(|s| !log.snack(**s).is_empty())
            .count();

        if let Some(oz) = water_of(log) {
            water.push(oz);
        }
        if log.sleep_quality > 0 {
            sleep_quality.push(f64::from(log.sleep_quality));
        }
        if let Some(h) = quantity::sleep_hours(&log.sleep_hours) {
            sleep_hours.push(h);
        }
    }

    Analytics {
        days_logged: dates.len(),
        current_streak,
        longest_streak,
        meals,
        average_water_oz: average(&water),
        average_sleep_quality: average(&sleep_quality),
        average_sleep_hours: average(&sleep_hours),
    }
}

/// The day total when recorded, otherwise the sum over meals.
fn water_of(log: &DailyLog) -> Option<f64> {
    if let Some(total) = quantity::water_ounces(&log.daily_water_intake) {
        return Some(total);
    }
    let per_meal: Vec<f64> = MealType::ALL
        .iter()
        .filter_map(|m| quantity::water_ounces(&log.meal(*m).water_intake))
        .collect();
    if per_meal.is_empty() {
        None
    } else {
        Some(per_meal.iter().sum())
    }
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    Some((mean * 10.0).round() / 10.0)
}

/// Current streak counts back from today, or from yesterday when today has
/// nothing yet. `dates` must be ascending and unique.
fn streaks(dates: &[NaiveDate], today: NaiveDate) -> (u32, u32) {
    let mut check_date = if dates.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };
    let mut current = 0u32;
    for date in dates.iter().rev() {
        if *date == check_date {
            current += 1;
            check_date -= Duration::days(1);
        } else if *date < check_date {
            break;
        }
    }

    let mut longest = 0u32;
    let mut streak = 0u32;
    let mut prev: Option<NaiveDate> = None;
    for date in dates {
        streak = match prev {
            Some(p) if *date == p + Duration::days(1) => streak + 1,
            _ => 1,
        };
        longest = longest.max(streak);
        prev = Some(*date);
    }
    (current, longest)
}
