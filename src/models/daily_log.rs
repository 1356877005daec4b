use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::validation::rules::{validate_notes, validate_sleep_hours, validate_time, validate_water};

/// Upper bound for every free-text category field.
pub const MAX_TEXT_LEN: u64 = 1000;
/// Upper bound for the day's free-form notes.
pub const MAX_NOTES_LEN: u64 = 5000;

/// One meal of the day. Empty strings mean "not recorded".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct MealEntry {
    #[validate(custom = "validate_time")]
    pub time: String,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub meat_dairy: String,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub vegetables_fruits: String,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub breads_cereals_grains: String,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub fats: String,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub candy_sweets: String,
    #[validate(custom = "validate_water")]
    pub water_intake: String,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub other_drinks: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct SnackEntry {
    #[validate(custom = "validate_time")]
    pub time: String,
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub snack: String,
}

/// The record of one user-day. `(user_id or "local", date)` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DailyLog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub date: NaiveDate,

    #[validate]
    pub breakfast: MealEntry,
    #[validate]
    pub lunch: MealEntry,
    #[validate]
    pub dinner: MealEntry,

    #[validate]
    pub mid_morning_snack: SnackEntry,
    #[validate]
    pub mid_day_snack: SnackEntry,
    #[validate]
    pub nighttime_snack: SnackEntry,

    #[serde(default)]
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub bowel_movements: String,
    #[serde(default)]
    #[validate(length(max = 1000, message = "must be at most 1000 characters"))]
    pub exercise: String,
    #[serde(default)]
    #[validate(custom = "validate_water")]
    pub daily_water_intake: String,
    #[serde(default)]
    #[validate(
        length(max = 5000, message = "must be at most 5000 characters"),
        custom = "validate_notes"
    )]
    pub notes: String,

    #[serde(default)]
    #[validate(range(min = 0, max = 100, message = "must be a percentage between 0 and 100"))]
    pub sleep_quality: i32,
    #[serde(default)]
    #[validate(custom = "validate_sleep_hours")]
    pub sleep_hours: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SnackType {
    MidMorningSnack,
    MidDaySnack,
    NighttimeSnack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthMetric {
    BowelMovements,
    Exercise,
    DailyWaterIntake,
    Notes,
    SleepQuality,
    SleepHours,
}

impl MealType {
    pub const ALL: [MealType; 3] = [MealType::Breakfast, MealType::Lunch, MealType::Dinner];

    pub fn field_name(self) -> &'static str {
        match self {
            MealType::Breakfast => "breakfast",
            MealType::Lunch => "lunch",
            MealType::Dinner => "dinner",
        }
    }

    pub fn default_time(self) -> &'static str {
        match self {
            MealType::Breakfast => "8:00 AM",
            MealType::Lunch => "12:00 PM",
            MealType::Dinner => "6:00 PM",
        }
    }
}

impl SnackType {
    pub const ALL: [SnackType; 3] = [
        SnackType::MidMorningSnack,
        SnackType::MidDaySnack,
        SnackType::NighttimeSnack,
    ];

    pub fn field_name(self) -> &'static str {
        match self {
            SnackType::MidMorningSnack => "midMorningSnack",
            SnackType::MidDaySnack => "midDaySnack",
            SnackType::NighttimeSnack => "nighttimeSnack",
        }
    }

    pub fn default_time(self) -> &'static str {
        match self {
            SnackType::MidMorningSnack => "10:00 AM",
            SnackType::MidDaySnack => "3:00 PM",
            SnackType::NighttimeSnack => "8:00 PM",
        }
    }
}

impl HealthMetric {
    pub fn field_name(self) -> &'static str {
        match self {
            HealthMetric::BowelMovements => "bowelMovements",
            HealthMetric::Exercise => "exercise",
            HealthMetric::DailyWaterIntake => "dailyWaterIntake",
            HealthMetric::Notes => "notes",
            HealthMetric::SleepQuality => "sleepQuality",
            HealthMetric::SleepHours => "sleepHours",
        }
    }
}

impl MealEntry {
    pub fn empty(meal: MealType) -> Self {
        Self {
            time: meal.default_time().to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        [
            &self.meat_dairy,
            &self.vegetables_fruits,
            &self.breads_cereals_grains,
            &self.fats,
            &self.candy_sweets,
            &self.water_intake,
            &self.other_drinks,
        ]
        .iter()
        .all(|s| s.trim().is_empty())
    }
}

impl SnackEntry {
    pub fn empty(snack: SnackType) -> Self {
        Self {
            time: snack.default_time().to_string(),
            snack: String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.snack.trim().is_empty()
    }
}

impl DailyLog {
    /// The record conjured on first access to a date with no stored copy.
    pub fn empty(date: NaiveDate, user_id: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            user_id,
            date,
            breakfast: MealEntry::empty(MealType::Breakfast),
            lunch: MealEntry::empty(MealType::Lunch),
            dinner: MealEntry::empty(MealType::Dinner),
            mid_morning_snack: SnackEntry::empty(SnackType::MidMorningSnack),
            mid_day_snack: SnackEntry::empty(SnackType::MidDaySnack),
            nighttime_snack: SnackEntry::empty(SnackType::NighttimeSnack),
            bowel_movements: String::new(),
            exercise: String::new(),
            daily_water_intake: String::new(),
            notes: String::new(),
            sleep_quality: 0,
            sleep_hours: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn meal(&self, meal: MealType) -> &MealEntry {
        match meal {
            MealType::Breakfast => &self.breakfast,
            MealType::Lunch => &self.lunch,
            MealType::Dinner => &self.dinner,
        }
    }

    pub fn meal_mut(&mut self, meal: MealType) -> &mut MealEntry {
        match meal {
            MealType::Breakfast => &mut self.breakfast,
            MealType::Lunch => &mut self.lunch,
            MealType::Dinner => &mut self.dinner,
        }
    }

    pub fn snack(&self, snack: SnackType) -> &SnackEntry {
        match snack {
            SnackType::MidMorningSnack => &self.mid_morning_snack,
            SnackType::MidDaySnack => &self.mid_day_snack,
            SnackType::NighttimeSnack => &self.nighttime_snack,
        }
    }

    pub fn snack_mut(&mut self, snack: SnackType) -> &mut SnackEntry {
        match snack {
            SnackType::MidMorningSnack => &mut self.mid_morning_snack,
            SnackType::MidDaySnack => &mut self.mid_day_snack,
            SnackType::NighttimeSnack => &mut self.nighttime_snack,
        }
    }

    /// True when nothing has been recorded for the day. Still a valid record.
    pub fn is_empty_day(&self) -> bool {
        MealType::ALL.iter().all(|m| self.meal(*m).is_empty())
            && SnackType::ALL.iter().all(|s| self.snack(*s).is_empty())
            && self.bowel_movements.trim().is_empty()
            && self.exercise.trim().is_empty()
            && self.daily_water_intake.trim().is_empty()
            && self.notes.trim().is_empty()
            && self.sleep_quality == 0
            && self.sleep_hours.trim().is_empty()
    }

    /// Merge a partial update. Timestamps and identity are left to the caller.
    pub fn apply(&mut self, patch: &DailyLogPatch) {
        for meal in MealType::ALL {
            if let Some(p) = patch.meal(meal) {
                p.apply_to(self.meal_mut(meal));
            }
        }
        for snack in SnackType::ALL {
            if let Some(p) = patch.snack(snack) {
                p.apply_to(self.snack_mut(snack));
            }
        }
        if let Some(v) = &patch.bowel_movements {
            self.bowel_movements = v.clone();
        }
        if let Some(v) = &patch.exercise {
            self.exercise = v.clone();
        }
        if let Some(v) = &patch.daily_water_intake {
            self.daily_water_intake = v.clone();
        }
        if let Some(v) = &patch.notes {
            self.notes = v.clone();
        }
        if let Some(v) = patch.sleep_quality {
            self.sleep_quality = v;
        }
        if let Some(v) = &patch.sleep_hours {
            self.sleep_hours = v.clone();
        }
    }
}

/// Partial update of a meal; absent fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MealPatch {
    pub time: Option<String>,
    pub meat_dairy: Option<String>,
    pub vegetables_fruits: Option<String>,
    pub breads_cereals_grains: Option<String>,
    pub fats: Option<String>,
    pub candy_sweets: Option<String>,
    pub water_intake: Option<String>,
    pub other_drinks: Option<String>,
}

impl MealPatch {
    pub fn apply_to(&self, meal: &mut MealEntry) {
        let pairs: [(&Option<String>, &mut String); 8] = [
            (&self.time, &mut meal.time),
            (&self.meat_dairy, &mut meal.meat_dairy),
            (&self.vegetables_fruits, &mut meal.vegetables_fruits),
            (&self.breads_cereals_grains, &mut meal.breads_cereals_grains),
            (&self.fats, &mut meal.fats),
            (&self.candy_sweets, &mut meal.candy_sweets),
            (&self.water_intake, &mut meal.water_intake),
            (&self.other_drinks, &mut meal.other_drinks),
        ];
        for (value, slot) in pairs {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnackPatch {
    pub time: Option<String>,
    pub snack: Option<String>,
}

impl SnackPatch {
    pub fn apply_to(&self, entry: &mut SnackEntry) {
        if let Some(t) = &self.time {
            entry.time = t.clone();
        }
        if let Some(s) = &self.snack {
            entry.snack = s.clone();
        }
    }
}

/// The single shape of mutation accepted by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DailyLogPatch {
    pub breakfast: Option<MealPatch>,
    pub lunch: Option<MealPatch>,
    pub dinner: Option<MealPatch>,
    pub mid_morning_snack: Option<SnackPatch>,
    pub mid_day_snack: Option<SnackPatch>,
    pub nighttime_snack: Option<SnackPatch>,
    pub bowel_movements: Option<String>,
    pub exercise: Option<String>,
    pub daily_water_intake: Option<String>,
    pub notes: Option<String>,
    pub sleep_quality: Option<i32>,
    pub sleep_hours: Option<String>,
}

impl DailyLogPatch {
    pub fn for_meal(meal: MealType, patch: MealPatch) -> Self {
        let mut out = Self::default();
        match meal {
            MealType::Breakfast => out.breakfast = Some(patch),
            MealType::Lunch => out.lunch = Some(patch),
            MealType::Dinner => out.dinner = Some(patch),
        }
        out
    }

    pub fn for_snack(snack: SnackType, patch: SnackPatch) -> Self {
        let mut out = Self::default();
        match snack {
            SnackType::MidMorningSnack => out.mid_morning_snack = Some(patch),
            SnackType::MidDaySnack => out.mid_day_snack = Some(patch),
            SnackType::NighttimeSnack => out.nighttime_snack = Some(patch),
        }
        out
    }

    /// Build a patch for one health field. `sleepQuality` takes an integer,
    /// every other metric takes a string.
    pub fn for_metric(metric: HealthMetric, value: &serde_json::Value) -> Result<Self, String> {
        let mut out = Self::default();
        if metric == HealthMetric::SleepQuality {
            let v = value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                .ok_or_else(|| "sleepQuality: must be an integer".to_string())?;
            let v = i32::try_from(v).map_err(|_| "sleepQuality: out of range".to_string())?;
            out.sleep_quality = Some(v);
            return Ok(out);
        }

        let text = value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| format!("{}: must be a string", metric.field_name()))?;
        match metric {
            HealthMetric::BowelMovements => out.bowel_movements = Some(text),
            HealthMetric::Exercise => out.exercise = Some(text),
            HealthMetric::DailyWaterIntake => out.daily_water_intake = Some(text),
            HealthMetric::Notes => out.notes = Some(text),
            HealthMetric::SleepHours => out.sleep_hours = Some(text),
            HealthMetric::SleepQuality => unreachable!("handled above"),
        }
        Ok(out)
    }

    fn meal(&self, meal: MealType) -> Option<&MealPatch> {
        match meal {
            MealType::Breakfast => self.breakfast.as_ref(),
            MealType::Lunch => self.lunch.as_ref(),
            MealType::Dinner => self.dinner.as_ref(),
        }
    }

    fn snack(&self, snack: SnackType) -> Option<&SnackPatch> {
        match snack {
            SnackType::MidMorningSnack => self.mid_morning_snack.as_ref(),
            SnackType::MidDaySnack => self.mid_day_snack.as_ref(),
            SnackType::NighttimeSnack => self.nighttime_snack.as_ref(),
        }
    }
}

/// Canonical string key of a date: `YYYY-MM-DD`.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
