use serde_json::Value;

use crate::models::daily_log::DailyLog;

/// Identity and bookkeeping fields; never reported as user edits.
const SKIPPED: [&str; 5] = ["id", "userId", "date", "createdAt", "updatedAt"];

/// A changed leaf field, `breakfast.meatDairy` style.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Leaf-level differences between two versions of a record.
pub fn changed_fields(before: &DailyLog, after: &DailyLog) -> Vec<FieldChange> {
    let (Ok(Value::Object(old)), Ok(Value::Object(new))) =
        (serde_json::to_value(before), serde_json::to_value(after))
    else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (key, new_value) in &new {
        if SKIPPED.contains(&key.as_str()) {
            continue;
        }
        let old_value = old.get(key).cloned().unwrap_or(Value::Null);
        match (&old_value, new_value) {
            (Value::Object(o), Value::Object(n)) => {
                for (sub, n_val) in n {
                    let o_val = o.get(sub).cloned().unwrap_or(Value::Null);
                    if &o_val != n_val {
                        out.push(FieldChange {
                            field: format!("{key}.{sub}"),
                            old_value: o_val,
                            new_value: n_val.clone(),
                        });
                    }
                }
            }
            (o, n) if o != n => out.push(FieldChange {
                field: key.clone(),
                old_value: o.clone(),
                new_value: n.clone(),
            }),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    #[test]
    fn test_reports_leaf_changes_only() {
        let before = DailyLog::empty(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), None, Utc::now());
        let mut after = before.clone();
        after.breakfast.meat_dairy = "eggs".into();
        after.sleep_quality = 80;
        after.updated_at = Utc::now();

        let mut changes = changed_fields(&before, &after);
        changes.sort_by(|a, b| a.field.cmp(&b.field));
        let fields: Vec<_> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["breakfast.meatDairy", "sleepQuality"]);
        assert_eq!(changes[1].old_value, 0);
        assert_eq!(changes[1].new_value, 80);
    }

    #[test]
    fn test_identical_records_have_no_changes() {
        let log = DailyLog::empty(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), None, Utc::now());
        assert!(changed_fields(&log, &log.clone()).is_empty());
    }
}
