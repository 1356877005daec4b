use std::sync::OnceLock;

use regex::Regex;

/// Largest daily water quantity accepted, in US fluid ounces.
pub const MAX_WATER_OZ: f64 = 300.0;

const OZ_PER_ML: f64 = 0.033814;
const OZ_PER_LITER: f64 = 33.814;
const OZ_PER_CUP: f64 = 8.0;

fn water_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(\d+(?:\.\d+)?)\s*(fl\.?\s*oz|oz|ounces?|ml|milliliters?|millilitres?|l|liters?|litres?|cups?)\.?$",
        )
        .expect("valid regex")
    })
}

fn sleep_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:(\d+(?:\.\d+)?)\s*h(?:ours?|rs?)?)?\s*(?:(\d+)\s*m(?:in(?:utes?|s)?)?)?$")
            .expect("valid regex")
    })
}

/// Parse a water quantity such as `64 oz`, `2000 ml`, `2 L` or `8 cups`
/// into fluid ounces. A bare number has no unit and does not parse.
pub fn water_ounces(text: &str) -> Option<f64> {
    let caps = water_re().captures(text.trim())?;
    let amount: f64 = caps[1].parse().ok()?;
    let unit = caps[2].to_ascii_lowercase();
    let factor = if unit.ends_with("oz") || unit.starts_with("ounce") {
        1.0
    } else if unit == "ml" || unit.starts_with("milli") {
        OZ_PER_ML
    } else if unit.starts_with("cup") {
        OZ_PER_CUP
    } else {
        OZ_PER_LITER
    };
    Some(amount * factor)
}

/// Parse a sleep duration written as `7h 30m`, `7h`, `45m` or decimal hours.
pub fn sleep_hours(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(hours) = text.parse::<f64>() {
        return hours.is_finite().then_some(hours);
    }
    let caps = sleep_re().captures(text)?;
    let hours = caps.get(1).map(|m| m.as_str().parse::<f64>()).transpose().ok()?;
    let minutes = caps.get(2).map(|m| m.as_str().parse::<f64>()).transpose().ok()?;
    if hours.is_none() && minutes.is_none() {
        return None;
    }
    Some(hours.unwrap_or(0.0) + minutes.unwrap_or(0.0) / 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_water_units() {
        let ml = water_ounces("2000 ml").unwrap();
        assert!((ml - 67.628).abs() < 0.01);
        assert!((water_ounces("2 L").unwrap() - 67.628).abs() < 0.01);
        assert_eq!(water_ounces("8 cups"), Some(64.0));
        assert_eq!(water_ounces("64oz"), Some(64.0));
        assert_eq!(water_ounces("12 fl oz"), Some(12.0));
        assert_eq!(water_ounces("1 cup"), Some(8.0));
    }

    #[test]
    fn test_water_requires_unit() {
        assert_eq!(water_ounces("64"), None);
        assert_eq!(water_ounces("lots"), None);
        assert_eq!(water_ounces("2 buckets"), None);
    }

    #[test]
    fn test_absurd_water_parses_above_limit() {
        assert!(water_ounces("500 l").unwrap() > MAX_WATER_OZ);
    }

    #[test]
    fn test_sleep_hours_forms() {
        assert_eq!(sleep_hours("7h 30m"), Some(7.5));
        assert_eq!(sleep_hours("8h"), Some(8.0));
        assert_eq!(sleep_hours("45m"), Some(0.75));
        assert_eq!(sleep_hours("6.5"), Some(6.5));
        assert_eq!(sleep_hours("7 hours 15 min"), Some(7.25));
        assert_eq!(sleep_hours("a while"), None);
        assert_eq!(sleep_hours(""), None);
    }
}
