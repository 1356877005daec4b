use std::sync::OnceLock;

use chrono::NaiveTime;
use regex::Regex;

/// Substituted by migration when a stored time cannot be read at all.
pub const FALLBACK_TIME: &str = "12:00 PM";

fn canonical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(1[0-2]|[1-9]):[0-5][0-9] (AM|PM)$").expect("valid regex"))
}

fn meridiem_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2}):(\d{2})\s*([AaPp])\.?\s*[Mm]\.?$").expect("valid regex")
    })
}

fn clock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2}):(\d{2})(?::\d{2})?$").expect("valid regex"))
}

/// `H:MM AM` / `H:MM PM`, no leading zero.
pub fn is_canonical(time: &str) -> bool {
    canonical_re().is_match(time)
}

fn format_clock(hour24: u32, minute: u32) -> Option<String> {
    NaiveTime::from_hms_opt(hour24, minute, 0).map(|t| t.format("%-I:%M %p").to_string())
}

fn meridiem_parts(time: &str) -> Option<(u32, u32)> {
    let caps = meridiem_re().captures(time)?;
    let hour: u32 = caps[1].parse().ok()?;
    let minute: u32 = caps[2].parse().ok()?;
    if !(1..=12).contains(&hour) {
        return None;
    }
    let pm = caps[3].eq_ignore_ascii_case("p");
    let hour24 = match (hour, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    (minute <= 59).then_some((hour24, minute))
}

fn parse_meridiem(time: &str) -> Option<String> {
    let (hour24, minute) = meridiem_parts(time)?;
    format_clock(hour24, minute)
}

fn split_clock(time: &str) -> Option<(u32, u32, bool)> {
    let caps = clock_re().captures(time)?;
    let padded = caps[1].len() == 2 && caps[1].starts_with('0');
    Some((caps[1].parse().ok()?, caps[2].parse().ok()?, padded))
}

/// Normalize a user-entered time to the canonical form.
///
/// Accepts the canonical form in any case/spacing, and clock times without a
/// meridiem, which are read on the 24-hour clock (`14:30` -> `2:30 PM`,
/// `9:05` -> `9:05 AM`). Blank stays blank. Returns `None` when unreadable.
pub fn normalize(time: &str) -> Option<String> {
    let time = time.trim();
    if time.is_empty() {
        return Some(String::new());
    }
    if let Some(t) = parse_meridiem(time) {
        return Some(t);
    }
    let (hour, minute, _) = split_clock(time)?;
    format_clock(hour, minute)
}

/// Result of reading a time found in a stored (possibly legacy) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyTime {
    /// Unambiguous; already canonical or converted without guessing.
    Exact(String),
    /// Bare `H:MM` with hour 1-12 and no meridiem; the meridiem was guessed.
    Guessed(String),
    /// Unreadable; replaced by [`FALLBACK_TIME`].
    Fallback,
}

/// Read a time from a stored record.
///
/// Old entry forms stored a 12-hour clock without the meridiem. For a bare
/// hour of 1-12 the meridiem is guessed: 1-7 is morning, 8-12 is afternoon
/// or evening. This mis-reads evening entries between 1 and 7 o'clock, so
/// callers must report every `Guessed` result.
pub fn migrate_legacy(time: &str) -> LegacyTime {
    let trimmed = time.trim();
    if trimmed.is_empty() {
        return LegacyTime::Exact(String::new());
    }
    if let Some(t) = parse_meridiem(trimmed) {
        return LegacyTime::Exact(t);
    }
    let Some((hour, minute, padded)) = split_clock(trimmed) else {
        return LegacyTime::Fallback;
    };
    if minute > 59 || hour > 23 {
        return LegacyTime::Fallback;
    }
    if hour == 0 || hour >= 13 || padded {
        return format_clock(hour, minute).map_or(LegacyTime::Fallback, LegacyTime::Exact);
    }
    let hour24 = match hour {
        1..=7 => hour,
        12 => 12,
        _ => hour + 12,
    };
    format_clock(hour24, minute).map_or(LegacyTime::Fallback, LegacyTime::Guessed)
}

/// Minutes since midnight of a canonical time, for chronological sorting.
pub fn minutes_of_day(time: &str) -> Option<u32> {
    let (hour24, minute) = meridiem_parts(time.trim())?;
    Some(hour24 * 60 + minute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_pattern() {
        assert!(is_canonical("7:30 AM"));
        assert!(is_canonical("12:00 PM"));
        assert!(!is_canonical("07:30 AM"));
        assert!(!is_canonical("7:30am"));
        assert!(!is_canonical("13:00 PM"));
    }

    #[test]
    fn test_normalize_24_hour() {
        assert_eq!(normalize("14:30").as_deref(), Some("2:30 PM"));
        assert_eq!(normalize("9:05").as_deref(), Some("9:05 AM"));
        assert_eq!(normalize("00:15").as_deref(), Some("12:15 AM"));
        assert_eq!(normalize("12:00").as_deref(), Some("12:00 PM"));
    }

    #[test]
    fn test_normalize_meridiem_variants() {
        assert_eq!(normalize("7:30am").as_deref(), Some("7:30 AM"));
        assert_eq!(normalize("07:30 p.m.").as_deref(), Some("7:30 PM"));
        assert_eq!(normalize(" 12:05 AM ").as_deref(), Some("12:05 AM"));
        assert_eq!(normalize("").as_deref(), Some(""));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert_eq!(normalize("13:61"), None);
        assert_eq!(normalize("25:00"), None);
        assert_eq!(normalize("noonish"), None);
        assert_eq!(normalize("13:00 PM"), None);
    }

    #[test]
    fn test_legacy_heuristic() {
        assert_eq!(migrate_legacy("7:15"), LegacyTime::Guessed("7:15 AM".into()));
        assert_eq!(migrate_legacy("9:05"), LegacyTime::Guessed("9:05 PM".into()));
        assert_eq!(migrate_legacy("12:30"), LegacyTime::Guessed("12:30 PM".into()));
        assert_eq!(migrate_legacy("14:30"), LegacyTime::Exact("2:30 PM".into()));
        assert_eq!(migrate_legacy("09:05"), LegacyTime::Exact("9:05 AM".into()));
        assert_eq!(migrate_legacy("6:00 pm"), LegacyTime::Exact("6:00 PM".into()));
    }

    #[test]
    fn test_legacy_unreadable_falls_back() {
        assert_eq!(migrate_legacy("13:61"), LegacyTime::Fallback);
        assert_eq!(migrate_legacy("breakfast"), LegacyTime::Fallback);
    }

    #[test]
    fn test_minutes_of_day() {
        assert_eq!(minutes_of_day("12:00 AM"), Some(0));
        assert_eq!(minutes_of_day("1:30 PM"), Some(13 * 60 + 30));
        assert_eq!(minutes_of_day(""), None);
    }
}
