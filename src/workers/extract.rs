//! Text extraction shared by workers: times, days, durations, tags, titles.
//!
//! Pure functions over the raw input. `now` is always passed in so results
//! are deterministic under test.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use regex::Regex;

use crate::nodes::Recurrence;

/// Maximum stored title length, including the ellipsis.
pub const MAX_TITLE_CHARS: usize = 120;

static TIME_12H: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m\b\.?").expect("valid 12h regex")
});

static TIME_24H: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2}):(\d{2})\b").expect("valid 24h regex"));

static RECURRENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(every\s+weekday|weekdays|every\s+day|daily|every\s+week|weekly|every\s+month|monthly)\b")
        .expect("valid recurrence regex")
});

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfor\s+(\d{1,4})\s*(minutes?|mins?|m|hours?|hrs?|h)\b")
        .expect("valid duration regex")
});

static DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|tonight|tomorrow|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .expect("valid day regex")
});

static HASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)#([\p{L}\p{N}_-]+)").expect("valid hashtag regex"));

/// Parse the first clock time in `text`.
///
/// 12-hour forms (`2pm`, `2:30 pm`) win over 24-hour ones (`14:30`).
/// `Ok(None)` means no time was mentioned; `Err` means one was mentioned but
/// is out of range (`25:00`, `13pm`).
pub fn parse_time(text: &str) -> Result<Option<NaiveTime>, String> {
    if let Some(caps) = TIME_12H.captures(text) {
        let hour: u32 = caps[1].parse().map_err(|_| format!("bad hour in '{}'", &caps[0]))?;
        let minute: u32 = match caps.get(2) {
            Some(m) => m.as_str().parse().map_err(|_| format!("bad minute in '{}'", &caps[0]))?,
            None => 0,
        };
        if !(1..=12).contains(&hour) || minute > 59 {
            return Err(format!("'{}' is not a valid time", caps[0].trim()));
        }
        let pm = caps[3].eq_ignore_ascii_case("p");
        let hour24 = match (hour, pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, true) => h + 12,
            (h, false) => h,
        };
        return NaiveTime::from_hms_opt(hour24, minute, 0)
            .map(Some)
            .ok_or_else(|| format!("'{}' is not a valid time", caps[0].trim()));
    }

    if let Some(caps) = TIME_24H.captures(text) {
        let hour: u32 = caps[1].parse().map_err(|_| format!("bad hour in '{}'", &caps[0]))?;
        let minute: u32 = caps[2].parse().map_err(|_| format!("bad minute in '{}'", &caps[0]))?;
        return NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Some)
            .ok_or_else(|| format!("'{}' is not a valid time", &caps[0]));
    }

    Ok(None)
}

pub fn parse_recurrence(text: &str) -> Option<Recurrence> {
    let caps = RECURRENCE.captures(text)?;
    let phrase = caps[1].split_whitespace().collect::<Vec<_>>().join(" ");
    phrase.parse().ok()
}

/// `for 45 min`, `for 2 hours`.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let caps = DURATION.captures(text)?;
    let amount: i64 = caps[1].parse().ok()?;
    if amount == 0 {
        return None;
    }
    let unit = caps[2].to_ascii_lowercase();
    if unit.starts_with('h') {
        Some(Duration::hours(amount))
    } else {
        Some(Duration::minutes(amount))
    }
}

/// Resolve `today`, `tomorrow` or a weekday name relative to `now`.
///
/// Weekdays resolve to the next occurrence strictly after today.
pub fn parse_day(text: &str, now: DateTime<Utc>) -> Option<NaiveDate> {
    let caps = DAY.captures(text)?;
    let today = now.date_naive();
    let word = caps[1].to_ascii_lowercase();
    match word.as_str() {
        "today" | "tonight" => Some(today),
        "tomorrow" => today.succ_opt(),
        other => {
            let target: Weekday = other.parse().ok()?;
            let current = today.weekday().num_days_from_monday() as i64;
            let wanted = target.num_days_from_monday() as i64;
            let ahead = match (wanted - current).rem_euclid(7) {
                0 => 7,
                n => n,
            };
            today.checked_add_signed(Duration::days(ahead))
        }
    }
}

/// 23:59 UTC on `date`.
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(23, 59, 0)
        .unwrap_or_else(|| date.and_time(NaiveTime::MIN))
        .and_utc()
}

/// Parse an ISO date (`2026-03-14`, end of day) or datetime.
pub fn parse_date_entity(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(ndt.and_utc());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Some(ndt.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(end_of_day)
}

/// Lower-cased `#hashtags` in order of appearance.
pub fn hashtags(text: &str) -> Vec<String> {
    HASHTAG
        .captures_iter(text)
        .map(|caps| caps[1].to_lowercase())
        .collect()
}

/// Split a comma- or semicolon-separated list, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lower-case and de-duplicate, keeping first-seen order.
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim().trim_start_matches('#').to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Trim and cap at [`MAX_TITLE_CHARS`], ending in `...` when cut.
pub fn truncate_title(title: &str) -> String {
    let title = title.trim();
    if title.chars().count() <= MAX_TITLE_CHARS {
        return title.to_string();
    }
    let kept: String = title.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{}...", kept.trim_end())
}

/// Case-insensitive whole-word (or whole-phrase) match.
pub fn mentions(text: &str, phrase: &str) -> bool {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return false;
    }
    Regex::new(&format!(r"(?i)(^|\W){}($|\W)", regex::escape(phrase)))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}
