//! Relative-age strings ("3 weeks ago", "hace 2 meses") to absolute dates.
//!
//! The source renders review ages in the locale it decided to serve, so unit
//! keywords are matched for English and Spanish. Months approximate to 30
//! days and years to 365; the source itself only exposes coarse ages.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

/// Localized "edited" markers prefixed to the age of amended reviews.
/// "Edited 2 days ago" must parse identically to "2 days ago".
const EDITED_MARKERS: &[&str] = &["edited", "editado", "editada"];

/// Words standing in for the number 1 in indefinite-article phrasing
/// ("a week ago", "hace una semana").
const ONE_WORDS: &[&str] = &["a", "an", "un", "una"];

/// Compute the review date by subtracting the parsed relative duration from
/// the retrieval date. Unparseable input yields the retrieval date itself,
/// so `review_date <= retrieval_date` holds unconditionally.
pub fn review_date_from(relative: &str, retrieval: DateTime<Utc>) -> DateTime<Utc> {
    parse_relative(relative)
        .and_then(|age| retrieval.checked_sub_signed(age))
        .unwrap_or(retrieval)
}

/// Parse a relative-age string into a duration. `None` when no number or no
/// unit keyword is recognized, and for magnitudes the page should never
/// serve; the input is page-supplied, so arithmetic stays checked.
pub fn parse_relative(relative: &str) -> Option<Duration> {
    let mut text = relative.trim().to_lowercase();
    for marker in EDITED_MARKERS {
        if let Some(stripped) = text.strip_prefix(marker) {
            text = stripped.trim_start().to_string();
            break;
        }
    }

    let value = leading_value(&text)?;

    if contains_unit(&text, &["second", "segundo"]) {
        Duration::try_seconds(value)
    } else if contains_unit(&text, &["minute", "minuto"]) {
        Duration::try_minutes(value)
    } else if contains_unit(&text, &["hour", "hora"]) {
        Duration::try_hours(value)
    } else if contains_unit(&text, &["day", "día", "dia"]) {
        Duration::try_days(value)
    } else if contains_unit(&text, &["week", "semana"]) {
        Duration::try_weeks(value)
    } else if contains_unit(&text, &["month", "mes"]) {
        value.checked_mul(30).and_then(Duration::try_days)
    } else if contains_unit(&text, &["year", "año"]) {
        value.checked_mul(365).and_then(Duration::try_days)
    } else {
        None
    }
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)").expect("valid regex"))
}

fn leading_value(text: &str) -> Option<i64> {
    if let Some(caps) = number_re().captures(text) {
        return caps[1].parse().ok();
    }
    // "a week ago" / "hace una semana": indefinite article means 1
    if text.split_whitespace().any(|w| ONE_WORDS.contains(&w)) {
        return Some(1);
    }
    None
}

fn contains_unit(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| text.contains(k))
}
