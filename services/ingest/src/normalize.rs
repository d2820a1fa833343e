//! Text and value normalizers shared by header matching, catalog lookup and
//! row validation. Every function here is total: bad input yields a default,
//! `NaN` or `None`, never a panic.

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::model::Cell;

/// Spreadsheet serial of 1970-01-01 (serial 0 is 1899-12-30)
pub const SPREADSHEET_EPOCH_OFFSET: i64 = 25569;
/// Serial of 9999-12-31, the last day a spreadsheet can represent
pub const MAX_SERIAL: f64 = 2_958_465.0;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").expect("valid regex"));
static STRICT_ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").expect("valid regex"));
static DAY_MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[/\-](\d{1,2})[/\-](\d{4})$").expect("valid regex"));
static SERIAL_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}$").expect("valid regex"));

/// Formats tried after the explicit patterns, with and without a time part.
const FALLBACK_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const FALLBACK_DATE_FORMATS: &[&str] = &[
    "%Y/%m/%d",
    "%Y.%m.%d",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%d %B %Y",
    "%d %b %Y",
    "%a, %d %b %Y",
];

/// Equality key for fuzzy matching: trim, upper-case, strip diacritics and
/// collapse whitespace runs. Two names are the same iff their keys are equal.
pub fn normalize_text(s: &str) -> String {
    let folded: String = s
        .trim()
        .to_uppercase()
        .nfd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Integer from the leading digits of the cell's text (`"12abc"` -> 12,
/// `"3.7"` -> 3). Falls back to `default` when there are no digits.
pub fn to_int(v: &Cell, default: i64) -> i64 {
    let text = v.as_text();
    let s = text.trim();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let run: &str = {
        let end = digits
            .bytes()
            .position(|b| !b.is_ascii_digit())
            .unwrap_or(digits.len());
        &digits[..end]
    };
    if run.is_empty() {
        return default;
    }

    let magnitude = run.bytes().fold(0i64, |acc, b| {
        acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
    });
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

/// Float from the cell, accepting a comma as decimal separator. Returns
/// `NaN` when nothing finite can be read; callers must check.
pub fn to_float(v: &Cell) -> f64 {
    if let Cell::Number(n) = v {
        return if n.is_finite() { *n } else { f64::NAN };
    }
    let text = v.as_text().replacen(',', ".", 1);
    let s = text.trim();
    let prefix = &s[..float_prefix_len(s)];
    match prefix.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => f64::NAN,
    }
}

/// Length of the longest leading decimal literal (`[+-]digits[.digits][e[+-]digits]`)
fn float_prefix_len(s: &str) -> usize {
    let b = s.as_bytes();
    let mut i = 0;
    if matches!(b.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut mantissa_digits = i - int_start;
    if i < b.len() && b[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        mantissa_digits += j - frac_start;
        if mantissa_digits > 0 {
            i = j;
        }
    }
    if mantissa_digits == 0 {
        return 0;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        let mut j = i + 1;
        if matches!(b.get(j), Some(b'+') | Some(b'-')) {
            j += 1;
        }
        let exp_start = j;
        while j < b.len() && b[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            i = j;
        }
    }
    i
}

/// Calendar date of a spreadsheet serial day number (fraction = time of day)
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(0.0..=MAX_SERIAL).contains(&serial) {
        return None;
    }
    let days = (serial.floor() as i64).checked_sub(SPREADSHEET_EPOCH_OFFSET)?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;
    if days >= 0 {
        epoch.checked_add_days(Days::new(days as u64))
    } else {
        epoch.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

/// Date cell -> `YYYY-MM-DD`, or `None`.
///
/// Accepts native dates, 5-digit spreadsheet serials, `YYYY-M-D`, `D/M/YYYY`,
/// `D-M-YYYY` and a handful of common long forms. The explicit patterns are
/// only reshaped here; calendar validity is checked by [`is_valid_iso_date`].
pub fn parse_date_flexible(v: &Cell) -> Option<String> {
    if let Cell::Date(d) = v {
        return Some(d.format("%Y-%m-%d").to_string());
    }

    let text = v.as_text();
    let s = text.trim();
    if s.is_empty() {
        return None;
    }

    if SERIAL_DATE.is_match(s) {
        let serial: f64 = s.parse().ok()?;
        return serial_to_date(serial).map(|d| d.format("%Y-%m-%d").to_string());
    }

    if let Some(caps) = ISO_DATE.captures(s) {
        return Some(format!("{}-{:0>2}-{:0>2}", &caps[1], &caps[2], &caps[3]));
    }

    if let Some(caps) = DAY_MONTH_YEAR.captures(s) {
        return Some(format!("{}-{:0>2}-{:0>2}", &caps[3], &caps[2], &caps[1]));
    }

    parse_date_fallback(s).map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date_fallback(s: &str) -> Option<NaiveDate> {
    let parsed = DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_rfc2822(s))
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| {
            FALLBACK_DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok().map(|dt| dt.date()))
        })
        .or_else(|| {
            FALLBACK_DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        });
    // chrono's %Y takes any digit count, so "05/03/24" would become year 5
    parsed.filter(|d| (1900..=2999).contains(&d.year()))
}

/// Strict `YYYY-MM-DD` check that also rejects impossible days (`2024-02-30`)
pub fn is_valid_iso_date(iso: &str) -> bool {
    parse_iso_date(iso).is_some()
}

pub fn parse_iso_date(iso: &str) -> Option<NaiveDate> {
    let caps = STRICT_ISO_DATE.captures(iso)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}
