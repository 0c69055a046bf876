// 🔎 Field Extractors - Pull typed values out of free-text listing fields
// Every extractor is total: unparseable text is `None`, never an error.

use crate::repair::DETAILS_DELIMITER;
use chrono::{Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

fn age_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^(\d+)\s*days?").expect("valid age pattern"))
}

fn price_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("valid price pattern"))
}

/// Vehicle id is the text before the first `|` in the details field.
///
/// `"ABC123|rest"` → `Some("ABC123")`, `"no-pipe"` → `None`.
pub fn extract_vehicle_id(details: Option<&str>) -> Option<String> {
    let (id, _) = details?.split_once(DETAILS_DELIMITER)?;
    let id = id.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Listing age in days from text such as `"15 days"` or `"1 Day"`.
pub fn extract_age_days(age_text: Option<&str>) -> Option<i64> {
    let caps = age_pattern().captures(age_text?.trim())?;
    caps[1].parse().ok()
}

/// First numeral in the text, thousands separators stripped.
///
/// `"$12,345.67 approx"` → `Some(12345.67)`.
pub fn extract_price(price_text: Option<&str>) -> Option<f64> {
    let numeral = price_pattern().find(price_text?)?;
    numeral.as_str().replace(',', "").parse().ok()
}

/// Date the listing went live, counted back from the run date.
pub fn date_listed(today: NaiveDate, age_days: Option<i64>) -> Option<NaiveDate> {
    today.checked_sub_signed(Duration::try_days(age_days?)?)
}
