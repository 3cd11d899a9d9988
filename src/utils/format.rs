use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

/// Round half away from zero to two places and pin the scale, so `9.1` prints as `9.10`.
pub fn two_places(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

pub fn format_currency(value: Decimal) -> String {
    let rounded = two_places(value);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-${}", rounded.abs())
    } else {
        format!("${}", rounded.abs())
    }
}

pub fn format_percent(value: Decimal) -> String {
    format!("{}%", two_places(value))
}

pub fn format_time(timestamp: &DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Parses the timestamp shapes the backend has been seen to emit: RFC 3339,
/// or a bare `YYYY-MM-DD HH:MM:SS[.fff]` that is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
