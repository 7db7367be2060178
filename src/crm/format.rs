//! Display helpers for the terminal board and CLI listings.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// Whole US dollars with thousands separators. `None` renders as `$0.00`.
pub fn currency(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "$0.00".to_string();
    };
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

/// `Mar 4, 2025` from a date or timestamp; empty when unparseable.
pub fn date(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return String::new();
    };
    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()));
    match parsed {
        Some(d) => d.format("%b %-d, %Y").to_string(),
        None => String::new(),
    }
}

/// First letter of the first two words, upper-cased.
pub fn initials(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .take(2)
        .collect()
}

/// North American numbers get `(555) 123-4567`; anything else is returned as given.
pub fn phone(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]),
        11 if digits.starts_with('1') => {
            format!("+1 ({}) {}-{}", &digits[1..4], &digits[4..7], &digits[7..])
        }
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_rounds_to_whole_dollars() {
        assert_eq!(currency(None), "$0.00");
        assert_eq!(currency(Some(0.0)), "$0");
        assert_eq!(currency(Some(999.5)), "$1,000");
        assert_eq!(currency(Some(1234567.0)), "$1,234,567");
        assert_eq!(currency(Some(-2500.0)), "-$2,500");
    }

    #[test]
    fn date_accepts_sql_and_iso_forms() {
        assert_eq!(date(Some("2025-03-04")), "Mar 4, 2025");
        assert_eq!(date(Some("2025-12-31 23:59:59")), "Dec 31, 2025");
        assert_eq!(date(Some("2025-07-01T10:00:00Z")), "Jul 1, 2025");
        assert_eq!(date(Some("soon")), "");
        assert_eq!(date(None), "");
    }

    #[test]
    fn initials_take_two_words() {
        assert_eq!(initials("ada lovelace"), "AL");
        assert_eq!(initials("Grace Brewster Hopper"), "GB");
        assert_eq!(initials("Cher"), "C");
        assert_eq!(initials("  "), "");
    }

    #[test]
    fn phone_formats_north_american_numbers() {
        assert_eq!(phone(Some("555.123.4567")), "(555) 123-4567");
        assert_eq!(phone(Some("1-555-123-4567")), "+1 (555) 123-4567");
        assert_eq!(phone(Some("+44 20 7946 0958")), "+44 20 7946 0958");
        assert_eq!(phone(None), "");
    }
}
