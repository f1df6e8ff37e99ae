//! Display helpers for terminal output.

use chrono::{DateTime, Utc};

/// Fraction as a one-decimal percentage: `0.123` -> `12.3%`.
pub fn format_pct(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// US-dollar amount with thousands separators: `-1234.5` -> `-$1,234.50`.
pub fn format_usd(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${}.{:02}", group_thousands(cents / 100), cents % 100)
}

/// Integer part with thousands separators; fractions up to three places are kept.
pub fn format_number(value: f64) -> String {
    let sign = if value < 0.0 { "-" } else { "" };
    let abs = value.abs();
    let whole = abs.trunc() as u64;
    let frac = format!("{:.3}", abs.fract());
    let frac = frac.trim_start_matches('0').trim_end_matches('0');
    let frac = if frac == "." { "" } else { frac };
    format!("{sign}{}{frac}", group_thousands(whole))
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Coarse relative time: `just now`, `5m ago`, `3h ago`, `2d ago`.
pub fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h ago");
    }
    format!("{}d ago", hours / 24)
}

/// [`time_ago`] for an RFC 3339 timestamp string; `None` if it does not parse.
pub fn time_ago_str(timestamp: &str, now: DateTime<Utc>) -> Option<String> {
    let then = DateTime::parse_from_rfc3339(timestamp).ok()?;
    Some(time_ago(then.with_timezone(&Utc), now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn percentages() {
        assert_eq!(format_pct(0.123), "12.3%");
        assert_eq!(format_pct(1.0), "100.0%");
        assert_eq!(format_pct(0.0), "0.0%");
    }

    #[test]
    fn dollars() {
        assert_eq!(format_usd(1234.5), "$1,234.50");
        assert_eq!(format_usd(0.0), "$0.00");
        assert_eq!(format_usd(-42.129), "-$42.13");
        assert_eq!(format_usd(1_000_000.0), "$1,000,000.00");
        assert_eq!(format_usd(-0.001), "$0.00");
    }

    #[test]
    fn numbers() {
        assert_eq!(format_number(1234567.0), "1,234,567");
        assert_eq!(format_number(999.0), "999");
        assert_eq!(format_number(1234.5), "1,234.5");
        assert_eq!(format_number(-1000.0), "-1,000");
    }

    #[test]
    fn relative_times() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(time_ago(now - Duration::seconds(30), now), "just now");
        assert_eq!(time_ago(now - Duration::minutes(5), now), "5m ago");
        assert_eq!(time_ago(now - Duration::hours(3), now), "3h ago");
        assert_eq!(time_ago(now - Duration::days(2), now), "2d ago");
        assert_eq!(
            time_ago_str("2025-06-01T11:00:00+00:00", now).as_deref(),
            Some("1h ago")
        );
        assert!(time_ago_str("yesterday", now).is_none());
    }
}
