//! Human duration strings: `2h`, `90min`, `1h30min`, `1.5h`.

use std::sync::LazyLock;

use regex::Regex;

static HOURS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s*h").unwrap());
static MINUTES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s*m").unwrap());

/// Parse a duration into seconds. Returns 0 when neither an hours nor a
/// minutes component is present, or when the total does not fit in an
/// `i64`; callers treat 0 as invalid input.
pub fn parse_duration(input: &str) -> i64 {
    let input = input.trim().to_lowercase();
    let hours = HOURS
        .captures(&input)
        .and_then(|c| c[1].replace(',', ".").parse::<f64>().ok())
        .unwrap_or(0.0);
    let minutes = MINUTES
        .captures(&input)
        .and_then(|c| c[1].parse::<i64>().ok())
        .unwrap_or(0);
    let hour_seconds = (hours * 3600.0).round();
    if !hour_seconds.is_finite() || hour_seconds >= i64::MAX as f64 {
        return 0;
    }
    minutes
        .checked_mul(60)
        .and_then(|m| m.checked_add(hour_seconds as i64))
        .unwrap_or(0)
}

/// Format seconds as `1h 30min`, `45min` or `30s`.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    match (hours, minutes) {
        (0, 0) => format!("{}s", seconds),
        (0, m) => format!("{}min", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}min", h, m),
    }
}
