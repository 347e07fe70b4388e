//! Lookback-window parsing.
//!
//! Vendor exports report the lookback as "7d", "6h" or a bare hour count.
//! Anything unparseable is treated as zero hours; this never fails.

const HOURS_PER_DAY: f64 = 24.0;

/// Convert a vendor lookback string into hours.
pub fn parse_lookback(value: Option<&str>) -> f64 {
    let Some(raw) = value else { return 0.0 };
    let value = raw.trim().to_lowercase();
    if value.is_empty() {
        return 0.0;
    }

    let hours = if let Some(days) = value.strip_suffix('d') {
        parse_number(days).map(|d| d * HOURS_PER_DAY)
    } else if let Some(h) = value.strip_suffix('h') {
        parse_number(h)
    } else {
        parse_number(&value)
    };

    match hours {
        Some(h) if h.is_finite() && h > 0.0 => h,
        _ => 0.0,
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}
