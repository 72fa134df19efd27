//! Duration strings as written in NetworkAddonsConfig and the environment
//!
//! Accepts one or more `<number><unit>` groups with units `h`, `m`, `s` and
//! `ms`, e.g. `168h`, `1h30m`, `90s` or `168h0m0s`. Numbers may carry a
//! fractional part (`1.5h`). A bare integer is read as seconds.

use chrono::Duration;

/// Parse a duration string. The error is a human-readable description.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    if let Ok(secs) = s.parse::<i64>() {
        return Duration::try_seconds(secs).ok_or_else(|| format!("duration {s:?} out of range"));
    }

    let mut total_ms: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("invalid duration {s:?}: missing unit"))?;
        if number_len == 0 {
            return Err(format!("invalid duration {s:?}: expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {s:?}: bad number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let factor_ms = match &rest[..unit_len] {
            "h" => 3_600_000.0,
            "m" => 60_000.0,
            "s" => 1_000.0,
            "ms" => 1.0,
            unit => return Err(format!("invalid duration {s:?}: unknown unit {unit:?}")),
        };
        rest = &rest[unit_len..];
        total_ms += value * factor_ms;
    }

    if !total_ms.is_finite() || total_ms > i64::MAX as f64 {
        return Err(format!("duration {s:?} out of range"));
    }
    Ok(Duration::milliseconds(total_ms.round() as i64))
}

/// Format a duration in the compact `1h30m` form
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds();
    if total == 0 {
        return "0s".to_string();
    }
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if seconds > 0 {
        out.push_str(&format!("{seconds}s"));
    }
    out
}
