// src/config/duration.rs

use std::time::Duration;

/// Parse a duration such as `"500ms"`, `"5s"`, `"2m"`, `"1h"` or a sum of
/// them like `"1m30s"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;
        if digits == 0 {
            return Err(format!("duration '{s}' has a unit without a number"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("duration '{s}': {e}"))?;

        let after = &rest[digits..];
        let unit_len = after
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(after.len());
        let step = match after[..unit_len].trim().to_lowercase().as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            other => {
                return Err(format!(
                    "unsupported duration unit '{other}' in '{s}'; expected ms, s, m or h"
                ));
            }
        };
        total = total.saturating_add(step);
        rest = &after[unit_len..];
    }
    Ok(total)
}
