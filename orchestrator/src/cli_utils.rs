use chrono::{DateTime, Utc};

/// Short human description of `at` relative to `now`.
pub fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(at).num_seconds();
    let (magnitude, suffix) = if seconds >= 0 {
        (seconds, "ago")
    } else {
        (-seconds, "from now")
    };
    if magnitude < 60 {
        format!("{magnitude}s {suffix}")
    } else if magnitude < 3600 {
        format!("{}m {suffix}", magnitude / 60)
    } else if magnitude < 86_400 {
        format!("{}h {suffix}", magnitude / 3600)
    } else {
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}

pub fn truncate(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        return value.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = value.chars().take(keep).collect();
    out.push_str("...");
    out
}
