use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;

use workless::store::{Connector, RedisConnector, RedisStore};
use workless::{WorklessSettings, load_toml_settings};
use workless_config::validate_queue_name;

/// Loads settings and applies a `--queue` override.
pub(crate) fn load_settings(
    config: Option<&str>,
    queue: Option<String>,
) -> Result<WorklessSettings> {
    let mut settings = load_toml_settings(config)?;
    if let Some(queue) = queue {
        validate_queue_name(&queue)?;
        settings.queue_name = queue;
    }
    Ok(settings)
}

pub(crate) async fn connect(settings: &WorklessSettings) -> Result<RedisStore> {
    RedisConnector::new(settings.redis_dsn.as_str())?
        .connect()
        .await
}

/// Positional job arguments are JSON when they parse as JSON, plain
/// strings otherwise.
pub(crate) fn parse_job_arg(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

pub(crate) fn parse_scheduled_at(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|value| value.with_timezone(&Utc))
        .with_context(|| format!("invalid RFC3339 timestamp '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_args_fall_back_to_strings() {
        assert_eq!(parse_job_arg("42"), json!(42));
        assert_eq!(parse_job_arg("{\"a\":[1,true]}"), json!({"a": [1, true]}));
        assert_eq!(parse_job_arg("\"quoted\""), json!("quoted"));
        assert_eq!(parse_job_arg("World"), json!("World"));
        assert_eq!(parse_job_arg(""), json!(""));
    }

    #[test]
    fn scheduled_at_accepts_offsets() {
        let parsed = parse_scheduled_at("2024-05-01T14:30:00+02:00").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T12:30:00+00:00");
        assert!(parse_scheduled_at("tomorrow").is_err());
    }
}
