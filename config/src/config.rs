use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::queue::validate_queue_name;
use crate::settings::WorklessSettings;

pub const DEFAULT_CONFIG_FILENAME: &str = "workless.toml";
pub const ENV_CONFIG_KEY: &str = "WORKLESS_CONFIG";

const SETTINGS_FIELDS: [&str; 12] = [
    "redis_dsn",
    "queue_name",
    "concurrency",
    "fetch_timeout_seconds",
    "poll_delay_seconds",
    "failure_policy",
    "max_attempts",
    "base_retry_delay_seconds",
    "max_retry_delay_seconds",
    "lease_sweep_interval_seconds",
    "shutdown_grace_period_seconds",
    "default_job_duration_seconds",
];

pub fn resolve_config_source(config_path: Option<&str>) -> (Option<String>, String) {
    if let Some(path) = config_path {
        return (Some(path.to_string()), "--config parameter".to_string());
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_KEY)
        && !env_path.is_empty()
    {
        return (Some(env_path), format!("{ENV_CONFIG_KEY} env var"));
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
    if default_path.is_file() {
        return (
            Some(default_path.to_string_lossy().to_string()),
            format!("{DEFAULT_CONFIG_FILENAME} in cwd"),
        );
    }

    (None, "not found".to_string())
}

/// Loads settings from the resolved TOML file (if any), then applies
/// `WORKLESS_*` environment overrides. Without a config file the defaults
/// plus environment are used.
pub fn load_toml_settings(config_path: Option<&str>) -> Result<WorklessSettings> {
    dotenvy::dotenv().ok();

    let (path, _) = resolve_config_source(config_path);
    let file_value = match path {
        Some(path) => {
            let payload = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {path}"))?;
            let toml_value: toml::Value = toml::from_str(&payload)
                .with_context(|| format!("failed to parse TOML at {path}"))?;
            let json_value =
                serde_json::to_value(toml_value).context("failed to convert TOML to JSON")?;
            normalize_toml_payload(json_value)?
        }
        None => Value::Object(Map::new()),
    };

    let env_overrides = env_overrides()?;
    let merged = deep_merge(file_value, env_overrides);

    let settings: WorklessSettings = serde_json::from_value(merged).map_err(|err| {
        let hint = diagnose_config_error(&err);
        anyhow::anyhow!("invalid workless config: {err}{hint}")
    })?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn normalize_toml_payload(payload: Value) -> Result<Value> {
    match payload {
        Value::Object(mut map) => match map.remove("workless") {
            Some(Value::Object(section)) => Ok(Value::Object(section)),
            Some(_) => Err(anyhow::anyhow!("[workless] must be a TOML table")),
            None => Ok(Value::Object(map)),
        },
        _ => Err(anyhow::anyhow!("workless config must be a TOML table")),
    }
}

fn env_overrides() -> Result<Value> {
    let mut payload = Map::new();

    set_env_string(&mut payload, "redis_dsn", "WORKLESS_REDIS_DSN");
    set_env_string(&mut payload, "queue_name", "WORKLESS_QUEUE_NAME");
    set_env_int(&mut payload, "concurrency", "WORKLESS_CONCURRENCY")?;
    set_env_float(
        &mut payload,
        "fetch_timeout_seconds",
        "WORKLESS_FETCH_TIMEOUT_SECONDS",
    )?;
    set_env_float(
        &mut payload,
        "poll_delay_seconds",
        "WORKLESS_POLL_DELAY_SECONDS",
    )?;
    set_env_string(&mut payload, "failure_policy", "WORKLESS_FAILURE_POLICY");
    set_env_int(&mut payload, "max_attempts", "WORKLESS_MAX_ATTEMPTS")?;
    set_env_float(
        &mut payload,
        "base_retry_delay_seconds",
        "WORKLESS_BASE_RETRY_DELAY_SECONDS",
    )?;
    set_env_float(
        &mut payload,
        "max_retry_delay_seconds",
        "WORKLESS_MAX_RETRY_DELAY_SECONDS",
    )?;
    set_env_float(
        &mut payload,
        "lease_sweep_interval_seconds",
        "WORKLESS_LEASE_SWEEP_INTERVAL_SECONDS",
    )?;
    set_env_float(
        &mut payload,
        "shutdown_grace_period_seconds",
        "WORKLESS_SHUTDOWN_GRACE_PERIOD_SECONDS",
    )?;
    set_env_int(
        &mut payload,
        "default_job_duration_seconds",
        "WORKLESS_DEFAULT_JOB_DURATION_SECONDS",
    )?;

    Ok(Value::Object(payload))
}

fn set_env_string(map: &mut Map<String, Value>, key: &str, env: &str) {
    if let Ok(value) = std::env::var(env)
        && !value.is_empty()
    {
        map.insert(key.to_string(), Value::String(value));
    }
}

fn set_env_int(map: &mut Map<String, Value>, key: &str, env: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env) {
        if value.is_empty() {
            return Ok(());
        }
        let parsed: i64 = value
            .parse()
            .with_context(|| format!("Invalid {env} value: {value}"))?;
        map.insert(key.to_string(), Value::Number(parsed.into()));
    }
    Ok(())
}

fn set_env_float(map: &mut Map<String, Value>, key: &str, env: &str) -> Result<()> {
    if let Ok(value) = std::env::var(env) {
        if value.is_empty() {
            return Ok(());
        }
        let parsed: f64 = value
            .parse()
            .with_context(|| format!("Invalid {env} value: {value}"))?;
        map.insert(
            key.to_string(),
            Value::Number(
                serde_json::Number::from_f64(parsed)
                    .ok_or_else(|| anyhow::anyhow!("Invalid {env} value: {value}"))?,
            ),
        );
    }
    Ok(())
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                let entry = base_map.remove(&key);
                let merged = match entry {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay_value) => overlay_value,
    }
}

fn diagnose_config_error(err: &serde_json::Error) -> String {
    let err_msg = err.to_string().to_lowercase();
    if err_msg.contains("unknown field") {
        return format!(
            "\n\nHint: valid fields are: {}",
            SETTINGS_FIELDS.join(", ")
        );
    }
    if err_msg.contains("unknown variant") {
        return "\n\nHint: failure_policy must be \"retry\" or \"retain\"".to_string();
    }
    String::new()
}

fn validate_settings(settings: &WorklessSettings) -> Result<()> {
    validate_queue_name(&settings.queue_name)?;
    if settings.concurrency == 0 {
        anyhow::bail!("concurrency must be a positive integer");
    }
    if !settings.fetch_timeout_seconds.is_finite() || settings.fetch_timeout_seconds <= 0.0 {
        anyhow::bail!(
            "fetch_timeout_seconds must be positive, got {}",
            settings.fetch_timeout_seconds
        );
    }
    if settings.max_attempts == 0 {
        anyhow::bail!("max_attempts must be at least 1");
    }
    for (name, value) in [
        ("poll_delay_seconds", settings.poll_delay_seconds),
        ("base_retry_delay_seconds", settings.base_retry_delay_seconds),
        ("max_retry_delay_seconds", settings.max_retry_delay_seconds),
        (
            "lease_sweep_interval_seconds",
            settings.lease_sweep_interval_seconds,
        ),
        (
            "shutdown_grace_period_seconds",
            settings.shutdown_grace_period_seconds,
        ),
    ] {
        if !value.is_finite() || value < 0.0 {
            anyhow::bail!("{name} must be a non-negative number, got {value}");
        }
    }
    Ok(())
}
