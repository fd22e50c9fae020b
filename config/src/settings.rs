use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_BASE_RETRY_DELAY_SECONDS, DEFAULT_CONCURRENCY, DEFAULT_FETCH_TIMEOUT_SECONDS,
    DEFAULT_JOB_DURATION_SECONDS, DEFAULT_LEASE_SWEEP_INTERVAL_SECONDS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_RETRY_DELAY_SECONDS, DEFAULT_POLL_DELAY_SECONDS, DEFAULT_QUEUE_NAME,
    DEFAULT_REDIS_DSN, DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS,
};

/// What a worker does with a job whose handler returned an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicyKind {
    /// Re-schedule with exponential backoff, dead-letter after `max_attempts`.
    #[default]
    Retry,
    /// Leave the job in the processing list untouched.
    Retain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct WorklessSettings {
    pub redis_dsn: String,
    pub queue_name: String,
    pub concurrency: usize,
    pub fetch_timeout_seconds: f64,
    pub poll_delay_seconds: f64,
    pub failure_policy: FailurePolicyKind,
    pub max_attempts: u32,
    pub base_retry_delay_seconds: f64,
    pub max_retry_delay_seconds: f64,
    pub lease_sweep_interval_seconds: f64,
    pub shutdown_grace_period_seconds: f64,
    pub default_job_duration_seconds: u64,
}

impl Default for WorklessSettings {
    fn default() -> Self {
        Self {
            redis_dsn: DEFAULT_REDIS_DSN.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout_seconds: DEFAULT_FETCH_TIMEOUT_SECONDS,
            poll_delay_seconds: DEFAULT_POLL_DELAY_SECONDS,
            failure_policy: FailurePolicyKind::Retry,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_retry_delay_seconds: DEFAULT_BASE_RETRY_DELAY_SECONDS,
            max_retry_delay_seconds: DEFAULT_MAX_RETRY_DELAY_SECONDS,
            lease_sweep_interval_seconds: DEFAULT_LEASE_SWEEP_INTERVAL_SECONDS,
            shutdown_grace_period_seconds: DEFAULT_SHUTDOWN_GRACE_PERIOD_SECONDS,
            default_job_duration_seconds: DEFAULT_JOB_DURATION_SECONDS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_a_config_file() {
        let settings = WorklessSettings::default();
        assert_eq!(settings.queue_name, "default");
        assert_eq!(settings.concurrency, 10);
        assert_eq!(settings.failure_policy, FailurePolicyKind::Retry);
        assert_eq!(settings.fetch_timeout_seconds, 10.0);
    }

    #[test]
    fn failure_policy_parses_snake_case() {
        let policy: FailurePolicyKind = serde_json::from_str("\"retain\"").unwrap();
        assert_eq!(policy, FailurePolicyKind::Retain);
        assert!(serde_json::from_str::<FailurePolicyKind>("\"drop\"").is_err());
    }
}
