use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `0001-01-01T00:00:00Z`, the timestamp stored for "never happened".
const ZERO_TIME_SECONDS: i64 = -62_135_596_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Active,
    Retrying,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Active => "ACTIVE",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Failed => "FAILED",
        }
    }
}

/// A job as stored under `workless:<queue>:jobs:<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub name: String,
    /// Lease duration in seconds; `0` means the lease never expires.
    pub duration: u64,
    #[serde(default)]
    pub attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default = "zero_time")]
    pub executed_at: DateTime<Utc>,
    #[serde(deserialize_with = "null_as_empty")]
    pub payload: Vec<Value>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

pub fn zero_time() -> DateTime<Utc> {
    DateTime::from_timestamp(ZERO_TIME_SECONDS, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl JobSpec {
    pub fn new(
        name: impl Into<String>,
        payload: Vec<Value>,
        duration: u64,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::new_id(),
            name: name.into(),
            duration,
            attempts: 0,
            scheduled_at,
            executed_at: zero_time(),
            payload,
            status: JobStatus::Pending,
            last_error: None,
        }
    }

    /// Time-ordered so ids sort roughly by creation across producers.
    pub fn new_id() -> String {
        Uuid::now_v7().to_string()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    pub fn has_executed(&self) -> bool {
        self.executed_at != zero_time()
    }

    pub fn mark_dispatched(&mut self, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.executed_at = now;
        self.status = JobStatus::Active;
    }
}

pub fn encode(spec: &JobSpec) -> Result<String> {
    serde_json::to_string(spec).with_context(|| format!("failed to encode job {}", spec.id))
}

pub fn decode(raw: &str) -> Result<JobSpec> {
    let spec: JobSpec = serde_json::from_str(raw).context("failed to decode job spec")?;
    if spec.id.is_empty() {
        anyhow::bail!("decoded job spec has an empty id");
    }
    if spec.name.is_empty() {
        anyhow::bail!("job {} has an empty handler name", spec.id);
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> JobSpec {
        JobSpec {
            id: "0190b5a4-0000-7000-8000-000000000001".to_string(),
            name: "Hello".to_string(),
            duration: 30,
            attempts: 2,
            scheduled_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            executed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 31, 5).unwrap(),
            payload: vec![json!("World"), json!(42), json!({"nested": [1, 2]}), json!(null)],
            status: JobStatus::Retrying,
            last_error: Some("boom".to_string()),
        }
    }

    #[test]
    fn job_status_serializes_as_its_label() {
        let statuses = [
            JobStatus::Pending,
            JobStatus::Active,
            JobStatus::Retrying,
            JobStatus::Failed,
        ];
        for status in statuses {
            let encoded = serde_json::to_string(&status).unwrap();
            assert_eq!(encoded, format!("\"{}\"", status.as_str()));
            assert_eq!(serde_json::from_str::<JobStatus>(&encoded).unwrap(), status);
        }
        assert!(serde_json::from_str::<JobStatus>("\"NOPE\"").is_err());
    }

    #[test]
    fn encode_decode_preserves_every_field() {
        let spec = sample();
        let decoded = decode(&encode(&spec).unwrap()).unwrap();
        assert_eq!(decoded, spec);
    }

    #[test]
    fn empty_payload_and_zero_timestamps_survive() {
        let spec = JobSpec::new("noop", Vec::new(), 0, zero_time());
        let encoded = encode(&spec).unwrap();
        assert!(encoded.contains("\"payload\":[]"));
        assert!(encoded.contains("0001-01-01T00:00:00Z"));
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, spec);
        assert!(decoded.payload.is_empty());
        assert!(!decoded.has_executed());
    }

    #[test]
    fn decode_accepts_minimal_spec_with_null_payload() {
        let raw = r#"{
            "id": "abc",
            "name": "Hello",
            "duration": 0,
            "scheduled_at": "2024-05-01T12:30:00.123456789+02:00",
            "payload": null
        }"#;
        let spec = decode(raw).unwrap();
        assert_eq!(spec.id, "abc");
        assert!(spec.payload.is_empty());
        assert_eq!(spec.attempts, 0);
        assert_eq!(spec.status, JobStatus::Pending);
        assert_eq!(spec.executed_at, zero_time());
        assert_eq!(spec.scheduled_at.timestamp_subsec_nanos(), 123_456_789);
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(decode("").is_err());
        assert!(decode("not json").is_err());
        assert!(decode("{}").is_err());
        assert!(decode(r#"{"id":"a","name":"n","duration":-1,"scheduled_at":"2024-01-01T00:00:00Z","payload":[]}"#).is_err());
        assert!(decode(r#"{"id":"a","name":"n","duration":1,"scheduled_at":"yesterday","payload":[]}"#).is_err());
        assert!(decode(r#"{"id":"a","name":"n","duration":1,"scheduled_at":"2024-01-01T00:00:00Z"}"#).is_err());
    }

    #[test]
    fn decode_rejects_empty_identity() {
        let raw = r#"{"id":"","name":"n","duration":1,"scheduled_at":"2024-01-01T00:00:00Z","payload":[]}"#;
        assert!(decode(raw).is_err());
        let raw = r#"{"id":"a","name":"","duration":1,"scheduled_at":"2024-01-01T00:00:00Z","payload":[]}"#;
        assert!(decode(raw).is_err());
    }

    #[test]
    fn new_ids_are_unique_uuids() {
        let a = JobSpec::new_id();
        let b = JobSpec::new_id();
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn mark_dispatched_counts_attempts() {
        let mut spec = JobSpec::new("Hello", vec![json!("World")], 10, Utc::now());
        let now = Utc::now();
        spec.mark_dispatched(now);
        spec.mark_dispatched(now);
        assert_eq!(spec.attempts, 2);
        assert_eq!(spec.executed_at, now);
        assert_eq!(spec.status, JobStatus::Active);
        assert!(spec.has_executed());
    }

    #[test]
    fn is_due_compares_against_schedule() {
        let now = Utc::now();
        let spec = JobSpec::new("Hello", Vec::new(), 10, now + chrono::Duration::seconds(30));
        assert!(!spec.is_due(now));
        assert!(spec.is_due(now + chrono::Duration::seconds(31)));
    }
}
