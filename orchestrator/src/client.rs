use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::Instrument;
use workless_config::validate_queue_name;

use crate::constants::{job_key, job_lock_key, pending_queue_key};
use crate::job::{self, JobSpec};
use crate::store::QueueStore;

/// Writes jobs into a queue.
///
/// Scheduling is three independent store writes (value, lease, pending
/// push) with no rollback: if a later step fails the earlier writes stay
/// behind and the error is returned to the caller.
pub struct Producer<S: QueueStore> {
    store: S,
}

impl<S: QueueStore> Producer<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Schedules `handler` to run as soon as a worker is free.
    pub async fn schedule(
        &mut self,
        queue: &str,
        handler: &str,
        duration: u64,
        args: Vec<Value>,
    ) -> Result<String> {
        self.schedule_at(queue, handler, duration, Utc::now(), args)
            .await
    }

    /// Schedules `handler` to run no earlier than `scheduled_at`.
    pub async fn schedule_at(
        &mut self,
        queue: &str,
        handler: &str,
        duration: u64,
        scheduled_at: DateTime<Utc>,
        args: Vec<Value>,
    ) -> Result<String> {
        validate_queue_name(queue)?;
        if handler.trim().is_empty() {
            anyhow::bail!("handler name must not be empty");
        }

        let spec = JobSpec::new(handler, args, duration, scheduled_at);
        let payload = job::encode(&spec)?;
        let span = tracing::info_span!(
            "workless.schedule",
            queue = %queue,
            job_id = %spec.id,
            handler = %handler
        );
        async {
            self.store
                .set(&job_key(queue, &spec.id), &payload, None)
                .await?;
            let lease = (duration > 0).then(|| Duration::from_secs(duration));
            self.store
                .set(&job_lock_key(queue, &spec.id), &spec.id, lease)
                .await?;
            self.store
                .lpush(&pending_queue_key(queue), &spec.id)
                .await?;
            tracing::info!("job scheduled");
            Ok::<_, anyhow::Error>(())
        }
        .instrument(span)
        .await?;

        Ok(spec.id)
    }
}
