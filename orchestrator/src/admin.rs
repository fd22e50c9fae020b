//! Read-mostly operations used by the CLI to look into a queue and to
//! return dead-lettered jobs to service.

use anyhow::Result;
use chrono::Utc;

use crate::constants::{QueueList, dead_letter_queue_key, job_key, pending_queue_key};
use crate::job::{self, JobSpec, JobStatus};
use crate::store::QueueStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub dead: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.processing + self.dead
    }
}

pub async fn queue_stats<S: QueueStore>(store: &mut S, queue: &str) -> Result<QueueStats> {
    Ok(QueueStats {
        pending: store.llen(&QueueList::Pending.key(queue)).await?,
        processing: store.llen(&QueueList::Processing.key(queue)).await?,
        dead: store.llen(&QueueList::Dead.key(queue)).await?,
    })
}

/// One list entry and whatever could be read for it.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEntry {
    Decoded(JobSpec),
    Missing { id: String },
    Undecodable { id: String, error: String },
}

impl JobEntry {
    pub fn id(&self) -> &str {
        match self {
            JobEntry::Decoded(spec) => &spec.id,
            JobEntry::Missing { id } | JobEntry::Undecodable { id, .. } => id,
        }
    }
}

/// Lists up to `limit` entries of `list`, oldest first (the order workers
/// will reach them in).
pub async fn inspect<S: QueueStore>(
    store: &mut S,
    queue: &str,
    list: QueueList,
    limit: usize,
) -> Result<Vec<JobEntry>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let start = -(limit.min(isize::MAX as usize) as isize);
    let mut ids = store.lrange(&list.key(queue), start, -1).await?;
    ids.reverse();

    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        let entry = match store.get(&job_key(queue, &id)).await? {
            None => JobEntry::Missing { id },
            Some(raw) => match job::decode(&raw) {
                Ok(spec) => JobEntry::Decoded(spec),
                Err(err) => JobEntry::Undecodable {
                    id,
                    error: format!("{err:#}"),
                },
            },
        };
        entries.push(entry);
    }
    Ok(entries)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequeueSummary {
    pub requeued: Vec<String>,
    /// Ids left in the dead-letter list, with the reason.
    pub skipped: Vec<(String, String)>,
}

/// Moves dead-lettered jobs back to pending with a fresh attempt budget.
/// With `job_id` only that job is considered; otherwise every entry is.
/// Jobs whose value is missing or unreadable stay where they are.
pub async fn requeue_dead<S: QueueStore>(
    store: &mut S,
    queue: &str,
    job_id: Option<&str>,
) -> Result<RequeueSummary> {
    let dead_key = dead_letter_queue_key(queue);
    let pending_key = pending_queue_key(queue);
    let mut dead_ids = store.lrange(&dead_key, 0, -1).await?;
    dead_ids.reverse();
    dead_ids.dedup();

    let mut summary = RequeueSummary::default();
    let candidates = match job_id {
        Some(job_id) if dead_ids.iter().any(|id| id == job_id) => vec![job_id.to_string()],
        Some(job_id) => {
            summary
                .skipped
                .push((job_id.to_string(), "not in the dead-letter list".to_string()));
            Vec::new()
        }
        None => dead_ids,
    };

    for id in candidates {
        let Some(raw) = store.get(&job_key(queue, &id)).await? else {
            summary.skipped.push((id, "job value missing".to_string()));
            continue;
        };
        let mut spec = match job::decode(&raw) {
            Ok(spec) => spec,
            Err(err) => {
                summary.skipped.push((id, format!("{err:#}")));
                continue;
            }
        };
        spec.status = JobStatus::Pending;
        spec.attempts = 0;
        spec.last_error = None;
        spec.scheduled_at = Utc::now();
        store
            .set(&job_key(queue, &id), &job::encode(&spec)?, None)
            .await?;
        if store.move_entry(&dead_key, &pending_key, &id).await? {
            tracing::info!(queue = %queue, job_id = %id, "dead-lettered job requeued");
            summary.requeued.push(id);
        } else {
            summary
                .skipped
                .push((id, "not in the dead-letter list".to_string()));
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Producer;
    use crate::constants::processing_queue_key;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn dead_job(store: &MemoryStore, queue: &str, name: &str) -> String {
        let mut spec = JobSpec::new(name, vec![json!(1)], 30, Utc::now());
        spec.status = JobStatus::Failed;
        spec.attempts = 5;
        spec.last_error = Some("boom".to_string());
        let mut store = store.clone();
        store
            .set(&job_key(queue, &spec.id), &job::encode(&spec).unwrap(), None)
            .await
            .unwrap();
        store
            .lpush(&dead_letter_queue_key(queue), &spec.id)
            .await
            .unwrap();
        spec.id
    }

    #[tokio::test]
    async fn stats_count_each_list() {
        let store = MemoryStore::new();
        let mut producer = Producer::new(store.clone());
        producer.schedule("q", "A", 10, Vec::new()).await.unwrap();
        producer.schedule("q", "B", 10, Vec::new()).await.unwrap();
        dead_job(&store, "q", "C").await;
        let mut reader = store.clone();
        reader
            .move_tail_to_head(&pending_queue_key("q"), &processing_queue_key("q"), None)
            .await
            .unwrap();

        let stats = queue_stats(&mut reader, "q").await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                pending: 1,
                processing: 1,
                dead: 1
            }
        );
        assert_eq!(stats.total(), 3);
        assert_eq!(queue_stats(&mut reader, "other").await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn inspect_reports_oldest_first_with_missing_and_broken_values() {
        let store = MemoryStore::new();
        let mut producer = Producer::new(store.clone());
        let first = producer.schedule("q", "First", 10, Vec::new()).await.unwrap();
        let mut writer = store.clone();
        writer.lpush(&pending_queue_key("q"), "ghost").await.unwrap();
        writer.set(&job_key("q", "broken"), "{", None).await.unwrap();
        writer.lpush(&pending_queue_key("q"), "broken").await.unwrap();

        let entries = inspect(&mut writer, "q", QueueList::Pending, 10).await.unwrap();
        let ids: Vec<&str> = entries.iter().map(JobEntry::id).collect();
        assert_eq!(ids, vec![first.as_str(), "ghost", "broken"]);
        assert!(matches!(&entries[0], JobEntry::Decoded(spec) if spec.name == "First"));
        assert!(matches!(&entries[1], JobEntry::Missing { .. }));
        assert!(matches!(&entries[2], JobEntry::Undecodable { .. }));

        let limited = inspect(&mut writer, "q", QueueList::Pending, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id(), first);
        assert!(inspect(&mut writer, "q", QueueList::Pending, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requeue_single_job_resets_its_state() {
        let store = MemoryStore::new();
        let target = dead_job(&store, "q", "Retryable").await;
        let other = dead_job(&store, "q", "Other").await;
        let mut admin = store.clone();

        let summary = requeue_dead(&mut admin, "q", Some(&target)).await.unwrap();
        assert_eq!(summary.requeued, vec![target.clone()]);
        assert!(summary.skipped.is_empty());

        let raw = admin.get(&job_key("q", &target)).await.unwrap().unwrap();
        let spec = job::decode(&raw).unwrap();
        assert_eq!(spec.status, JobStatus::Pending);
        assert_eq!(spec.attempts, 0);
        assert_eq!(spec.last_error, None);
        assert_eq!(
            admin.lrange(&pending_queue_key("q"), 0, -1).await.unwrap(),
            vec![target]
        );
        assert_eq!(
            admin.lrange(&dead_letter_queue_key("q"), 0, -1).await.unwrap(),
            vec![other]
        );
    }

    #[tokio::test]
    async fn requeue_all_skips_unreadable_entries() {
        let store = MemoryStore::new();
        let first = dead_job(&store, "q", "A").await;
        let second = dead_job(&store, "q", "B").await;
        let mut admin = store.clone();
        admin.lpush(&dead_letter_queue_key("q"), "ghost").await.unwrap();

        let summary = requeue_dead(&mut admin, "q", None).await.unwrap();
        assert_eq!(summary.requeued, vec![first, second]);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].0, "ghost");
        assert_eq!(admin.llen(&pending_queue_key("q")).await.unwrap(), 2);
        assert_eq!(
            admin.lrange(&dead_letter_queue_key("q"), 0, -1).await.unwrap(),
            vec!["ghost"]
        );
    }

    #[tokio::test]
    async fn requeue_of_job_outside_dead_list_is_skipped() {
        let store = MemoryStore::new();
        let id = Producer::new(store.clone())
            .schedule("q", "Live", 10, Vec::new())
            .await
            .unwrap();
        let mut admin = store.clone();
        let before = admin.get(&job_key("q", &id)).await.unwrap();
        let summary = requeue_dead(&mut admin, "q", Some(&id)).await.unwrap();
        assert!(summary.requeued.is_empty());
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(admin.llen(&pending_queue_key("q")).await.unwrap(), 1);
        assert_eq!(admin.get(&job_key("q", &id)).await.unwrap(), before);
    }
}
