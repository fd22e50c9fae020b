use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use workless_config::{FailurePolicyKind, WorklessSettings, validate_queue_name};

use crate::constants::{
    DEFAULT_WORKER_ID_PREFIX, dead_letter_queue_key, job_key, job_lock_key, pending_queue_key,
    processing_queue_key,
};
use crate::job::{self, JobSpec, JobStatus};
use crate::registry::Registry;
use crate::store::{Connector, QueueStore};

/// What happens to a job whose handler returned an error or panicked.
#[derive(Debug, Clone, PartialEq)]
pub enum FailurePolicy {
    /// Leave the value, lease and processing entry exactly as they are.
    Retain,
    /// Requeue with exponential backoff until `max_attempts` dispatches,
    /// then move the id to the dead-letter list.
    Retry {
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
    },
}

impl FailurePolicy {
    /// `min(base * 2^(attempt - 1), max)`; attempts below 1 count as 1.
    pub fn backoff(base_delay: Duration, max_delay: Duration, attempt: u32) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(30);
        base_delay
            .checked_mul(2u32.pow(exponent))
            .unwrap_or(max_delay)
            .min(max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub queue: String,
    /// Number of worker loops, store connections and buffer slots.
    pub concurrency: usize,
    /// How long one blocking fetch waits. Must not exceed the connector's
    /// [`Connector::max_blocking_timeout`], or the client would give up on
    /// a fetch the server can still complete.
    pub fetch_timeout: Duration,
    pub poll_delay: Duration,
    pub failure_policy: FailurePolicy,
    /// `None` disables the lease reaper.
    pub lease_sweep_interval: Option<Duration>,
    pub pool_id: Option<String>,
}

impl PoolConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self::from_settings(&WorklessSettings {
            queue_name: queue.into(),
            ..WorklessSettings::default()
        })
    }

    pub fn from_settings(settings: &WorklessSettings) -> Self {
        let failure_policy = match settings.failure_policy {
            FailurePolicyKind::Retain => FailurePolicy::Retain,
            FailurePolicyKind::Retry => FailurePolicy::Retry {
                max_attempts: settings.max_attempts,
                base_delay: seconds(settings.base_retry_delay_seconds),
                max_delay: seconds(settings.max_retry_delay_seconds),
            },
        };
        Self {
            queue: settings.queue_name.clone(),
            concurrency: settings.concurrency,
            fetch_timeout: seconds(settings.fetch_timeout_seconds),
            poll_delay: seconds(settings.poll_delay_seconds),
            failure_policy,
            lease_sweep_interval: (settings.lease_sweep_interval_seconds > 0.0)
                .then(|| seconds(settings.lease_sweep_interval_seconds)),
            pool_id: None,
        }
    }

    fn validate(&self) -> Result<()> {
        validate_queue_name(&self.queue)?;
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.fetch_timeout.is_zero() {
            anyhow::bail!("fetch timeout must be positive");
        }
        if let FailurePolicy::Retry { max_attempts, .. } = self.failure_policy
            && max_attempts == 0
        {
            anyhow::bail!("max_attempts must be at least 1");
        }
        Ok(())
    }
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

/// Per-loop counters returned by [`WorkerPool::stop`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: String,
    pub succeeded: u64,
    /// Handler errors and panics, whatever the policy did next.
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub deferred: u64,
    /// Ids fetched without a stored value.
    pub discarded: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    Stopping,
    Stopped,
}

pub struct WorkerPool<C: Connector> {
    connector: C,
    registry: Arc<Registry>,
    config: PoolConfig,
    pool_id: String,
    state: PoolState,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<WorkerReport>>,
    reaper: Option<JoinHandle<()>>,
}

impl<C: Connector> WorkerPool<C> {
    pub fn new(connector: C, registry: Registry, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        if let Some(limit) = connector.max_blocking_timeout()
            && config.fetch_timeout > limit
        {
            anyhow::bail!(
                "fetch timeout of {:.1}s exceeds the {:.1}s blocking timeout of {}",
                config.fetch_timeout.as_secs_f64(),
                limit.as_secs_f64(),
                connector.describe()
            );
        }
        let pool_id = config.pool_id.clone().unwrap_or_else(|| {
            let short_id = Uuid::new_v4().to_string();
            let suffix = &short_id[..6];
            format!(
                "{DEFAULT_WORKER_ID_PREFIX}{}_{}",
                std::process::id(),
                suffix
            )
        });
        Ok(Self {
            connector,
            registry: Arc::new(registry),
            config,
            pool_id,
            state: PoolState::Created,
            cancel: CancellationToken::new(),
            workers: Vec::new(),
            reaper: None,
        })
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Opens and pings every connection, then spawns the worker loops and
    /// the lease reaper. Nothing is spawned if any connection fails.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != PoolState::Created {
            anyhow::bail!("worker pool cannot start from state {:?}", self.state);
        }
        let target = self.connector.describe();
        if self.registry.is_empty() {
            tracing::warn!(
                pool = %self.pool_id,
                queue = %self.config.queue,
                "no handlers registered; every job will be dead-lettered"
            );
        }
        let mut stores = Vec::with_capacity(self.config.concurrency);
        for index in 0..self.config.concurrency {
            let mut store = self
                .connector
                .connect()
                .await
                .with_context(|| format!("worker {index}: failed to connect to {target}"))?;
            store
                .ping()
                .await
                .with_context(|| format!("worker {index}: store at {target} is unreachable"))?;
            stores.push(store);
        }
        let reaper_store = match self.config.lease_sweep_interval {
            Some(_) => {
                let mut store = self
                    .connector
                    .connect()
                    .await
                    .with_context(|| format!("lease reaper: failed to connect to {target}"))?;
                store.ping().await?;
                Some(store)
            }
            None => None,
        };

        let (sender, receiver) = mpsc::channel(self.config.concurrency);
        let receiver = Arc::new(Mutex::new(receiver));
        for (index, store) in stores.into_iter().enumerate() {
            let worker = WorkerLoop::new(
                format!("{}-{index}", self.pool_id),
                store,
                self.registry.clone(),
                self.config.clone(),
                sender.clone(),
                receiver.clone(),
                self.cancel.clone(),
            );
            self.workers.push(tokio::spawn(worker.run()));
        }
        if let (Some(store), Some(interval)) = (reaper_store, self.config.lease_sweep_interval) {
            let reaper = LeaseReaper::new(store, &self.config.queue, interval, self.cancel.clone());
            self.reaper = Some(tokio::spawn(reaper.run()));
        }

        self.state = PoolState::Running;
        tracing::info!(
            pool = %self.pool_id,
            queue = %self.config.queue,
            concurrency = self.config.concurrency,
            store = %target,
            "worker pool started"
        );
        Ok(())
    }

    /// Signals every loop to stop and waits for all of them. Handlers
    /// already running are allowed to finish; a loop blocked in a fetch
    /// returns once the fetch times out.
    pub async fn stop(&mut self) -> Result<Vec<WorkerReport>> {
        if self.state != PoolState::Running {
            anyhow::bail!("worker pool cannot stop from state {:?}", self.state);
        }
        self.state = PoolState::Stopping;
        self.cancel.cancel();
        tracing::info!(pool = %self.pool_id, "worker pool stopping");

        let mut reports = Vec::with_capacity(self.workers.len());
        for (index, handle) in std::mem::take(&mut self.workers).into_iter().enumerate() {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::error!(pool = %self.pool_id, worker = index, "worker loop aborted: {err}");
                    reports.push(WorkerReport {
                        worker_id: format!("{}-{index}", self.pool_id),
                        ..WorkerReport::default()
                    });
                }
            }
        }
        if let Some(reaper) = self.reaper.take()
            && let Err(err) = reaper.await
        {
            tracing::error!(pool = %self.pool_id, "lease reaper aborted: {err}");
        }

        self.state = PoolState::Stopped;
        let succeeded: u64 = reports.iter().map(|report| report.succeeded).sum();
        let failed: u64 = reports.iter().map(|report| report.failed).sum();
        tracing::info!(pool = %self.pool_id, succeeded, failed, "worker pool stopped");
        Ok(reports)
    }
}

impl<C: Connector> Drop for WorkerPool<C> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum FetchOutcome {
    Empty,
    Buffered,
    /// A future job went back to pending; `idle` once the loop has cycled
    /// through every deferred id or nothing else is waiting.
    Deferred { idle: bool },
    Discarded,
}

struct WorkerLoop<S: QueueStore> {
    worker_id: String,
    store: S,
    registry: Arc<Registry>,
    config: PoolConfig,
    pending_key: String,
    processing_key: String,
    dead_key: String,
    sender: mpsc::Sender<JobSpec>,
    buffer: Arc<Mutex<mpsc::Receiver<JobSpec>>>,
    cancel: CancellationToken,
    deferred_ids: HashSet<String>,
    report: WorkerReport,
}

impl<S: QueueStore + 'static> WorkerLoop<S> {
    fn new(
        worker_id: String,
        store: S,
        registry: Arc<Registry>,
        config: PoolConfig,
        sender: mpsc::Sender<JobSpec>,
        buffer: Arc<Mutex<mpsc::Receiver<JobSpec>>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            report: WorkerReport {
                worker_id: worker_id.clone(),
                ..WorkerReport::default()
            },
            worker_id,
            pending_key: pending_queue_key(&config.queue),
            processing_key: processing_queue_key(&config.queue),
            dead_key: dead_letter_queue_key(&config.queue),
            store,
            registry,
            config,
            sender,
            buffer,
            cancel,
            deferred_ids: HashSet::new(),
        }
    }

    async fn run(mut self) -> WorkerReport {
        tracing::debug!(worker = %self.worker_id, queue = %self.config.queue, "worker loop started");
        loop {
            if let Some(spec) = self.next_buffered().await {
                self.execute(spec).await;
                continue;
            }
            if self.cancel.is_cancelled() {
                break;
            }
            match self.fetch().await {
                Ok(FetchOutcome::Deferred { idle: true }) => {
                    self.idle(self.config.poll_delay).await;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(
                        worker = %self.worker_id,
                        queue = %self.config.queue,
                        "fetch failed: {err:#}"
                    );
                    let delay = calculate_jittered_delay(self.config.poll_delay, 0.5);
                    self.idle(delay).await;
                }
            }
        }
        tracing::debug!(worker = %self.worker_id, "worker loop stopped");
        self.report
    }

    async fn next_buffered(&self) -> Option<JobSpec> {
        let mut buffer = self.buffer.lock().await;
        buffer.try_recv().ok()
    }

    async fn idle(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = sleep(duration) => {}
        }
    }

    async fn fetch(&mut self) -> Result<FetchOutcome> {
        let Some(job_id) = self
            .store
            .move_tail_to_head(
                &self.pending_key,
                &self.processing_key,
                Some(self.config.fetch_timeout),
            )
            .await?
        else {
            self.deferred_ids.clear();
            return Ok(FetchOutcome::Empty);
        };
        let queue = self.config.queue.clone();

        let Some(raw) = self.store.get(&job_key(&queue, &job_id)).await? else {
            tracing::warn!(
                worker = %self.worker_id,
                queue = %queue,
                job_id = %job_id,
                "job value missing; discarding id"
            );
            self.store.lrem(&self.processing_key, 1, &job_id).await?;
            self.store.del(&job_lock_key(&queue, &job_id)).await?;
            self.report.discarded += 1;
            return Ok(FetchOutcome::Discarded);
        };

        let spec = match job::decode(&raw) {
            Ok(spec) => spec,
            Err(err) => {
                tracing::warn!(
                    worker = %self.worker_id,
                    queue = %queue,
                    job_id = %job_id,
                    "undecodable job value; dead-lettering: {err:#}"
                );
                self.store
                    .move_entry(&self.processing_key, &self.dead_key, &job_id)
                    .await?;
                self.store.del(&job_lock_key(&queue, &job_id)).await?;
                self.report.dead_lettered += 1;
                return Ok(FetchOutcome::Discarded);
            }
        };

        if !spec.is_due(Utc::now()) {
            tracing::debug!(
                worker = %self.worker_id,
                queue = %queue,
                job_id = %job_id,
                scheduled_at = %spec.scheduled_at,
                "job not due yet; returning to pending"
            );
            self.store
                .move_entry(&self.processing_key, &self.pending_key, &job_id)
                .await?;
            self.report.deferred += 1;
            let cycled = !self.deferred_ids.insert(job_id);
            let idle = cycled || self.store.llen(&self.pending_key).await? <= 1;
            if idle {
                self.deferred_ids.clear();
            }
            return Ok(FetchOutcome::Deferred { idle });
        }

        let lease = (spec.duration > 0).then(|| Duration::from_secs(spec.duration));
        self.store
            .set(&job_lock_key(&queue, &job_id), &self.worker_id, lease)
            .await?;

        if let Err(err) = self.sender.send(spec).await {
            // Every loop holds the receiver, so this only happens while the
            // pool is being torn down. Put the id back for another worker.
            tracing::error!(worker = %self.worker_id, job_id = %job_id, "job buffer closed");
            self.requeue(&err.0).await?;
            return Ok(FetchOutcome::Empty);
        }
        Ok(FetchOutcome::Buffered)
    }

    async fn execute(&mut self, mut spec: JobSpec) {
        let queue = self.config.queue.clone();
        let Some(handler) = self.registry.get(&spec.name) else {
            let message = format!("no handler registered for '{}'", spec.name);
            tracing::warn!(
                worker = %self.worker_id,
                queue = %queue,
                job_id = %spec.id,
                "{message}; dead-lettering"
            );
            spec.status = JobStatus::Failed;
            spec.last_error = Some(message);
            if let Err(err) = self.dead_letter(&spec).await {
                tracing::error!(job_id = %spec.id, "failed to dead-letter job: {err:#}");
            }
            self.report.dead_lettered += 1;
            return;
        };

        spec.mark_dispatched(Utc::now());
        if matches!(self.config.failure_policy, FailurePolicy::Retry { .. })
            && let Err(err) = self.write_spec(&spec).await
        {
            tracing::warn!(job_id = %spec.id, "failed to record dispatch: {err:#}");
        }

        tracing::debug!(
            worker = %self.worker_id,
            queue = %queue,
            job_id = %spec.id,
            handler = %spec.name,
            attempt = spec.attempts,
            "job started"
        );
        let started = Instant::now();
        let args = spec.payload.clone();
        let outcome = tokio::spawn(async move { handler.call(args).await }).await;
        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(format!("{err:#}")),
            Err(err) if err.is_panic() => Err(panic_message(err.into_panic())),
            Err(err) => Err(err.to_string()),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                self.report.succeeded += 1;
                tracing::info!(
                    worker = %self.worker_id,
                    queue = %queue,
                    job_id = %spec.id,
                    handler = %spec.name,
                    elapsed_ms,
                    "job completed"
                );
                if let Err(err) = self.acknowledge(&spec.id).await {
                    tracing::error!(job_id = %spec.id, "failed to acknowledge job: {err:#}");
                }
            }
            Err(message) => {
                self.report.failed += 1;
                tracing::warn!(
                    worker = %self.worker_id,
                    queue = %queue,
                    job_id = %spec.id,
                    handler = %spec.name,
                    attempt = spec.attempts,
                    elapsed_ms,
                    "job failed: {message}"
                );
                if let Err(err) = self.handle_failure(spec, message).await {
                    tracing::error!(worker = %self.worker_id, "failure handling failed: {err:#}");
                }
            }
        }
    }

    async fn acknowledge(&mut self, job_id: &str) -> Result<()> {
        let queue = &self.config.queue;
        self.store.del(&job_key(queue, job_id)).await?;
        self.store.del(&job_lock_key(queue, job_id)).await?;
        self.store.lrem(&self.processing_key, 1, job_id).await?;
        Ok(())
    }

    async fn handle_failure(&mut self, mut spec: JobSpec, message: String) -> Result<()> {
        let FailurePolicy::Retry {
            max_attempts,
            base_delay,
            max_delay,
        } = self.config.failure_policy
        else {
            // Retained jobs keep their lease for good so the reaper never
            // hands them to another worker.
            self.store
                .set(&job_lock_key(&self.config.queue, &spec.id), &self.worker_id, None)
                .await?;
            return Ok(());
        };

        spec.last_error = Some(message);
        if spec.attempts < max_attempts {
            let delay = FailurePolicy::backoff(base_delay, max_delay, spec.attempts);
            spec.status = JobStatus::Retrying;
            spec.scheduled_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
            self.write_spec(&spec).await?;
            self.requeue(&spec).await?;
            self.report.retried += 1;
            tracing::info!(
                job_id = %spec.id,
                "retrying job attempt {}/{} in {:.1}s",
                spec.attempts,
                max_attempts,
                delay.as_secs_f64()
            );
        } else {
            spec.status = JobStatus::Failed;
            self.dead_letter(&spec).await?;
            self.report.dead_lettered += 1;
            tracing::warn!(
                job_id = %spec.id,
                attempts = spec.attempts,
                "job exhausted its attempts; dead-lettered"
            );
        }
        Ok(())
    }

    async fn requeue(&mut self, spec: &JobSpec) -> Result<()> {
        let moved = self
            .store
            .move_entry(&self.processing_key, &self.pending_key, &spec.id)
            .await?;
        if !moved {
            tracing::warn!(job_id = %spec.id, "job left the processing list before requeue");
        }
        self.store
            .del(&job_lock_key(&self.config.queue, &spec.id))
            .await?;
        Ok(())
    }

    async fn dead_letter(&mut self, spec: &JobSpec) -> Result<()> {
        self.write_spec(spec).await?;
        let moved = self
            .store
            .move_entry(&self.processing_key, &self.dead_key, &spec.id)
            .await?;
        if !moved {
            tracing::warn!(job_id = %spec.id, "job left the processing list before dead-lettering");
        }
        self.store
            .del(&job_lock_key(&self.config.queue, &spec.id))
            .await?;
        Ok(())
    }

    async fn write_spec(&mut self, spec: &JobSpec) -> Result<()> {
        let payload = job::encode(spec)?;
        self.store
            .set(&job_key(&self.config.queue, &spec.id), &payload, None)
            .await
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {message}")
    } else {
        "handler panicked".to_string()
    }
}

fn calculate_jittered_delay(base_delay: Duration, jitter_factor: f64) -> Duration {
    let base_delay = base_delay.as_secs_f64();
    if base_delay <= 0.0 {
        return Duration::ZERO;
    }
    let jitter = jitter_factor.clamp(0.0, 0.99);
    let min_delay = (base_delay * (1.0 - jitter)).max(0.0);
    let mut max_delay = base_delay * (1.0 + jitter);
    if max_delay < min_delay {
        max_delay = min_delay;
    }
    let mut rng = rand::rng();
    let delay = rng.random_range(min_delay..=max_delay);
    Duration::from_secs_f64(delay)
}

/// Returns ids whose lease has lapsed to the pending list.
///
/// An id is reclaimed only when its lock key is missing on two consecutive
/// sweeps, which covers the short window between a fetch and the claim.
struct LeaseReaper<S: QueueStore> {
    store: S,
    queue: String,
    pending_key: String,
    processing_key: String,
    interval: Duration,
    cancel: CancellationToken,
    suspects: HashSet<String>,
}

impl<S: QueueStore + 'static> LeaseReaper<S> {
    fn new(store: S, queue: &str, interval: Duration, cancel: CancellationToken) -> Self {
        Self {
            store,
            queue: queue.to_string(),
            pending_key: pending_queue_key(queue),
            processing_key: processing_queue_key(queue),
            interval,
            cancel,
            suspects: HashSet::new(),
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.interval) => {}
            }
            match self.sweep().await {
                Ok(0) => {}
                Ok(reclaimed) => {
                    tracing::info!(queue = %self.queue, reclaimed, "reclaimed jobs with expired leases");
                }
                Err(err) => {
                    tracing::error!(queue = %self.queue, "lease sweep failed: {err:#}");
                }
            }
        }
    }

    async fn sweep(&mut self) -> Result<usize> {
        let job_ids = self.store.lrange(&self.processing_key, 0, -1).await?;
        let mut missing = HashSet::new();
        let mut reclaimed = 0;
        for job_id in job_ids {
            if self.cancel.is_cancelled() {
                break;
            }
            if self
                .store
                .get(&job_lock_key(&self.queue, &job_id))
                .await?
                .is_some()
            {
                continue;
            }
            if !self.suspects.contains(&job_id) {
                missing.insert(job_id);
                continue;
            }
            if self
                .store
                .move_entry(&self.processing_key, &self.pending_key, &job_id)
                .await?
            {
                tracing::warn!(queue = %self.queue, job_id = %job_id, "lease expired; job requeued");
                reclaimed += 1;
            }
        }
        self.suspects = missing;
        Ok(reclaimed)
    }
}
