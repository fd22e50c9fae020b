use anyhow::Result;
use chrono::Utc;

use workless::{Producer, QueueStore};

use super::shared::{connect, load_settings, parse_job_arg, parse_scheduled_at};

pub(crate) struct EnqueueOptions {
    pub config: Option<String>,
    pub handler: String,
    pub args: Vec<String>,
    pub queue: Option<String>,
    pub duration: Option<u64>,
    pub at: Option<String>,
}

pub(crate) async fn enqueue(options: EnqueueOptions) -> Result<()> {
    let settings = load_settings(options.config.as_deref(), options.queue.clone())?;
    let store = connect(&settings).await?;
    let duration = options
        .duration
        .unwrap_or(settings.default_job_duration_seconds);
    let job_id = enqueue_with(store, &settings.queue_name, duration, &options).await?;
    println!("Scheduled job {job_id} on queue '{}'", settings.queue_name);
    Ok(())
}

async fn enqueue_with<S: QueueStore>(
    store: S,
    queue: &str,
    duration: u64,
    options: &EnqueueOptions,
) -> Result<String> {
    let scheduled_at = match options.at.as_deref() {
        Some(raw) => parse_scheduled_at(raw)?,
        None => Utc::now(),
    };
    let args = options.args.iter().map(|raw| parse_job_arg(raw)).collect();
    Producer::new(store)
        .schedule_at(queue, &options.handler, duration, scheduled_at, args)
        .await
}
