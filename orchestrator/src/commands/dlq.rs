use anyhow::Result;

use workless::admin::requeue_dead;

use super::shared::{connect, load_settings};

pub(crate) async fn dlq_requeue(
    config: Option<String>,
    queue: Option<String>,
    job_id: Option<String>,
    all: bool,
) -> Result<()> {
    if job_id.is_none() && !all {
        println!("Refusing to requeue every dead-lettered job without --all or --job-id.");
        return Ok(());
    }
    let settings = load_settings(config.as_deref(), queue)?;
    let mut store = connect(&settings).await?;
    let summary = requeue_dead(&mut store, &settings.queue_name, job_id.as_deref()).await?;

    for (id, reason) in &summary.skipped {
        println!("  skipped {id}: {reason}");
    }
    println!(
        "Requeued {} job(s) to '{}'",
        summary.requeued.len(),
        settings.queue_name
    );
    Ok(())
}
