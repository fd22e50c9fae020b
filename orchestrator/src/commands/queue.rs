use anyhow::Result;
use chrono::Utc;

use workless::admin::{self, JobEntry, QueueStats};
use workless::constants::QueueList;

use crate::cli_utils::{format_relative, truncate};

use super::shared::{connect, load_settings};

pub(crate) async fn queue_stats(config: Option<String>, queue: Option<String>) -> Result<()> {
    let settings = load_settings(config.as_deref(), queue)?;
    let mut store = connect(&settings).await?;
    let stats = admin::queue_stats(&mut store, &settings.queue_name).await?;
    print!("{}", render_stats(&settings.queue_name, &stats));
    Ok(())
}

pub(crate) async fn queue_inspect(
    config: Option<String>,
    queue: Option<String>,
    list: String,
    limit: usize,
) -> Result<()> {
    let Some(list) = QueueList::parse(&list.to_lowercase()) else {
        anyhow::bail!("unknown list '{list}' (expected pending, processing or dead)");
    };
    let settings = load_settings(config.as_deref(), queue)?;
    let mut store = connect(&settings).await?;
    let entries = admin::inspect(&mut store, &settings.queue_name, list, limit).await?;
    if entries.is_empty() {
        println!(
            "No jobs in the {} list of '{}'",
            list.as_str(),
            settings.queue_name
        );
        return Ok(());
    }
    print!("{}", render_entries(&entries));
    Ok(())
}

fn render_stats(queue: &str, stats: &QueueStats) -> String {
    let mut out = format!(
        "{:<25} {:>10} {:>10} {:>10}\n",
        "Queue", "Pending", "Processing", "Dead"
    );
    out.push_str(&format!(
        "{:<25} {:>10} {:>10} {:>10}\n",
        truncate(queue, 25),
        stats.pending,
        stats.processing,
        stats.dead
    ));
    out
}

fn render_entries(entries: &[JobEntry]) -> String {
    let now = Utc::now();
    let mut out = format!(
        "{:<38} {:<20} {:<9} {:>8} {:<16} {}\n",
        "Job ID", "Handler", "Status", "Attempts", "Scheduled", "Last Error"
    );
    for entry in entries {
        let line = match entry {
            JobEntry::Decoded(spec) => format!(
                "{:<38} {:<20} {:<9} {:>8} {:<16} {}",
                spec.id,
                truncate(&spec.name, 20),
                spec.status.as_str(),
                spec.attempts,
                format_relative(spec.scheduled_at, now),
                spec.last_error.as_deref().map(|err| truncate(err, 60)).unwrap_or_default()
            ),
            JobEntry::Missing { id } => format!("{id:<38} (value missing)"),
            JobEntry::Undecodable { id, error } => {
                format!("{id:<38} (unreadable: {})", truncate(error, 60))
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}
