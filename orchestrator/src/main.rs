use anyhow::Result;
use clap::{Parser, Subcommand};
mod cli_utils;
mod commands;
mod telemetry;

use commands::enqueue::EnqueueOptions;
use commands::{check_store, dlq_requeue, enqueue, queue_inspect, queue_stats, run_worker};

#[derive(Parser)]
#[command(name = "workless")]
#[command(version)]
#[command(about = "Redis-backed job queue worker and admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Worker {
        #[command(subcommand)]
        command: WorkerCommand,
    },
    /// Schedule a job; arguments are parsed as JSON, falling back to strings.
    Enqueue {
        handler: String,
        #[arg(allow_negative_numbers = true)]
        args: Vec<String>,
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        queue: Option<String>,
        /// Lease duration in seconds; 0 never expires.
        #[arg(long)]
        duration: Option<u64>,
        /// Earliest run time (RFC3339).
        #[arg(long)]
        at: Option<String>,
    },
    #[command(alias = "health")]
    Check {
        #[arg(long)]
        config: Option<String>,
    },
    Queue {
        #[command(subcommand)]
        command: QueueCommand,
    },
    Dlq {
        #[command(subcommand)]
        command: DlqCommand,
    },
}

#[derive(Subcommand)]
enum WorkerCommand {
    Run {
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        concurrency: Option<u64>,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    Stats {
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        queue: Option<String>,
    },
    Inspect {
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long, default_value = "pending")]
        list: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum DlqCommand {
    Requeue {
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        queue: Option<String>,
        #[arg(long)]
        job_id: Option<String>,
        #[arg(long, default_value_t = false)]
        all: bool,
    },
}

async fn dispatch_command(command: Commands) -> Result<()> {
    match command {
        Commands::Worker { command } => match command {
            WorkerCommand::Run {
                config,
                queue,
                concurrency,
            } => {
                let concurrency = concurrency.map(|value| value as usize);
                run_worker(config, queue, concurrency).await?;
            }
        },
        Commands::Enqueue {
            handler,
            args,
            config,
            queue,
            duration,
            at,
        } => {
            enqueue(EnqueueOptions {
                config,
                handler,
                args,
                queue,
                duration,
                at,
            })
            .await?;
        }
        Commands::Check { config } => {
            check_store(config).await?;
        }
        Commands::Queue { command } => match command {
            QueueCommand::Stats { config, queue } => {
                queue_stats(config, queue).await?;
            }
            QueueCommand::Inspect {
                config,
                queue,
                list,
                limit,
            } => {
                queue_inspect(config, queue, list, limit).await?;
            }
        },
        Commands::Dlq { command } => match command {
            DlqCommand::Requeue {
                config,
                queue,
                job_id,
                all,
            } => {
                dlq_requeue(config, queue, job_id, all).await?;
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    dispatch_command(cli.command).await
}
