//! batch-queue CLI: inspect a persisted queue state directory.
//!
//! Logging: set `RUST_LOG=batch_queue=debug` to see queue logs on stderr.

mod cli;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use batch_queue::{
    Job, JobManagerConfig, JobStatus, QueueSnapshot, load_queue_settings, load_snapshot,
    queue_settings_paths, set_config_home_override, state_file_path,
};

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Some(conf_dir) = cli.conf.clone() {
        set_config_home_override(conf_dir);
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("batch_queue=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = JobManagerConfig::from_settings(&load_queue_settings());

    match cli.command {
        Command::Summary { state_dir } => {
            let state_dir = state_dir.unwrap_or_else(|| config.state_dir.clone());
            let summary = read_snapshot(&state_dir)?
                .map(|snapshot| snapshot.summary())
                .unwrap_or_default();
            print_json(&summary)
        }
        Command::Jobs { state_dir, status } => {
            let state_dir = state_dir.unwrap_or_else(|| config.state_dir.clone());
            let status = status.map(JobStatus::from);
            let jobs = list_jobs(read_snapshot(&state_dir)?, status);
            print_json(&jobs)
        }
        Command::Settings => {
            let (system_path, user_path) = queue_settings_paths();
            print_json(&serde_json::json!({
                "system_settings": system_path,
                "user_settings": user_path,
                "max_workers": config.max_workers,
                "checkpoint_interval": config.checkpoint_interval,
                "job_timeout_secs": config.job_timeout.as_secs_f64(),
                "state_dir": config.state_dir,
                "state_file": state_file_path(&config.state_dir),
                "auto_save": config.auto_save,
                "enable_recovery": config.enable_recovery,
                "default_max_retries": config.default_max_retries,
                "requeue_policy": config.requeue_policy,
                "retry_backoff_secs": config.retry_backoff.base.as_secs_f64(),
                "retry_backoff_max_secs": config.retry_backoff.max.as_secs_f64(),
                "event_capacity": config.event_capacity,
            }))
        }
    }
}

fn read_snapshot(state_dir: &Path) -> anyhow::Result<Option<QueueSnapshot>> {
    let snapshot = load_snapshot(state_dir)
        .with_context(|| format!("failed to load queue state from {}", state_dir.display()))?;
    if snapshot.is_none() {
        tracing::info!(
            path = %state_file_path(state_dir).display(),
            "no queue state found"
        );
    }
    Ok(snapshot)
}

fn list_jobs(snapshot: Option<QueueSnapshot>, status: Option<JobStatus>) -> Vec<Job> {
    let mut jobs: Vec<Job> = snapshot
        .map(|snapshot| snapshot.jobs.into_values().collect())
        .unwrap_or_default();
    if let Some(status) = status {
        jobs.retain(|job| job.status() == status);
    }
    jobs.sort_by(|a, b| {
        a.created_at()
            .cmp(&b.created_at())
            .then_with(|| a.id().cmp(b.id()))
    });
    jobs
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}
