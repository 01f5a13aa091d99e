// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use vesper_jobs::{
	CancellationToken, Event, HandlerError, Job, JobContext, JobOption, JobOptions, Scheduler,
	SchedulerConfig, Storage, StorageResult,
};
use vesper_jobs_config::VesperJobsConfig;
use vesper_jobs_core::RecordKey;
use zeroize::Zeroizing;

use crate::ScheduleArgs;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(5);

fn scheduler_config(config: &VesperJobsConfig) -> SchedulerConfig {
	SchedulerConfig {
		db_path: config.scheduler.db_path.clone(),
		workers: config.scheduler.workers,
		keyring: config.encryption.keyring.clone().map(Arc::new),
		job_defaults: config.scheduler.job_defaults(),
	}
}

async fn open_storage(config: &VesperJobsConfig) -> anyhow::Result<Storage> {
	let path = &config.scheduler.db_path;
	Storage::open(path, config.encryption.keyring.clone().map(Arc::new))
		.await
		.with_context(|| format!("failed to open job store at {}", path.display()))
}

/// Run until Ctrl-C, then drain and close.
pub async fn run(config: &VesperJobsConfig) -> anyhow::Result<()> {
	let scheduler = Scheduler::new(scheduler_config(config));

	let _log = scheduler.handle_func("log", |ctx: JobContext, id: String, data: Vec<u8>| async move {
		info!(
			job_id = %id,
			attempt = ctx.attempt,
			payload = %String::from_utf8_lossy(&data),
			"log job ran"
		);
		Ok::<(), HandlerError>(())
	})?;
	let _fail = scheduler.handle_func("fail", |ctx: JobContext, id: String, _data: Vec<u8>| async move {
		Err::<(), _>(HandlerError::failed(format!(
			"job {id} failed on purpose (attempt {})",
			ctx.attempt
		)))
	})?;

	let token = CancellationToken::new();
	scheduler
		.start(token.clone())
		.await
		.context("failed to start job scheduler")?;
	info!(targets = ?scheduler.targets(), "waiting for jobs, press Ctrl-C to stop");

	let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
	let outcome = loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => {
				info!("received shutdown signal");
				break Ok(());
			}
			_ = health.tick() => {
				if !scheduler.is_healthy() {
					error!("job watcher stopped on a storage error");
					break Err(anyhow::anyhow!("job watcher stopped on a storage error"));
				}
			}
		}
	};

	token.cancel();
	scheduler.drain().await;
	let pending = scheduler.pending().await.unwrap_or_default();
	scheduler.close().await?;
	info!(pending, "job scheduler shut down");
	outcome
}

fn job_options(config: &VesperJobsConfig, args: &ScheduleArgs) -> JobOptions {
	let modifiers: Vec<JobOption> = [
		args.retry_limit.map(JobOption::RetryLimit),
		args.min_backoff.map(JobOption::MinBackoff),
		args.max_backoff.map(JobOption::MaxBackoff),
		args.age_limit.map(JobOption::AgeLimit),
	]
	.into_iter()
	.flatten()
	.collect();
	config.scheduler.job_defaults().with(&modifiers)
}

fn due_time(args: &ScheduleArgs) -> anyhow::Result<DateTime<Utc>> {
	if let Some(at) = args.at {
		return Ok(at);
	}
	let delay = chrono::Duration::from_std(args.delay.unwrap_or_default())
		.context("delay out of range")?;
	Utc::now()
		.checked_add_signed(delay)
		.context("due time out of range")
}

/// Persist one job. A running `run` process picks it up on its next wake
/// or restart.
pub async fn schedule(config: &VesperJobsConfig, args: ScheduleArgs) -> anyhow::Result<()> {
	anyhow::ensure!(!args.target.is_empty(), "--target must not be empty");

	let options = job_options(config, &args);
	let due = due_time(&args)?;
	let event = Event::first(Job::new(args.target, due, args.data.into_bytes(), options));

	let storage = open_storage(config).await?;
	let saved = storage.save(&event).await.context("failed to save job");
	storage.close().await?;
	saved?;

	info!(job_id = %event.job.id, target = %event.job.target, due = %event.due, "job scheduled");
	println!("{}", event.job.id);
	Ok(())
}

#[derive(Debug, Serialize)]
struct EventView {
	job_id: String,
	target: String,
	attempt: u32,
	due: DateTime<Utc>,
	job_due: DateTime<Utc>,
	data: String,
	options: JobOptions,
}

impl From<&Event> for EventView {
	fn from(event: &Event) -> Self {
		Self {
			job_id: event.job.id.clone(),
			target: event.job.target.clone(),
			attempt: event.attempt,
			due: event.due,
			job_due: event.job.due,
			data: String::from_utf8_lossy(&event.job.data).into_owned(),
			options: event.job.options,
		}
	}
}

#[derive(Debug, Serialize)]
struct InspectReport {
	pending: u64,
	events: Vec<EventView>,
}

async fn read_pending(storage: &Storage, limit: u32) -> StorageResult<(u64, Vec<Event>)> {
	Ok((storage.pending().await?, storage.peek(limit).await?))
}

/// List pending jobs without removing them.
pub async fn inspect(config: &VesperJobsConfig, limit: u32, json: bool) -> anyhow::Result<()> {
	let storage = open_storage(config).await?;
	let listing = read_pending(&storage, limit).await;
	storage.close().await?;
	let (pending, events) = listing.context("failed to read pending jobs")?;

	let report = InspectReport {
		pending,
		events: events.iter().map(EventView::from).collect(),
	};

	if json {
		println!("{}", serde_json::to_string_pretty(&report)?);
		return Ok(());
	}

	println!("{} pending job(s)", report.pending);
	for event in &report.events {
		println!(
			"{}  {:<16} attempt {}  {}",
			event.due.to_rfc3339(),
			event.target,
			event.attempt,
			event.job_id
		);
	}
	if report.pending > report.events.len() as u64 {
		warn!(
			shown = report.events.len(),
			pending = report.pending,
			"listing truncated, raise --limit to see more"
		);
	}
	Ok(())
}

pub fn keygen() -> Zeroizing<String> {
	RecordKey::generate().to_hex()
}

pub fn format_version_info() -> String {
	format!(
		"vesper-jobs version: {}\nPlatform:            {}-{}",
		env!("CARGO_PKG_VERSION"),
		std::env::consts::ARCH,
		std::env::consts::OS,
	)
}
