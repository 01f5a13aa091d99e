// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use vesper_jobs_core::{
	Event, Job, JobOption, JobOptions, KeyRing, DEFAULT_DB_PATH, DEFAULT_WORKERS,
};

use crate::context::JobContext;
use crate::error::{HandlerError, Result, SchedulerError};
use crate::handler::{HandlerRegistry, JobHandler, Registration};
use crate::processor::Processor;
use crate::storage::Storage;
use crate::watcher::{Notifier, Watcher};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	pub db_path: PathBuf,
	pub workers: usize,
	/// Enables at-rest encryption. Fixed for the life of the database file.
	pub keyring: Option<Arc<KeyRing>>,
	/// Options for jobs scheduled without explicit modifiers.
	pub job_defaults: JobOptions,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			db_path: PathBuf::from(DEFAULT_DB_PATH),
			workers: DEFAULT_WORKERS,
			keyring: None,
			job_defaults: JobOptions::default(),
		}
	}
}

struct Running {
	storage: Arc<Storage>,
	notifier: Notifier,
	watcher: Watcher,
	processor: Processor,
}

/// Durable one-shot job scheduler.
///
/// Register handlers, then [`start`](Scheduler::start). Events already due in
/// the store are dispatched right after start, so handlers registered later
/// can miss them.
pub struct Scheduler {
	config: SchedulerConfig,
	registry: HandlerRegistry,
	started: AtomicBool,
	running: OnceLock<Running>,
}

impl Scheduler {
	pub fn new(config: SchedulerConfig) -> Self {
		Self {
			config,
			registry: HandlerRegistry::new(),
			started: AtomicBool::new(false),
			running: OnceLock::new(),
		}
	}

	pub fn config(&self) -> &SchedulerConfig {
		&self.config
	}

	/// Open storage and start the watcher and the worker pool. `ctx` is handed
	/// to every handler through [`JobContext`]; the scheduler never cancels it.
	#[instrument(skip(self, ctx), fields(db_path = %self.config.db_path.display(), workers = self.config.workers))]
	pub async fn start(&self, ctx: CancellationToken) -> Result<()> {
		if self.started.swap(true, Ordering::AcqRel) {
			return Err(SchedulerError::AlreadyStarted);
		}

		let storage = match Storage::open(&self.config.db_path, self.config.keyring.clone()).await {
			Ok(storage) => Arc::new(storage),
			Err(err) => {
				self.started.store(false, Ordering::Release);
				return Err(err.into());
			}
		};

		let notifier = Notifier::new();
		let processor = Processor::spawn(
			self.config.workers,
			Arc::clone(&storage),
			self.registry.clone(),
			notifier.clone(),
			ctx,
		);
		let watcher = Watcher::spawn(Arc::clone(&storage), notifier.clone(), processor.input());

		if self
			.running
			.set(Running {
				storage,
				notifier,
				watcher,
				processor,
			})
			.is_err()
		{
			return Err(SchedulerError::AlreadyStarted);
		}

		info!(encrypted = self.config.keyring.is_some(), "job scheduler started");
		Ok(())
	}

	fn running(&self) -> Result<&Running> {
		self.running.get().ok_or(SchedulerError::NotStarted)
	}

	/// Schedule `target` to run at `due` with `data`. Returns the job id.
	#[instrument(skip(self, data, options), fields(job_id = tracing::field::Empty))]
	pub async fn at(
		&self,
		due: DateTime<Utc>,
		target: &str,
		data: impl Into<Vec<u8>>,
		options: &[JobOption],
	) -> Result<String> {
		if target.is_empty() {
			return Err(SchedulerError::EmptyTarget);
		}
		let running = self.running()?;

		let job = Job::new(target, due, data, self.config.job_defaults.with(options));
		tracing::Span::current().record("job_id", job.id.as_str());
		let event = Event::first(job);

		running.storage.save(&event).await?;
		running.notifier.notify(event.due);

		info!("job scheduled");
		Ok(event.job.id)
	}

	/// Schedule `target` to run `delay` from now. Returns the job id.
	pub async fn after(
		&self,
		delay: Duration,
		target: &str,
		data: impl Into<Vec<u8>>,
		options: &[JobOption],
	) -> Result<String> {
		let delay = chrono::Duration::from_std(delay).map_err(|_| SchedulerError::DueOutOfRange)?;
		let due = Utc::now()
			.checked_add_signed(delay)
			.ok_or(SchedulerError::DueOutOfRange)?;
		self.at(due, target, data, options).await
	}

	/// Register a closure for `target`.
	pub fn handle_func<F, Fut>(&self, target: &str, f: F) -> Result<Registration>
	where
		F: Fn(JobContext, String, Vec<u8>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
	{
		self.handle(target, Arc::new(f))
	}

	/// Register `handler` for `target`. Fails if the target already has one.
	pub fn handle(&self, target: &str, handler: Arc<dyn JobHandler>) -> Result<Registration> {
		self.registry.register(target, handler)
	}

	pub fn targets(&self) -> Vec<String> {
		self.registry.targets()
	}

	/// Stop the watcher, then the workers. Running handlers finish; due events
	/// not yet handed to a worker stay in storage. Storage stays open.
	#[instrument(skip(self))]
	pub async fn drain(&self) {
		let Some(running) = self.running.get() else {
			return;
		};
		running.watcher.close().await;
		running.processor.close().await;
		info!("job scheduler drained");
	}

	/// Release the database. Drains first if [`drain`](Scheduler::drain) has
	/// not run yet, so no watcher or worker task still uses the store. The
	/// file can be reopened as soon as this returns.
	#[instrument(skip(self))]
	pub async fn close(&self) -> Result<()> {
		let running = self.running()?;
		self.drain().await;
		running.storage.close().await?;
		info!("job scheduler closed");
		Ok(())
	}

	/// Number of events waiting in storage.
	pub async fn pending(&self) -> Result<u64> {
		Ok(self.running()?.storage.pending().await?)
	}

	/// The earliest `limit` events waiting in storage.
	pub async fn peek(&self, limit: u32) -> Result<Vec<Event>> {
		Ok(self.running()?.storage.peek(limit).await?)
	}

	/// False once the watcher has stopped on a storage failure. A started
	/// scheduler that reports unhealthy no longer dispatches anything.
	pub fn is_healthy(&self) -> bool {
		self.running.get().is_none_or(|running| running.watcher.is_healthy())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;
	use vesper_jobs_core::RecordKey;

	fn config(dir: &tempfile::TempDir) -> SchedulerConfig {
		SchedulerConfig {
			db_path: dir.path().join("jobs.db"),
			workers: 2,
			..SchedulerConfig::default()
		}
	}

	#[test]
	fn default_config() {
		let config = SchedulerConfig::default();
		assert_eq!(config.db_path, PathBuf::from("./vesper-jobs.db"));
		assert_eq!(config.workers, 4);
		assert!(config.keyring.is_none());
		assert_eq!(config.job_defaults, JobOptions::default());
	}

	#[tokio::test]
	async fn start_twice_fails() {
		let dir = tempfile::tempdir().unwrap();
		let scheduler = Scheduler::new(config(&dir));
		scheduler.start(CancellationToken::new()).await.unwrap();
		assert!(matches!(
			scheduler.start(CancellationToken::new()).await,
			Err(SchedulerError::AlreadyStarted)
		));
		scheduler.drain().await;
		scheduler.close().await.unwrap();
	}

	#[tokio::test]
	async fn scheduling_before_start_fails() {
		let dir = tempfile::tempdir().unwrap();
		let scheduler = Scheduler::new(config(&dir));
		assert!(matches!(
			scheduler.after(Duration::ZERO, "t", Vec::new(), &[]).await,
			Err(SchedulerError::NotStarted)
		));
		assert!(matches!(scheduler.pending().await, Err(SchedulerError::NotStarted)));
	}

	#[tokio::test]
	async fn empty_target_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let scheduler = Scheduler::new(config(&dir));
		scheduler.start(CancellationToken::new()).await.unwrap();

		assert!(matches!(
			scheduler.at(Utc::now(), "", Vec::new(), &[]).await,
			Err(SchedulerError::EmptyTarget)
		));
		assert_eq!(scheduler.pending().await.unwrap(), 0);
		scheduler.drain().await;
	}

	#[tokio::test]
	async fn failed_open_allows_another_start() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("jobs.db");
		std::fs::write(&path, vec![0xAB; 8192]).unwrap();

		let scheduler = Scheduler::new(SchedulerConfig {
			db_path: path.clone(),
			..SchedulerConfig::default()
		});
		assert!(matches!(
			scheduler.start(CancellationToken::new()).await,
			Err(SchedulerError::Storage(_))
		));

		std::fs::remove_file(&path).unwrap();
		scheduler.start(CancellationToken::new()).await.unwrap();
		scheduler.drain().await;
	}

	#[tokio::test]
	async fn defaults_apply_to_scheduled_jobs() {
		let dir = tempfile::tempdir().unwrap();
		let scheduler = Scheduler::new(SchedulerConfig {
			job_defaults: JobOptions::default().with(&[vesper_jobs_core::retry_limit(9)]),
			..config(&dir)
		});
		scheduler.start(CancellationToken::new()).await.unwrap();

		scheduler
			.after(Duration::from_secs(3600), "later", b"x".to_vec(), &[])
			.await
			.unwrap();
		scheduler
			.after(
				Duration::from_secs(7200),
				"later",
				b"y".to_vec(),
				&[vesper_jobs_core::retry_limit(1)],
			)
			.await
			.unwrap();

		let pending = scheduler.peek(10).await.unwrap();
		assert_eq!(pending[0].job.options.retry_limit, 9);
		assert_eq!(pending[1].job.options.retry_limit, 1);
		scheduler.drain().await;
	}

	#[tokio::test]
	async fn handlers_receive_context_and_payload() {
		let dir = tempfile::tempdir().unwrap();
		let scheduler = Scheduler::new(SchedulerConfig {
			keyring: Some(Arc::new(KeyRing::single(7, RecordKey::generate()))),
			..config(&dir)
		});
		let token = CancellationToken::new();
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let _reg = scheduler
			.handle_func("echo", move |ctx: JobContext, id: String, data: Vec<u8>| {
				let tx = tx.clone();
				async move {
					let _ = tx.send((ctx.job_id == id, ctx.attempt, ctx.target, data));
					Ok(())
				}
			})
			.unwrap();
		scheduler.start(token).await.unwrap();

		scheduler.after(Duration::ZERO, "echo", b"hello".to_vec(), &[]).await.unwrap();

		let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
			.await
			.unwrap()
			.unwrap();
		assert_eq!(received, (true, 1, "echo".to_string(), b"hello".to_vec()));
		scheduler.drain().await;
	}

	#[tokio::test]
	async fn close_releases_the_store_for_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let scheduler = Scheduler::new(config(&dir));
		scheduler.start(CancellationToken::new()).await.unwrap();
		scheduler
			.after(Duration::from_secs(3600), "later", b"x".to_vec(), &[])
			.await
			.unwrap();
		assert_eq!(scheduler.pending().await.unwrap(), 1);

		scheduler.drain().await;
		scheduler.close().await.unwrap();

		let reopened = Storage::open(&dir.path().join("jobs.db"), None).await.unwrap();
		assert_eq!(reopened.pending().await.unwrap(), 1);
		reopened.close().await.unwrap();
	}

	#[tokio::test]
	async fn close_without_drain_stops_cleanly() {
		let dir = tempfile::tempdir().unwrap();
		let scheduler = Scheduler::new(config(&dir));
		scheduler.start(CancellationToken::new()).await.unwrap();
		scheduler
			.after(Duration::from_secs(3600), "later", Vec::new(), &[])
			.await
			.unwrap();

		scheduler.close().await.unwrap();
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert!(scheduler.is_healthy());
		scheduler.close().await.unwrap();

		let reopened = Storage::open(&dir.path().join("jobs.db"), None).await.unwrap();
		assert_eq!(reopened.pending().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn drain_without_start_is_a_no_op() {
		let dir = tempfile::tempdir().unwrap();
		let scheduler = Scheduler::new(config(&dir));
		let calls = Arc::new(AtomicUsize::new(0));
		let counter = calls.clone();
		let _reg = scheduler
			.handle_func("t", move |_ctx: JobContext, _id: String, _data: Vec<u8>| {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Ok(()) }
			})
			.unwrap();

		scheduler.drain().await;
		assert!(scheduler.is_healthy());
		assert_eq!(scheduler.targets(), vec!["t".to_string()]);
		assert_eq!(calls.load(Ordering::SeqCst), 0);
	}
}
