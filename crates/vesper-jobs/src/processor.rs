// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fixed pool of workers that run handlers and apply the retry policy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vesper_jobs_core::Event;

use crate::context::JobContext;
use crate::drain::{Drain, DrainGuard};
use crate::handler::HandlerRegistry;
use crate::retry::{self, RetryDecision};
use crate::storage::Storage;
use crate::watcher::Notifier;

/// Input of the worker pool.
#[derive(Debug)]
pub enum Message {
	Run(Event),
	/// Tells exactly one worker to exit.
	Stop,
}

struct Worker {
	storage: Arc<Storage>,
	registry: HandlerRegistry,
	notifier: Notifier,
	token: CancellationToken,
}

pub struct Processor {
	input: mpsc::Sender<Message>,
	workers: usize,
	drain: Drain,
	closing: AtomicBool,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Processor {
	/// Spawn `workers` workers, at least one. Handlers receive `token` in
	/// their [`JobContext`].
	pub fn spawn(
		workers: usize,
		storage: Arc<Storage>,
		registry: HandlerRegistry,
		notifier: Notifier,
		token: CancellationToken,
	) -> Self {
		let workers = workers.max(1);
		// Capacity 1 is the closest tokio gets to a rendezvous channel: the
		// sender waits as soon as no worker is free to take the next event.
		// At most one event sits in the buffer; `close` queues its `Stop`
		// messages behind it, so that event still runs before the workers exit.
		let (input, rx) = mpsc::channel(1);
		let rx = Arc::new(Mutex::new(rx));
		let worker = Arc::new(Worker {
			storage,
			registry,
			notifier,
			token,
		});
		let drain = Drain::new();

		let handles = (0..workers)
			.filter_map(|id| {
				let guard = drain.enter()?;
				Some(tokio::spawn(run_worker(
					id,
					Arc::clone(&rx),
					Arc::clone(&worker),
					guard,
				)))
			})
			.collect();

		debug!(workers, "processor started");
		Self {
			input,
			workers,
			drain,
			closing: AtomicBool::new(false),
			handles: Mutex::new(handles),
		}
	}

	/// Sender the watcher pushes due events into.
	pub fn input(&self) -> mpsc::Sender<Message> {
		self.input.clone()
	}

	pub fn workers(&self) -> usize {
		self.workers
	}

	/// Stop intake and wait for every worker to exit. Running handlers are
	/// not cancelled; they finish first.
	pub async fn close(&self) {
		if !self.closing.swap(true, Ordering::AcqRel) {
			for _ in 0..self.workers {
				if self.input.send(Message::Stop).await.is_err() {
					break;
				}
			}
		}

		self.drain.drain().await;

		let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
		for handle in handles {
			if let Err(err) = handle.await {
				error!(error = %err, "processor worker panicked");
			}
		}
		debug!("processor stopped");
	}
}

async fn run_worker(
	id: usize,
	rx: Arc<Mutex<mpsc::Receiver<Message>>>,
	worker: Arc<Worker>,
	_guard: DrainGuard,
) {
	loop {
		let message = rx.lock().await.recv().await;
		match message {
			Some(Message::Run(event)) => worker.process(event).await,
			Some(Message::Stop) | None => break,
		}
	}
	debug!(worker = id, "worker exited");
}

impl Worker {
	async fn process(&self, event: Event) {
		let job = &event.job;

		if retry::is_expired(&event, Utc::now()) {
			info!(
				job_id = %job.id,
				target = %job.target,
				attempt = event.attempt,
				"job dropped: age limit exceeded before run"
			);
			return;
		}

		let Some(handler) = self.registry.get(&job.target) else {
			warn!(
				job_id = %job.id,
				target = %job.target,
				attempt = event.attempt,
				"job dropped: no handler registered for target"
			);
			return;
		};

		let ctx = JobContext {
			job_id: job.id.clone(),
			target: job.target.clone(),
			attempt: event.attempt,
			due: event.due,
			cancellation_token: self.token.clone(),
		};
		let job_id = job.id.clone();
		let data = job.data.clone();

		// Own task, so a panicking handler counts as a failure instead of
		// taking the worker down with it.
		let outcome = tokio::spawn(async move { handler.handle(ctx, job_id, data).await }).await;

		let reason = match outcome {
			Ok(Ok(())) => {
				debug!(job_id = %job.id, target = %job.target, attempt = event.attempt, "job completed");
				return;
			}
			Ok(Err(err)) => err.to_string(),
			Err(err) => format!("handler panicked: {err}"),
		};

		warn!(
			job_id = %job.id,
			target = %job.target,
			attempt = event.attempt,
			error = %reason,
			"job failed"
		);
		self.retry(&event).await;
	}

	async fn retry(&self, event: &Event) {
		let job = &event.job;
		match retry::next_attempt(event, retry::random_jitter) {
			RetryDecision::Retry(next) => {
				if let Err(err) = self.storage.save(&next).await {
					error!(
						job_id = %job.id,
						target = %job.target,
						attempt = next.attempt,
						error = %err,
						"failed to persist retry, job dropped"
					);
					return;
				}
				self.notifier.notify(next.due);
				debug!(job_id = %job.id, attempt = next.attempt, due = %next.due, "retry scheduled");
			}
			RetryDecision::RetryLimitReached => info!(
				job_id = %job.id,
				target = %job.target,
				attempts = event.attempt,
				retry_limit = job.options.retry_limit,
				"job dropped: retry limit reached"
			),
			RetryDecision::AgeLimitReached => info!(
				job_id = %job.id,
				target = %job.target,
				attempts = event.attempt,
				"job dropped: next retry would exceed age limit"
			),
			RetryDecision::OutOfRange => warn!(
				job_id = %job.id,
				target = %job.target,
				attempts = event.attempt,
				"job dropped: next retry time out of range"
			),
		}
	}
}
