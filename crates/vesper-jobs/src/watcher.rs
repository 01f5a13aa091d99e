// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The control loop that turns due events into processor work.
//!
//! The watcher is the only caller of [`Storage::load`]. It sleeps until the
//! soonest known due time, or until a [`Notifier`] reports an earlier one,
//! then loads everything due and hands it to the processor one event at a
//! time. Handing off blocks while every worker is busy.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vesper_jobs_core::Event;

use crate::processor::Message;
use crate::storage::Storage;

#[derive(Debug, Default)]
struct State {
	/// Soonest due time the loop knows about.
	next: Option<DateTime<Utc>>,
	closing: bool,
}

#[derive(Debug, Default)]
struct Shared {
	state: Mutex<State>,
	/// Holds at most one pending permit, so bursts of notifications coalesce
	/// into a single extra pass.
	wake: Notify,
	failed: AtomicBool,
}

/// Tells the watcher about newly persisted events.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
	shared: Arc<Shared>,
}

impl Notifier {
	pub fn new() -> Self {
		Self::default()
	}

	/// Report that an event due at `due` was persisted. Wakes the loop only if
	/// `due` is earlier than anything it is waiting for. No-op once the
	/// watcher is closing.
	pub fn notify(&self, due: DateTime<Utc>) {
		let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
		if state.closing {
			return;
		}
		if state.next.is_none_or(|next| due < next) {
			state.next = Some(due);
			drop(state);
			self.shared.wake.notify_one();
		}
	}

	/// Forget the known due time before a load. Any event saved while the
	/// load runs then wakes the loop, whichever side of the load it lands on.
	fn clear_next(&self) {
		self.shared
			.state
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.next = None;
	}

	/// Fold the store's next due time into whatever arrived during the load.
	fn merge_next(&self, next_due: Option<DateTime<Utc>>) {
		let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
		state.next = match (state.next, next_due) {
			(Some(current), Some(loaded)) => Some(current.min(loaded)),
			(current, loaded) => current.or(loaded),
		};
	}

	fn next(&self) -> Option<DateTime<Utc>> {
		self.shared
			.state
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.next
	}
}

pub struct Watcher {
	notifier: Notifier,
	stop: CancellationToken,
	handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Watcher {
	/// Start the loop. `notifier` must be the handle given to everything that
	/// saves events into `storage`.
	pub fn spawn(storage: Arc<Storage>, notifier: Notifier, input: mpsc::Sender<Message>) -> Self {
		let stop = CancellationToken::new();
		let task = WatchLoop {
			storage,
			notifier: notifier.clone(),
			input,
			stop: stop.clone(),
		};
		let handle = tokio::spawn(task.run());

		Self {
			notifier,
			stop,
			handle: tokio::sync::Mutex::new(Some(handle)),
		}
	}

	/// False once the loop has stopped because storage failed.
	pub fn is_healthy(&self) -> bool {
		!self.notifier.shared.failed.load(Ordering::Acquire)
	}

	/// Stop the loop and wait for it to exit. Events loaded but not yet handed
	/// to a worker are written back to storage first.
	pub async fn close(&self) {
		{
			let mut state = self
				.notifier
				.shared
				.state
				.lock()
				.unwrap_or_else(|e| e.into_inner());
			state.closing = true;
		}
		self.stop.cancel();

		if let Some(handle) = self.handle.lock().await.take() {
			if let Err(err) = handle.await {
				error!(error = %err, "watcher task panicked");
			}
		}
	}
}

struct WatchLoop {
	storage: Arc<Storage>,
	notifier: Notifier,
	input: mpsc::Sender<Message>,
	stop: CancellationToken,
}

impl WatchLoop {
	async fn run(self) {
		debug!("watcher started");

		while !self.stop.is_cancelled() {
			self.notifier.clear_next();
			let now = Utc::now();
			let batch = match self.storage.load(now).await {
				Ok(batch) => batch,
				Err(err) => {
					self.notifier.shared.failed.store(true, Ordering::Release);
					error!(error = %err, "failed to load due events, watcher stopped");
					return;
				}
			};
			self.notifier.merge_next(batch.next_due);

			if !batch.events.is_empty() {
				if !self.dispatch(batch.events).await {
					break;
				}
				continue;
			}

			let delay = self
				.notifier
				.next()
				.map(|next| (next - Utc::now()).to_std().unwrap_or_default());
			let timer = async {
				match delay {
					Some(delay) => tokio::time::sleep(delay).await,
					None => std::future::pending().await,
				}
			};

			tokio::select! {
				_ = self.stop.cancelled() => break,
				_ = self.notifier.shared.wake.notified() => {}
				_ = timer => {}
			}
		}

		debug!("watcher stopped");
	}

	/// Hand `events` to the processor in order. Returns false if the loop must
	/// stop, after putting undelivered events back.
	async fn dispatch(&self, events: Vec<Event>) -> bool {
		let mut events = events.into_iter();
		while let Some(event) = events.next() {
			let permit = tokio::select! {
				biased;
				_ = self.stop.cancelled() => None,
				permit = self.input.reserve() => permit.ok(),
			};

			match permit {
				Some(permit) => permit.send(Message::Run(event)),
				None => {
					self.requeue(std::iter::once(event).chain(events)).await;
					return false;
				}
			}
		}
		true
	}

	async fn requeue(&self, events: impl Iterator<Item = Event>) {
		let mut count = 0usize;
		for event in events {
			match self.storage.save(&event).await {
				Ok(()) => count += 1,
				Err(err) => warn!(
					job_id = %event.job.id,
					target = %event.job.target,
					error = %err,
					"failed to return undelivered event to storage, event lost"
				),
			}
		}
		if count > 0 {
			info!(count, "returned undelivered events to storage");
		}
	}
}
