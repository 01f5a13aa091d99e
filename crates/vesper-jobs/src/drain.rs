// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Counter-gated shutdown barrier.
//!
//! Work enters the barrier with [`Drain::enter`] and leaves when the returned
//! guard drops. [`Drain::drain`] closes the barrier to new work and waits for
//! everything inside to leave.

use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct State {
	active: usize,
	draining: bool,
}

#[derive(Debug, Default)]
struct Inner {
	state: Mutex<State>,
	idle: Notify,
}

#[derive(Debug, Clone, Default)]
pub struct Drain {
	inner: Arc<Inner>,
}

/// Held while a unit of work is inside the barrier.
#[derive(Debug)]
pub struct DrainGuard {
	inner: Arc<Inner>,
}

impl Drain {
	pub fn new() -> Self {
		Self::default()
	}

	/// Enter the barrier. Returns `None` once draining has begun.
	pub fn enter(&self) -> Option<DrainGuard> {
		let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
		if state.draining {
			return None;
		}
		state.active += 1;
		Some(DrainGuard {
			inner: Arc::clone(&self.inner),
		})
	}

	pub fn is_draining(&self) -> bool {
		self.inner
			.state
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.draining
	}

	pub fn active(&self) -> usize {
		self.inner
			.state
			.lock()
			.unwrap_or_else(|e| e.into_inner())
			.active
	}

	/// Stop admitting work and wait until every guard has been dropped.
	pub async fn drain(&self) {
		loop {
			let idle = self.inner.idle.notified();
			tokio::pin!(idle);
			idle.as_mut().enable();

			{
				let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
				state.draining = true;
				if state.active == 0 {
					return;
				}
			}

			idle.await;
		}
	}
}

impl Drop for DrainGuard {
	fn drop(&mut self) {
		let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
		state.active -= 1;
		if state.active == 0 && state.draining {
			self.inner.idle.notify_waiters();
		}
	}
}
