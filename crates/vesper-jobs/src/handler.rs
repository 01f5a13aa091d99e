// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Handler trait and the target -> handler registry.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use crate::context::JobContext;
use crate::error::{HandlerError, Result, SchedulerError};

/// Runs jobs for one target.
#[async_trait]
pub trait JobHandler: Send + Sync {
	async fn handle(&self, ctx: JobContext, job_id: String, data: Vec<u8>) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
	F: Fn(JobContext, String, Vec<u8>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
	async fn handle(&self, ctx: JobContext, job_id: String, data: Vec<u8>) -> std::result::Result<(), HandlerError> {
		(self)(ctx, job_id, data).await
	}
}

struct Entry {
	registration_id: u64,
	handler: Arc<dyn JobHandler>,
}

#[derive(Default)]
struct Inner {
	handlers: RwLock<HashMap<String, Entry>>,
	next_id: AtomicU64,
}

/// Shared map from target to handler. Lookups take the read lock only.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
	inner: Arc<Inner>,
}

impl HandlerRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register `handler` for `target`. Fails if the target already has one.
	pub fn register(&self, target: &str, handler: Arc<dyn JobHandler>) -> Result<Registration> {
		if target.is_empty() {
			return Err(SchedulerError::EmptyTarget);
		}

		let mut handlers = self
			.inner
			.handlers
			.write()
			.unwrap_or_else(|e| e.into_inner());
		if handlers.contains_key(target) {
			return Err(SchedulerError::DuplicateHandler(target.to_string()));
		}

		let registration_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		handlers.insert(
			target.to_string(),
			Entry {
				registration_id,
				handler,
			},
		);
		debug!(target = %target, "handler registered");

		Ok(Registration {
			registry: self.clone(),
			target: target.to_string(),
			registration_id,
		})
	}

	pub fn get(&self, target: &str) -> Option<Arc<dyn JobHandler>> {
		self.inner
			.handlers
			.read()
			.unwrap_or_else(|e| e.into_inner())
			.get(target)
			.map(|entry| Arc::clone(&entry.handler))
	}

	pub fn targets(&self) -> Vec<String> {
		let mut targets: Vec<_> = self
			.inner
			.handlers
			.read()
			.unwrap_or_else(|e| e.into_inner())
			.keys()
			.cloned()
			.collect();
		targets.sort();
		targets
	}

	fn remove(&self, target: &str, registration_id: u64) {
		let mut handlers = self
			.inner
			.handlers
			.write()
			.unwrap_or_else(|e| e.into_inner());
		if handlers
			.get(target)
			.is_some_and(|entry| entry.registration_id == registration_id)
		{
			handlers.remove(target);
			debug!(target = %target, "handler deregistered");
		}
	}
}

/// Returned by a successful registration. Dropping it keeps the handler
/// registered; call [`Registration::deregister`] to remove it.
#[must_use = "dropping a Registration leaves the handler registered forever"]
pub struct Registration {
	registry: HandlerRegistry,
	target: String,
	registration_id: u64,
}

impl Registration {
	pub fn target(&self) -> &str {
		&self.target
	}

	/// Remove this handler. A handler registered later for the same target is
	/// left alone.
	pub fn deregister(self) {
		self.registry.remove(&self.target, self.registration_id);
	}
}

impl std::fmt::Debug for Registration {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Registration")
			.field("target", &self.target)
			.finish()
	}
}
