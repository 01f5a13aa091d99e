// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Embedded, crash-durable job scheduler.
//!
//! Jobs are persisted to a local SQLite file the moment they are scheduled,
//! a single watcher wakes exactly when work becomes due, and a fixed pool of
//! workers runs the registered handler for each job. Failed jobs are retried
//! with exponential backoff and jitter until their retry or age limit runs
//! out. Records can be encrypted at rest with a rotatable key ring.

pub mod context;
pub mod drain;
pub mod error;
pub mod handler;
pub mod processor;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod watcher;

pub use context::JobContext;
pub use drain::{Drain, DrainGuard};
pub use error::{HandlerError, Result, SchedulerError, StorageError, StorageResult};
pub use handler::{HandlerRegistry, JobHandler, Registration};
pub use retry::RetryDecision;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use storage::{LoadBatch, Storage};
pub use tokio_util::sync::CancellationToken;
pub use vesper_jobs_core::{
	age_limit, max_backoff, min_backoff, retry_limit, Event, Job, JobOption, JobOptions, KeyRing,
	RecordKey, DEFAULT_DB_PATH, DEFAULT_MAX_BACKOFF, DEFAULT_MIN_BACKOFF, DEFAULT_RETRY_LIMIT,
	DEFAULT_WORKERS,
};
