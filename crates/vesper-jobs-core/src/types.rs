// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Store location used when none is configured.
pub const DEFAULT_DB_PATH: &str = "./vesper-jobs.db";
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Retry policy attached to a job at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobOptions {
	/// Maximum number of attempts, including the first one.
	pub retry_limit: u32,
	pub min_backoff: Duration,
	pub max_backoff: Duration,
	/// Abandon the job once this much time has passed since its original due time.
	pub age_limit: Option<Duration>,
}

impl Default for JobOptions {
	fn default() -> Self {
		Self {
			retry_limit: DEFAULT_RETRY_LIMIT,
			min_backoff: DEFAULT_MIN_BACKOFF,
			max_backoff: DEFAULT_MAX_BACKOFF,
			age_limit: None,
		}
	}
}

impl JobOptions {
	/// Apply `modifiers` in order on top of `self`.
	pub fn with(mut self, modifiers: &[JobOption]) -> Self {
		for modifier in modifiers {
			modifier.apply(&mut self);
		}
		self
	}
}

/// A single modifier of [`JobOptions`], passed as a list to `at`/`after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOption {
	RetryLimit(u32),
	MinBackoff(Duration),
	MaxBackoff(Duration),
	AgeLimit(Duration),
}

impl JobOption {
	pub fn apply(&self, options: &mut JobOptions) {
		match *self {
			JobOption::RetryLimit(limit) => options.retry_limit = limit,
			JobOption::MinBackoff(backoff) => options.min_backoff = backoff,
			JobOption::MaxBackoff(backoff) => options.max_backoff = backoff,
			JobOption::AgeLimit(limit) => options.age_limit = Some(limit),
		}
	}
}

pub fn retry_limit(limit: u32) -> JobOption {
	JobOption::RetryLimit(limit)
}

pub fn min_backoff(backoff: Duration) -> JobOption {
	JobOption::MinBackoff(backoff)
}

pub fn max_backoff(backoff: Duration) -> JobOption {
	JobOption::MaxBackoff(backoff)
}

pub fn age_limit(limit: Duration) -> JobOption {
	JobOption::AgeLimit(limit)
}

/// A unit of scheduled work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
	/// UUID v4 string, assigned at creation.
	pub id: String,
	/// Key of the registered handler that runs this job.
	pub target: String,
	/// Original due time. Never changes across retries.
	pub due: DateTime<Utc>,
	/// Opaque payload handed to the handler.
	pub data: Vec<u8>,
	pub options: JobOptions,
}

impl Job {
	pub fn new(
		target: impl Into<String>,
		due: DateTime<Utc>,
		data: impl Into<Vec<u8>>,
		options: JobOptions,
	) -> Self {
		Self {
			id: uuid::Uuid::new_v4().to_string(),
			target: target.into(),
			due,
			data: data.into(),
			options,
		}
	}

	/// Instant after which the job is abandoned, if it has an age limit.
	pub fn expires_at(&self) -> Option<DateTime<Utc>> {
		let limit = chrono::Duration::from_std(self.options.age_limit?).ok()?;
		self.due.checked_add_signed(limit)
	}
}

/// One scheduling attempt of a [`Job`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
	pub job: Job,
	/// 1-based attempt counter.
	pub attempt: u32,
	/// Effective due time of this attempt.
	pub due: DateTime<Utc>,
}

impl Event {
	/// The first attempt of `job`, due at the job's own due time.
	pub fn first(job: Job) -> Self {
		let due = job.due;
		Self {
			job,
			attempt: 1,
			due,
		}
	}

	/// The attempt that follows this one, due at `due`.
	pub fn retry_at(&self, due: DateTime<Utc>) -> Self {
		Self {
			job: self.job.clone(),
			attempt: self.attempt.saturating_add(1),
			due,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_options() {
		let options = JobOptions::default();
		assert_eq!(options.retry_limit, 3);
		assert_eq!(options.min_backoff, Duration::from_secs(1));
		assert_eq!(options.max_backoff, Duration::from_secs(60));
		assert!(options.age_limit.is_none());
	}

	#[test]
	fn modifiers_apply_in_order() {
		let options = JobOptions::default().with(&[
			retry_limit(10),
			min_backoff(Duration::from_millis(5)),
			max_backoff(Duration::from_millis(50)),
			age_limit(Duration::from_secs(30)),
			retry_limit(7),
		]);
		assert_eq!(options.retry_limit, 7);
		assert_eq!(options.min_backoff, Duration::from_millis(5));
		assert_eq!(options.max_backoff, Duration::from_millis(50));
		assert_eq!(options.age_limit, Some(Duration::from_secs(30)));
	}

	#[test]
	fn new_jobs_get_unique_ids() {
		let now = Utc::now();
		let a = Job::new("email", now, b"a".to_vec(), JobOptions::default());
		let b = Job::new("email", now, b"a".to_vec(), JobOptions::default());
		assert_ne!(a.id, b.id);
	}

	#[test]
	fn first_event_inherits_job_due() {
		let job = Job::new("email", Utc::now(), Vec::new(), JobOptions::default());
		let event = Event::first(job.clone());
		assert_eq!(event.attempt, 1);
		assert_eq!(event.due, job.due);
	}

	#[test]
	fn retry_keeps_job_and_bumps_attempt() {
		let job = Job::new("email", Utc::now(), Vec::new(), JobOptions::default());
		let event = Event::first(job);
		let later = event.due + chrono::Duration::seconds(5);
		let retry = event.retry_at(later);
		assert_eq!(retry.attempt, 2);
		assert_eq!(retry.due, later);
		assert_eq!(retry.job, event.job);
	}

	#[test]
	fn expires_at_requires_age_limit() {
		let job = Job::new("email", Utc::now(), Vec::new(), JobOptions::default());
		assert!(job.expires_at().is_none());

		let options = JobOptions::default().with(&[age_limit(Duration::from_secs(10))]);
		let job = Job::new("email", Utc::now(), Vec::new(), options);
		assert_eq!(job.expires_at(), Some(job.due + chrono::Duration::seconds(10)));
	}
}
