// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Retry policy for failed attempts.
//!
//! `backoff = min(max(2^attempt s, min_backoff), max_backoff)`, plus a random
//! jitter of at most `min(min_backoff * attempt, max_backoff)`. The next
//! attempt is due `backoff + jitter` after the failed attempt's due time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use vesper_jobs_core::{Event, JobOptions};

/// Largest exponent used for the exponential term; 2^32 s is already far
/// beyond any sane `max_backoff`.
const MAX_EXPONENT: u32 = 32;

/// Outcome of a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
	/// Persist this event and try again.
	Retry(Event),
	/// The next attempt would exceed `retry_limit`.
	RetryLimitReached,
	/// The next attempt would be due after the job's age limit.
	AgeLimitReached,
	/// The next due time is not representable.
	OutOfRange,
}

pub fn backoff(attempt: u32, options: &JobOptions) -> Duration {
	let exponential = Duration::from_secs(1u64 << attempt.min(MAX_EXPONENT));
	exponential
		.max(options.min_backoff)
		.min(options.max_backoff)
}

/// Upper bound of the jitter added on top of [`backoff`].
pub fn jitter_bound(attempt: u32, options: &JobOptions) -> Duration {
	options
		.min_backoff
		.saturating_mul(attempt)
		.min(options.max_backoff)
}

/// Uniform jitter in `[0, bound]`.
pub fn random_jitter(bound: Duration) -> Duration {
	let bound = u64::try_from(bound.as_nanos()).unwrap_or(u64::MAX);
	Duration::from_nanos(fastrand::u64(0..=bound))
}

/// Decide what follows a failed `event`.
///
/// `jitter` receives the jitter bound and returns the jitter to apply; pass
/// [`random_jitter`] in production.
pub fn next_attempt(event: &Event, jitter: impl FnOnce(Duration) -> Duration) -> RetryDecision {
	let options = &event.job.options;
	let attempt = event.attempt;

	if attempt.saturating_add(1) > options.retry_limit {
		return RetryDecision::RetryLimitReached;
	}

	let bound = jitter_bound(attempt, options);
	let delay = backoff(attempt, options).saturating_add(jitter(bound).min(bound));

	let Some(due) = add(event.due, delay) else {
		return RetryDecision::OutOfRange;
	};

	if let Some(limit) = options.age_limit {
		match add(event.job.due, limit) {
			Some(expires) if due > expires => return RetryDecision::AgeLimitReached,
			_ => {}
		}
	}

	RetryDecision::Retry(event.retry_at(due))
}

/// Whether `event` is already past its job's age limit at `now`.
pub fn is_expired(event: &Event, now: DateTime<Utc>) -> bool {
	event
		.job
		.expires_at()
		.is_some_and(|expires| now > expires)
}

fn add(ts: DateTime<Utc>, delay: Duration) -> Option<DateTime<Utc>> {
	ts.checked_add_signed(chrono::Duration::from_std(delay).ok()?)
}
