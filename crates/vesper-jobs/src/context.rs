// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

/// Passed to every handler invocation.
///
/// The token is the one given to [`crate::Scheduler::start`]. The scheduler
/// never cancels it; handlers should still watch it so the owner of the token
/// can cut callbacks short.
#[derive(Debug, Clone)]
pub struct JobContext {
	pub job_id: String,
	pub target: String,
	/// 1-based attempt number.
	pub attempt: u32,
	/// Due time of this attempt.
	pub due: DateTime<Utc>,
	pub cancellation_token: CancellationToken,
}

impl JobContext {
	pub fn is_cancelled(&self) -> bool {
		self.cancellation_token.is_cancelled()
	}

	pub fn is_retry(&self) -> bool {
		self.attempt > 1
	}
}
