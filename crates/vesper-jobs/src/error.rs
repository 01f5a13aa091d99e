// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;
use vesper_jobs_core::{DecodeError, EncodeError};

/// Errors from the durable event store.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// A stored record could not be decrypted or decoded.
	#[error("stored record unreadable: {0}")]
	Decode(#[from] DecodeError),

	#[error("record could not be stored: {0}")]
	Encode(#[from] EncodeError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors returned synchronously by the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
	#[error("job target must not be empty")]
	EmptyTarget,

	#[error("a handler is already registered for target {0:?}")]
	DuplicateHandler(String),

	#[error("scheduler has not been started")]
	NotStarted,

	#[error("scheduler has already been started")]
	AlreadyStarted,

	#[error("due time out of range")]
	DueOutOfRange,

	#[error(transparent)]
	Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Error returned by a job handler. Drives the retry policy; never reaches the
/// caller that scheduled the job.
#[derive(Debug, Error)]
pub enum HandlerError {
	#[error("{0}")]
	Failed(String),

	#[error(transparent)]
	Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
	pub fn failed(message: impl Into<String>) -> Self {
		HandlerError::Failed(message.into())
	}
}
