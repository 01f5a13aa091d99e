// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Vesper job scheduler.
//!
//! This crate has no I/O. It provides:
//! - [`Job`], [`Event`] and [`JobOptions`]: the scheduled-work data model
//! - [`codec`]: the tagged binary record format events are persisted in
//! - [`crypto`]: the key ring and AEAD envelope used for at-rest encryption

pub mod codec;
pub mod crypto;
pub mod error;
pub mod types;

pub use codec::{decode_event, encode_event};
pub use crypto::{unwrap_record, wrap_record, KeyRing, RecordKey, KEY_SIZE};
pub use error::{CodecError, CryptoError, DecodeError, EncodeError};
pub use types::{
	age_limit, max_backoff, min_backoff, retry_limit, Event, Job, JobOption, JobOptions,
	DEFAULT_DB_PATH, DEFAULT_MAX_BACKOFF, DEFAULT_MIN_BACKOFF, DEFAULT_RETRY_LIMIT, DEFAULT_WORKERS,
};

/// Encode `event` and wrap it in the storage envelope.
pub fn seal_event(keyring: Option<&KeyRing>, event: &Event) -> Result<Vec<u8>, EncodeError> {
	let record = encode_event(event)?;
	Ok(wrap_record(keyring, &record)?)
}

/// Reverse of [`seal_event`].
pub fn open_event(keyring: Option<&KeyRing>, stored: &[u8]) -> error::Result<Event> {
	let record = unwrap_record(keyring, stored)?;
	Ok(decode_event(&record)?)
}
