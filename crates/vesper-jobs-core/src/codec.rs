// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Binary record format for persisted events.
//!
//! A record is a version byte followed by tagged fields:
//!
//! ```text
//! version (u8) | tag (u8) | len (u32 BE) | value | tag | len | value | ...
//! ```
//!
//! Tags are never reused. Readers skip tags they do not know, so fields can be
//! added without breaking older readers as long as the required ones stay.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::CodecError;
use crate::types::{Event, Job, JobOptions};

pub const RECORD_VERSION: u8 = 1;

const FIELD_HEADER_LEN: usize = 5;

const TAG_JOB_ID: u8 = 0x01;
const TAG_TARGET: u8 = 0x02;
const TAG_JOB_DUE: u8 = 0x03;
const TAG_ATTEMPT: u8 = 0x04;
const TAG_EVENT_DUE: u8 = 0x05;
const TAG_DATA: u8 = 0x06;
const TAG_RETRY_LIMIT: u8 = 0x07;
const TAG_MIN_BACKOFF: u8 = 0x08;
const TAG_MAX_BACKOFF: u8 = 0x09;
const TAG_AGE_LIMIT: u8 = 0x0A;

/// Nanoseconds since the Unix epoch.
pub fn to_unix_nanos(ts: DateTime<Utc>) -> Result<i64, CodecError> {
	ts.timestamp_nanos_opt()
		.ok_or_else(|| CodecError::TimestampOutOfRange(ts.to_rfc3339()))
}

pub fn from_unix_nanos(nanos: i64) -> Result<DateTime<Utc>, CodecError> {
	let secs = nanos.div_euclid(1_000_000_000);
	let subsec = nanos.rem_euclid(1_000_000_000) as u32;
	DateTime::from_timestamp(secs, subsec)
		.ok_or_else(|| CodecError::TimestampOutOfRange(nanos.to_string()))
}

fn duration_nanos(d: Duration) -> u64 {
	u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn put_field(buf: &mut BytesMut, tag: u8, field: &'static str, value: &[u8]) -> Result<(), CodecError> {
	let len = u32::try_from(value.len()).map_err(|_| CodecError::FieldTooLarge {
		field,
		len: value.len(),
	})?;
	buf.put_u8(tag);
	buf.put_u32(len);
	buf.put_slice(value);
	Ok(())
}

pub fn encode_event(event: &Event) -> Result<Vec<u8>, CodecError> {
	let job = &event.job;
	let mut buf = BytesMut::with_capacity(
		64 + job.id.len() + job.target.len() + job.data.len() + 10 * FIELD_HEADER_LEN,
	);

	buf.put_u8(RECORD_VERSION);
	put_field(&mut buf, TAG_JOB_ID, "job_id", job.id.as_bytes())?;
	put_field(&mut buf, TAG_TARGET, "target", job.target.as_bytes())?;
	put_field(&mut buf, TAG_JOB_DUE, "job_due", &to_unix_nanos(job.due)?.to_be_bytes())?;
	put_field(&mut buf, TAG_ATTEMPT, "attempt", &event.attempt.to_be_bytes())?;
	put_field(&mut buf, TAG_EVENT_DUE, "event_due", &to_unix_nanos(event.due)?.to_be_bytes())?;
	put_field(&mut buf, TAG_DATA, "data", &job.data)?;

	let options = &job.options;
	put_field(&mut buf, TAG_RETRY_LIMIT, "retry_limit", &options.retry_limit.to_be_bytes())?;
	put_field(
		&mut buf,
		TAG_MIN_BACKOFF,
		"min_backoff",
		&duration_nanos(options.min_backoff).to_be_bytes(),
	)?;
	put_field(
		&mut buf,
		TAG_MAX_BACKOFF,
		"max_backoff",
		&duration_nanos(options.max_backoff).to_be_bytes(),
	)?;
	if let Some(age_limit) = options.age_limit {
		put_field(&mut buf, TAG_AGE_LIMIT, "age_limit", &duration_nanos(age_limit).to_be_bytes())?;
	}

	Ok(buf.to_vec())
}

fn ensure(buf: &[u8], len: usize) -> Result<(), CodecError> {
	if buf.len() < len {
		return Err(CodecError::Truncated {
			needed: len - buf.len(),
		});
	}
	Ok(())
}

fn fixed<const N: usize>(field: &'static str, value: &[u8]) -> Result<[u8; N], CodecError> {
	value.try_into().map_err(|_| CodecError::InvalidLength {
		field,
		len: value.len(),
	})
}

fn utf8(field: &'static str, value: &[u8]) -> Result<String, CodecError> {
	String::from_utf8(value.to_vec()).map_err(|_| CodecError::InvalidUtf8(field))
}

pub fn decode_event(data: &[u8]) -> Result<Event, CodecError> {
	let mut buf = data;
	ensure(buf, 1)?;
	let version = buf.get_u8();
	if version != RECORD_VERSION {
		return Err(CodecError::UnsupportedVersion(version));
	}

	let mut id = None;
	let mut target = None;
	let mut job_due = None;
	let mut attempt = None;
	let mut event_due = None;
	let mut payload = Vec::new();
	let mut options = JobOptions::default();

	while buf.has_remaining() {
		ensure(buf, FIELD_HEADER_LEN)?;
		let tag = buf.get_u8();
		let len = buf.get_u32() as usize;
		ensure(buf, len)?;
		let (value, rest) = buf.split_at(len);
		buf = rest;

		match tag {
			TAG_JOB_ID => id = Some(utf8("job_id", value)?),
			TAG_TARGET => target = Some(utf8("target", value)?),
			TAG_JOB_DUE => {
				job_due = Some(from_unix_nanos(i64::from_be_bytes(fixed("job_due", value)?))?)
			}
			TAG_ATTEMPT => attempt = Some(u32::from_be_bytes(fixed("attempt", value)?)),
			TAG_EVENT_DUE => {
				event_due = Some(from_unix_nanos(i64::from_be_bytes(fixed("event_due", value)?))?)
			}
			TAG_DATA => payload = value.to_vec(),
			TAG_RETRY_LIMIT => {
				options.retry_limit = u32::from_be_bytes(fixed("retry_limit", value)?)
			}
			TAG_MIN_BACKOFF => {
				options.min_backoff =
					Duration::from_nanos(u64::from_be_bytes(fixed("min_backoff", value)?))
			}
			TAG_MAX_BACKOFF => {
				options.max_backoff =
					Duration::from_nanos(u64::from_be_bytes(fixed("max_backoff", value)?))
			}
			TAG_AGE_LIMIT => {
				options.age_limit = Some(Duration::from_nanos(u64::from_be_bytes(fixed(
					"age_limit",
					value,
				)?)))
			}
			_ => {}
		}
	}

	let job = Job {
		id: id.ok_or(CodecError::MissingField("job_id"))?,
		target: target.ok_or(CodecError::MissingField("target"))?,
		due: job_due.ok_or(CodecError::MissingField("job_due"))?,
		data: payload,
		options,
	};

	Ok(Event {
		job,
		attempt: attempt.ok_or(CodecError::MissingField("attempt"))?,
		due: event_due.ok_or(CodecError::MissingField("event_due"))?,
	})
}
