// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for record encoding and at-rest encryption.

use thiserror::Error;

/// Errors from the binary record codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
	#[error("record truncated: needed {needed} more bytes")]
	Truncated { needed: usize },

	#[error("unsupported record version {0}")]
	UnsupportedVersion(u8),

	#[error("record is missing required field {0}")]
	MissingField(&'static str),

	#[error("field {field} has invalid length {len}")]
	InvalidLength { field: &'static str, len: usize },

	#[error("field {0} is not valid UTF-8")]
	InvalidUtf8(&'static str),

	#[error("timestamp out of range: {0}")]
	TimestampOutOfRange(String),

	#[error("field {field} too large: {len} bytes")]
	FieldTooLarge { field: &'static str, len: usize },
}

/// Errors from sealing and opening encrypted records.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed for key {key_id}: authentication failed")]
	Decryption { key_id: u32 },

	#[error("record was encrypted with key {0}, which is not in the key ring")]
	UnknownKey(u32),

	#[error("record is encrypted but no encryption keys are configured")]
	KeyRingNotConfigured,

	#[error("record is stored in plaintext but encryption is configured")]
	UnexpectedPlaintext,

	#[error("unknown record envelope tag {0:#04x}")]
	UnknownEnvelope(u8),

	#[error("encrypted envelope truncated")]
	TruncatedEnvelope,

	#[error("invalid key size: expected {expected}, got {actual}")]
	InvalidKeySize { expected: usize, actual: usize },

	#[error("invalid key encoding: {0}")]
	InvalidKeyEncoding(String),

	#[error("default key {0} is not in the key set")]
	MissingDefaultKey(u32),
}

/// Failure to turn an event into a storable blob.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
	#[error("record encode failed: {0}")]
	Codec(#[from] CodecError),

	#[error("record encrypt failed: {0}")]
	Crypto(#[from] CryptoError),
}

/// Anything that prevents a stored blob from turning back into an event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
	#[error("record decode failed: {0}")]
	Codec(#[from] CodecError),

	#[error("record decrypt failed: {0}")]
	Crypto(#[from] CryptoError),
}

pub type Result<T> = std::result::Result<T, DecodeError>;
