// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! At-rest encryption for stored records.
//!
//! Every stored blob starts with an envelope tag so plaintext and encrypted
//! records can never be confused:
//!
//! ```text
//! plain:  0x01 | record
//! sealed: 0x02 | key_id (u32 BE) | nonce (12) | AES-256-GCM ciphertext
//! ```
//!
//! The tag and key id are bound to the ciphertext as associated data. Sealing
//! always uses the key ring's default key; opening looks the key up by the
//! embedded id, so retired keys keep old records readable after rotation.

use aes_gcm::{
	aead::{Aead, KeyInit, OsRng, Payload},
	Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Size of encryption keys in bytes (256 bits for AES-256).
pub const KEY_SIZE: usize = 32;

/// Size of AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

pub const ENVELOPE_PLAIN: u8 = 0x01;
pub const ENVELOPE_SEALED: u8 = 0x02;

const SEALED_HEADER_LEN: usize = 1 + 4 + NONCE_SIZE;

/// A 256-bit record key. Zeroed on drop and never printed.
#[derive(Clone)]
pub struct RecordKey(Zeroizing<[u8; KEY_SIZE]>);

impl RecordKey {
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
		if bytes.len() != KEY_SIZE {
			return Err(CryptoError::InvalidKeySize {
				expected: KEY_SIZE,
				actual: bytes.len(),
			});
		}
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		key.copy_from_slice(bytes);
		Ok(Self(key))
	}

	/// Parse a key from 64 hex characters.
	pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
		let bytes = Zeroizing::new(
			hex::decode(encoded.trim()).map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?,
		);
		Self::from_bytes(&bytes)
	}

	/// Generate a random key.
	pub fn generate() -> Self {
		let mut key = Zeroizing::new([0u8; KEY_SIZE]);
		OsRng.fill_bytes(key.as_mut());
		Self(key)
	}

	pub fn to_hex(&self) -> Zeroizing<String> {
		Zeroizing::new(hex::encode(self.0.as_slice()))
	}

	fn cipher(&self) -> Aes256Gcm {
		Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.0.as_slice()))
	}
}

impl fmt::Debug for RecordKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("RecordKey([REDACTED])")
	}
}

/// Keys by id plus the id used for new records.
#[derive(Clone, Debug)]
pub struct KeyRing {
	default_key_id: u32,
	keys: BTreeMap<u32, RecordKey>,
}

impl KeyRing {
	pub fn new(default_key_id: u32, keys: BTreeMap<u32, RecordKey>) -> Result<Self, CryptoError> {
		if !keys.contains_key(&default_key_id) {
			return Err(CryptoError::MissingDefaultKey(default_key_id));
		}
		Ok(Self {
			default_key_id,
			keys,
		})
	}

	/// A ring holding a single key, which is also the default.
	pub fn single(key_id: u32, key: RecordKey) -> Self {
		Self {
			default_key_id: key_id,
			keys: BTreeMap::from([(key_id, key)]),
		}
	}

	pub fn default_key_id(&self) -> u32 {
		self.default_key_id
	}

	pub fn key_ids(&self) -> impl Iterator<Item = u32> + '_ {
		self.keys.keys().copied()
	}

	fn default_key(&self) -> Result<&RecordKey, CryptoError> {
		self.keys
			.get(&self.default_key_id)
			.ok_or(CryptoError::MissingDefaultKey(self.default_key_id))
	}

	/// Encrypt `plaintext` under the default key.
	pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
		let key = self.default_key()?;
		let mut header = [0u8; SEALED_HEADER_LEN];
		header[0] = ENVELOPE_SEALED;
		header[1..5].copy_from_slice(&self.default_key_id.to_be_bytes());
		OsRng.fill_bytes(&mut header[5..]);

		let nonce = Nonce::from_slice(&header[5..]);
		let ciphertext = key
			.cipher()
			.encrypt(
				nonce,
				Payload {
					msg: plaintext,
					aad: &header[..5],
				},
			)
			.map_err(|e| CryptoError::Encryption(e.to_string()))?;

		let mut sealed = Vec::with_capacity(SEALED_HEADER_LEN + ciphertext.len());
		sealed.extend_from_slice(&header);
		sealed.extend_from_slice(&ciphertext);
		Ok(sealed)
	}

	/// Decrypt a sealed envelope produced by [`KeyRing::seal`].
	pub fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
		if sealed.len() < SEALED_HEADER_LEN {
			return Err(CryptoError::TruncatedEnvelope);
		}
		if sealed[0] != ENVELOPE_SEALED {
			return Err(CryptoError::UnknownEnvelope(sealed[0]));
		}

		let key_id = u32::from_be_bytes([sealed[1], sealed[2], sealed[3], sealed[4]]);
		let key = self.keys.get(&key_id).ok_or(CryptoError::UnknownKey(key_id))?;
		let nonce = Nonce::from_slice(&sealed[5..SEALED_HEADER_LEN]);

		let plaintext = key
			.cipher()
			.decrypt(
				nonce,
				Payload {
					msg: &sealed[SEALED_HEADER_LEN..],
					aad: &sealed[..5],
				},
			)
			.map_err(|_| CryptoError::Decryption { key_id })?;

		Ok(Zeroizing::new(plaintext))
	}
}

/// Wrap an encoded record for storage, sealing it when a key ring is given.
pub fn wrap_record(keyring: Option<&KeyRing>, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
	match keyring {
		Some(ring) => ring.seal(record),
		None => {
			let mut plain = Vec::with_capacity(1 + record.len());
			plain.push(ENVELOPE_PLAIN);
			plain.extend_from_slice(record);
			Ok(plain)
		}
	}
}

/// Undo [`wrap_record`].
///
/// The stored envelope must match the configuration: a sealed record needs a
/// key ring holding its key, and a plaintext record is refused while a key
/// ring is configured.
pub fn unwrap_record(
	keyring: Option<&KeyRing>,
	stored: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
	let tag = *stored.first().ok_or(CryptoError::TruncatedEnvelope)?;
	match (tag, keyring) {
		(ENVELOPE_PLAIN, None) => Ok(Zeroizing::new(stored[1..].to_vec())),
		(ENVELOPE_PLAIN, Some(_)) => Err(CryptoError::UnexpectedPlaintext),
		(ENVELOPE_SEALED, Some(ring)) => ring.open(stored),
		(ENVELOPE_SEALED, None) => Err(CryptoError::KeyRingNotConfigured),
		(other, _) => Err(CryptoError::UnknownEnvelope(other)),
	}
}
