// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! At-rest encryption section.
//!
//! ```toml
//! [encryption]
//! default_key_id = 2
//!
//! [encryption.keys]
//! 1 = "<64 hex chars>"
//! 2 = "<64 hex chars>"
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use vesper_jobs_core::{KeyRing, RecordKey};
use zeroize::Zeroizing;

use crate::error::ConfigError;

#[derive(Clone, Default, Deserialize, PartialEq)]
pub struct EncryptionConfigLayer {
	pub default_key_id: Option<u32>,
	/// Key id (as a string, TOML tables are string-keyed) to hex-encoded key.
	pub keys: Option<BTreeMap<String, Zeroizing<String>>>,
}

impl fmt::Debug for EncryptionConfigLayer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EncryptionConfigLayer")
			.field("default_key_id", &self.default_key_id)
			.field(
				"keys",
				&self.keys.as_ref().map(|keys| keys.keys().collect::<Vec<_>>()),
			)
			.finish()
	}
}

impl EncryptionConfigLayer {
	/// Replaces the whole key set when `other` carries one, so a key set
	/// from the environment never mixes with one from the file.
	pub fn merge(&mut self, other: Self) {
		if other.default_key_id.is_some() {
			self.default_key_id = other.default_key_id;
		}
		if other.keys.is_some() {
			self.keys = other.keys;
		}
	}

	pub fn finalize(self) -> Result<EncryptionConfig, ConfigError> {
		let keys = self.keys.unwrap_or_default();

		let default_key_id = match (self.default_key_id, keys.is_empty()) {
			(None, true) => return Ok(EncryptionConfig::default()),
			(Some(_), true) => {
				return Err(ConfigError::Validation(
					"encryption.default_key_id is set but encryption.keys is empty".to_string(),
				))
			}
			(None, false) => {
				return Err(ConfigError::Validation(
					"encryption.keys is set but encryption.default_key_id is missing".to_string(),
				))
			}
			(Some(id), false) => id,
		};

		let mut ring = BTreeMap::new();
		for (id, encoded) in &keys {
			let key_id: u32 = id.trim().parse().map_err(|_| ConfigError::InvalidValue {
				key: "encryption.keys".to_string(),
				message: format!("key id '{id}' is not a u32"),
			})?;
			let key = RecordKey::from_hex(encoded.trim()).map_err(|e| ConfigError::InvalidValue {
				key: format!("encryption.keys.{key_id}"),
				message: e.to_string(),
			})?;
			ring.insert(key_id, key);
		}

		let keyring = KeyRing::new(default_key_id, ring).map_err(|e| ConfigError::Validation(e.to_string()))?;
		Ok(EncryptionConfig {
			keyring: Some(keyring),
		})
	}
}

/// Parse `id:hex,id:hex` as used by `VESPER_JOBS_ENCRYPTION_KEYS`.
pub fn parse_key_list(
	name: &str,
	value: &str,
) -> Result<BTreeMap<String, Zeroizing<String>>, ConfigError> {
	let mut keys = BTreeMap::new();
	for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
		let Some((id, encoded)) = entry.split_once(':') else {
			return Err(ConfigError::InvalidValue {
				key: name.to_string(),
				message: "expected entries of the form <id>:<hex>".to_string(),
			});
		};
		keys.insert(id.trim().to_string(), Zeroizing::new(encoded.trim().to_string()));
	}
	Ok(keys)
}

#[derive(Debug, Clone, Default)]
pub struct EncryptionConfig {
	/// `None` means records are stored in plaintext.
	pub keyring: Option<KeyRing>,
}

impl EncryptionConfig {
	pub fn enabled(&self) -> bool {
		self.keyring.is_some()
	}
}
