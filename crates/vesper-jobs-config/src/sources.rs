// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, TOML files and environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::VesperJobsConfigLayer;
use crate::sections::{
	parse_key_list, EncryptionConfigLayer, LogFormat, LoggingConfigLayer, SchedulerSettingsLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<VesperJobsConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<VesperJobsConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(VesperJobsConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/vesper/jobs.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<VesperJobsConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(VesperJobsConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: VesperJobsConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: VESPER_JOBS_<FIELD>, VESPER_JOBS_<SECTION>_<FIELD> for the
/// encryption and logging sections.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<VesperJobsConfigLayer, ConfigError> {
		debug!("loading environment variables");
		load_layer_from(|name| std::env::var(name).ok())
	}
}

/// Build a layer from `lookup`, which returns the value of an environment
/// variable. Empty values count as unset.
pub fn load_layer_from(
	lookup: impl Fn(&str) -> Option<String>,
) -> Result<VesperJobsConfigLayer, ConfigError> {
	let env = Env { lookup };
	Ok(VesperJobsConfigLayer {
		scheduler: Some(SchedulerSettingsLayer {
			db_path: env.var("VESPER_JOBS_DB_PATH"),
			workers: env.parse("VESPER_JOBS_WORKERS")?,
			retry_limit: env.parse("VESPER_JOBS_RETRY_LIMIT")?,
			min_backoff_ms: env.parse("VESPER_JOBS_MIN_BACKOFF_MS")?,
			max_backoff_ms: env.parse("VESPER_JOBS_MAX_BACKOFF_MS")?,
		}),
		encryption: Some(EncryptionConfigLayer {
			default_key_id: env.parse("VESPER_JOBS_ENCRYPTION_DEFAULT_KEY_ID")?,
			keys: env
				.var("VESPER_JOBS_ENCRYPTION_KEYS")
				.map(|v| parse_key_list("VESPER_JOBS_ENCRYPTION_KEYS", &v))
				.transpose()?,
		}),
		logging: Some(LoggingConfigLayer {
			level: env.var("VESPER_JOBS_LOG_LEVEL"),
			format: env
				.var("VESPER_JOBS_LOG_FORMAT")
				.map(|v| LogFormat::from_str(&v))
				.transpose()?,
		}),
	})
}

struct Env<F> {
	lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|s| !s.is_empty())
	}

	fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid {} value '{v}'", std::any::type_name::<T>()),
			}),
			None => Ok(None),
		}
	}
}
