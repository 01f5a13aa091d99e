// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scheduler configuration section.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vesper_jobs_core::{
	JobOptions, DEFAULT_DB_PATH, DEFAULT_MAX_BACKOFF, DEFAULT_MIN_BACKOFF, DEFAULT_RETRY_LIMIT,
	DEFAULT_WORKERS,
};

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSettingsLayer {
	pub db_path: Option<String>,
	pub workers: Option<usize>,
	pub retry_limit: Option<u32>,
	pub min_backoff_ms: Option<u64>,
	pub max_backoff_ms: Option<u64>,
}

impl SchedulerSettingsLayer {
	pub fn merge(&mut self, other: Self) {
		if other.db_path.is_some() {
			self.db_path = other.db_path;
		}
		if other.workers.is_some() {
			self.workers = other.workers;
		}
		if other.retry_limit.is_some() {
			self.retry_limit = other.retry_limit;
		}
		if other.min_backoff_ms.is_some() {
			self.min_backoff_ms = other.min_backoff_ms;
		}
		if other.max_backoff_ms.is_some() {
			self.max_backoff_ms = other.max_backoff_ms;
		}
	}

	pub fn finalize(self) -> Result<SchedulerSettings, ConfigError> {
		let config = SchedulerSettings {
			db_path: PathBuf::from(self.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string())),
			workers: self.workers.unwrap_or(DEFAULT_WORKERS),
			retry_limit: self.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT),
			min_backoff: self
				.min_backoff_ms
				.map_or(DEFAULT_MIN_BACKOFF, Duration::from_millis),
			max_backoff: self
				.max_backoff_ms
				.map_or(DEFAULT_MAX_BACKOFF, Duration::from_millis),
		};
		config.validate()?;
		Ok(config)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
	pub db_path: PathBuf,
	pub workers: usize,
	pub retry_limit: u32,
	pub min_backoff: Duration,
	pub max_backoff: Duration,
}

impl SchedulerSettings {
	/// Options for jobs scheduled without explicit modifiers.
	pub fn job_defaults(&self) -> JobOptions {
		JobOptions {
			retry_limit: self.retry_limit,
			min_backoff: self.min_backoff,
			max_backoff: self.max_backoff,
			age_limit: None,
		}
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.db_path.as_os_str().is_empty() {
			return Err(ConfigError::Validation("scheduler.db_path must not be empty".to_string()));
		}
		if self.workers == 0 {
			return Err(ConfigError::Validation("scheduler.workers must be at least 1".to_string()));
		}
		if self.min_backoff > self.max_backoff {
			return Err(ConfigError::Validation(format!(
				"scheduler.min_backoff_ms ({}) exceeds scheduler.max_backoff_ms ({})",
				self.min_backoff.as_millis(),
				self.max_backoff.as_millis()
			)));
		}
		Ok(())
	}
}

impl Default for SchedulerSettings {
	fn default() -> Self {
		Self {
			db_path: PathBuf::from(DEFAULT_DB_PATH),
			workers: DEFAULT_WORKERS,
			retry_limit: DEFAULT_RETRY_LIMIT,
			min_backoff: DEFAULT_MIN_BACKOFF,
			max_backoff: DEFAULT_MAX_BACKOFF,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_layer_finalize_defaults() {
		let config = SchedulerSettingsLayer::default().finalize().unwrap();
		assert_eq!(config, SchedulerSettings::default());
		assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
		assert_eq!(config.workers, DEFAULT_WORKERS);
		assert_eq!(config.job_defaults(), JobOptions::default());
	}

	#[test]
	fn test_merge_overwrites_only_present_fields() {
		let mut base = SchedulerSettingsLayer {
			db_path: Some("/var/lib/vesper/jobs.db".to_string()),
			workers: Some(8),
			..Default::default()
		};
		base.merge(SchedulerSettingsLayer {
			workers: Some(2),
			retry_limit: Some(5),
			..Default::default()
		});
		assert_eq!(base.db_path.as_deref(), Some("/var/lib/vesper/jobs.db"));
		assert_eq!(base.workers, Some(2));
		assert_eq!(base.retry_limit, Some(5));
	}

	#[test]
	fn test_zero_workers_rejected() {
		let layer = SchedulerSettingsLayer {
			workers: Some(0),
			..Default::default()
		};
		assert!(matches!(layer.finalize(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_inverted_backoff_rejected() {
		let layer = SchedulerSettingsLayer {
			min_backoff_ms: Some(5_000),
			max_backoff_ms: Some(1_000),
			..Default::default()
		};
		let err = layer.finalize().unwrap_err();
		assert!(err.to_string().contains("min_backoff_ms"));
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let layer: SchedulerSettingsLayer = toml::from_str("workers = 16\nmin_backoff_ms = 250\n").unwrap();
		assert_eq!(layer.workers, Some(16));
		assert_eq!(layer.min_backoff_ms, Some(250));
		assert!(layer.db_path.is_none());
	}
}
