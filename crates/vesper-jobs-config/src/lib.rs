// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the Vesper job scheduler.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`VESPER_JOBS_*`)
//!
//! # Usage
//!
//! ```ignore
//! use vesper_jobs_config::load_config_with_file;
//!
//! let config = load_config_with_file("jobs.toml")?;
//! println!("store at {}", config.scheduler.db_path.display());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::VesperJobsConfigLayer;
pub use sections::*;
pub use sources::{load_layer_from, ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default)]
pub struct VesperJobsConfig {
	pub scheduler: SchedulerSettings,
	pub encryption: EncryptionConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`VESPER_JOBS_*`)
/// 2. Config file (`/etc/vesper/jobs.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<VesperJobsConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<VesperJobsConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	];
	load_from_sources(sources)
}

/// Load configuration from environment only.
pub fn load_config_from_env() -> Result<VesperJobsConfig, ConfigError> {
	let sources: Vec<Box<dyn ConfigSource>> = vec![Box::new(DefaultsSource), Box::new(EnvSource)];
	load_from_sources(sources)
}

/// Merge `sources` in precedence order and resolve the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<VesperJobsConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = VesperJobsConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Finalize a merged layer into resolved, validated configuration.
pub fn finalize(layer: VesperJobsConfigLayer) -> Result<VesperJobsConfig, ConfigError> {
	let scheduler = layer.scheduler.unwrap_or_default().finalize()?;
	let encryption = layer.encryption.unwrap_or_default().finalize()?;
	let logging = layer.logging.unwrap_or_default().finalize();

	info!(
		db_path = %scheduler.db_path.display(),
		workers = scheduler.workers,
		retry_limit = scheduler.retry_limit,
		encryption_enabled = encryption.enabled(),
		log_format = ?logging.format,
		"job scheduler configuration loaded"
	);

	Ok(VesperJobsConfig {
		scheduler,
		encryption,
		logging,
	})
}
