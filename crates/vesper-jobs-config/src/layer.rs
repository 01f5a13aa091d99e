// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Partial configuration produced by each source before merging.

use serde::Deserialize;

use crate::sections::{EncryptionConfigLayer, LoggingConfigLayer, SchedulerSettingsLayer};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VesperJobsConfigLayer {
	pub scheduler: Option<SchedulerSettingsLayer>,
	pub encryption: Option<EncryptionConfigLayer>,
	pub logging: Option<LoggingConfigLayer>,
}

impl VesperJobsConfigLayer {
	/// Overlay `other` on top of `self`; fields present in `other` win.
	pub fn merge(&mut self, other: Self) {
		merge_section(&mut self.scheduler, other.scheduler, SchedulerSettingsLayer::merge);
		merge_section(&mut self.encryption, other.encryption, EncryptionConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(base), Some(other)) => merge(base, other),
		(None, Some(other)) => *base = Some(other),
		(_, None) => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_fills_missing_sections() {
		let mut base = VesperJobsConfigLayer::default();
		base.merge(VesperJobsConfigLayer {
			logging: Some(LoggingConfigLayer {
				level: Some("debug".to_string()),
				format: None,
			}),
			..Default::default()
		});
		assert_eq!(base.logging.unwrap().level.as_deref(), Some("debug"));
		assert!(base.scheduler.is_none());
	}

	#[test]
	fn test_merge_keeps_fields_absent_in_overlay() {
		let mut base = VesperJobsConfigLayer {
			scheduler: Some(SchedulerSettingsLayer {
				workers: Some(8),
				db_path: Some("/data/jobs.db".to_string()),
				..Default::default()
			}),
			..Default::default()
		};
		base.merge(VesperJobsConfigLayer {
			scheduler: Some(SchedulerSettingsLayer {
				workers: Some(2),
				..Default::default()
			}),
			..Default::default()
		});
		let scheduler = base.scheduler.unwrap();
		assert_eq!(scheduler.workers, Some(2));
		assert_eq!(scheduler.db_path.as_deref(), Some("/data/jobs.db"));
	}

	#[test]
	fn test_unknown_section_rejected() {
		assert!(toml::from_str::<VesperJobsConfigLayer>("[http]\nport = 1\n").is_err());
	}
}
