// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sections.

mod encryption;
mod logging;
mod scheduler;

pub use encryption::{parse_key_list, EncryptionConfig, EncryptionConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use scheduler::{SchedulerSettings, SchedulerSettingsLayer};
