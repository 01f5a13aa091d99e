// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Vesper job scheduler binary.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};

mod commands;
mod logging;

/// Vesper jobs - embedded, crash-durable job scheduler.
#[derive(Parser, Debug)]
#[command(name = "vesper-jobs", about = "Embedded, crash-durable job scheduler", version)]
struct Args {
	/// TOML config file (defaults, then this file, then VESPER_JOBS_* variables)
	#[arg(long, short, global = true, env = "VESPER_JOBS_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the scheduler with the built-in `log` and `fail` handlers until Ctrl-C
	Run,
	/// Persist a one-off job into the store
	Schedule(ScheduleArgs),
	/// Show pending jobs without removing them
	Inspect {
		/// Number of events to list
		#[arg(long, default_value_t = 20)]
		limit: u32,
		/// Print JSON instead of text
		#[arg(long)]
		json: bool,
	},
	/// Print a fresh 32-byte encryption key as hex
	Keygen,
	/// Show version and build information
	Version,
}

#[derive(ClapArgs, Debug)]
struct ScheduleArgs {
	/// Handler target
	#[arg(long)]
	target: String,

	/// Run after this delay, e.g. `30s` or `5m`
	#[arg(long = "in", value_parser = humantime::parse_duration, conflicts_with = "at", required_unless_present = "at")]
	delay: Option<Duration>,

	/// Run at this RFC 3339 timestamp
	#[arg(long, value_parser = parse_timestamp)]
	at: Option<DateTime<Utc>>,

	/// Payload handed to the handler
	#[arg(long, default_value = "")]
	data: String,

	#[arg(long)]
	retry_limit: Option<u32>,

	#[arg(long, value_parser = humantime::parse_duration)]
	min_backoff: Option<Duration>,

	#[arg(long, value_parser = humantime::parse_duration)]
	max_backoff: Option<Duration>,

	/// Abandon the job this long after its due time
	#[arg(long, value_parser = humantime::parse_duration)]
	age_limit: Option<Duration>,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
	DateTime::parse_from_rfc3339(value)
		.map(|ts| ts.with_timezone(&Utc))
		.map_err(|e| format!("invalid RFC 3339 timestamp: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	match args.command {
		Command::Version => {
			println!("{}", commands::format_version_info());
			return Ok(());
		}
		Command::Keygen => {
			println!("{}", commands::keygen().as_str());
			return Ok(());
		}
		_ => {}
	}

	let config = match &args.config {
		Some(path) => vesper_jobs_config::load_config_with_file(path)?,
		None => vesper_jobs_config::load_config()?,
	};
	logging::init(&config.logging)?;

	match args.command {
		Command::Run => commands::run(&config).await,
		Command::Schedule(schedule) => commands::schedule(&config, schedule).await,
		Command::Inspect { limit, json } => commands::inspect(&config, limit, json).await,
		Command::Keygen | Command::Version => Ok(()),
	}
}
