// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable, time-ordered store of pending job events.
//!
//! Events live in a single SQLite table keyed by `(due, job_id)`, so key order
//! is chronological. A second table keeps one row per 60-second partition with
//! the number of events pending in it; every insert and delete updates both in
//! one transaction. `load` only scans partitions that can hold due events and
//! reads the next due time from the lowest non-empty partition.
//!
//! The database is opened with an exclusive lock held for the life of the
//! store, so a second process opening the same file fails instead of racing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Connection;
use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePool, SqlitePoolOptions,
	SqliteSynchronous,
};
use tracing::{debug, instrument};
use vesper_jobs_core::codec::{from_unix_nanos, to_unix_nanos};
use vesper_jobs_core::{open_event, seal_event, DecodeError, EncodeError, Event, KeyRing};

use crate::error::StorageResult;

/// Width of one time partition.
pub const PARTITION_WIDTH: Duration = Duration::from_secs(60);

const PARTITION_NANOS: i64 = PARTITION_WIDTH.as_nanos() as i64;

const SCHEMA_VERSION: i64 = 1;

const LOCK_TIMEOUT: Duration = Duration::from_millis(250);

/// Result of [`Storage::load`].
#[derive(Debug, Default)]
pub struct LoadBatch {
	/// Events due at or before the requested instant, in `(due, job_id)` order.
	/// They have been removed from the store.
	pub events: Vec<Event>,
	/// Earliest due time still pending, `None` when the store is empty.
	pub next_due: Option<DateTime<Utc>>,
}

pub struct Storage {
	pool: SqlitePool,
	keyring: Option<Arc<KeyRing>>,
	path: PathBuf,
}

fn partition_of(due_nanos: i64) -> i64 {
	due_nanos.div_euclid(PARTITION_NANOS)
}

/// `ts` as Unix nanoseconds, saturating outside the representable range.
fn saturating_nanos(ts: DateTime<Utc>) -> i64 {
	to_unix_nanos(ts).unwrap_or(if ts.timestamp() < 0 { i64::MIN } else { i64::MAX })
}

impl Storage {
	/// Open or create the store at `path`.
	///
	/// Records are sealed with `keyring` when given. A store written with
	/// encryption must be reopened with a key ring holding every key id in
	/// use, and a plaintext store must be reopened without one; otherwise
	/// `load` fails with [`crate::StorageError::Decode`].
	#[instrument(skip(path, keyring), fields(path = %path.display(), encrypted = keyring.is_some()))]
	pub async fn open(path: &Path, keyring: Option<Arc<KeyRing>>) -> StorageResult<Self> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			tokio::fs::create_dir_all(parent).await?;
		}

		let options = SqliteConnectOptions::new()
			.filename(path)
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Full)
			.locking_mode(SqliteLockingMode::Exclusive)
			.busy_timeout(LOCK_TIMEOUT);

		// One connection: it owns the exclusive file lock and serializes writes.
		// No minimum, so the pool never reopens it behind `close`.
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.idle_timeout(None)
			.max_lifetime(None)
			.connect_with(options)
			.await?;

		let storage = Self {
			pool,
			keyring,
			path: path.to_path_buf(),
		};
		storage.migrate().await?;

		debug!("job store opened");
		Ok(storage)
	}

	async fn migrate(&self) -> StorageResult<()> {
		let mut tx = self.pool.begin().await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS job_store_meta (
				key TEXT PRIMARY KEY,
				value INTEGER NOT NULL
			)
			"#,
		)
		.execute(&mut *tx)
		.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS job_events (
				due INTEGER NOT NULL,
				job_id TEXT NOT NULL,
				bucket INTEGER NOT NULL,
				record BLOB NOT NULL,
				PRIMARY KEY (due, job_id)
			) WITHOUT ROWID
			"#,
		)
		.execute(&mut *tx)
		.await?;

		sqlx::query("CREATE INDEX IF NOT EXISTS idx_job_events_bucket ON job_events (bucket, due)")
			.execute(&mut *tx)
			.await?;

		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS job_event_partitions (
				bucket INTEGER PRIMARY KEY,
				pending INTEGER NOT NULL
			)
			"#,
		)
		.execute(&mut *tx)
		.await?;

		// Always write, so the exclusive lock is taken now rather than on the
		// first save.
		sqlx::query(
			r#"
			INSERT INTO job_store_meta (key, value) VALUES ('schema_version', ?1), ('opened_at', ?2)
			ON CONFLICT(key) DO UPDATE SET value = excluded.value
			"#,
		)
		.bind(SCHEMA_VERSION)
		.bind(saturating_nanos(Utc::now()))
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		Ok(())
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn is_encrypted(&self) -> bool {
		self.keyring.is_some()
	}

	/// Persist `event`. The event row and its partition count land together
	/// or not at all.
	#[instrument(skip(self, event), fields(job_id = %event.job.id, attempt = event.attempt, due = %event.due))]
	pub async fn save(&self, event: &Event) -> StorageResult<()> {
		let record = seal_event(self.keyring.as_deref(), event)?;
		let due = to_unix_nanos(event.due).map_err(EncodeError::from)?;
		let bucket = partition_of(due);

		let mut tx = self.pool.begin().await?;

		sqlx::query("INSERT INTO job_events (due, job_id, bucket, record) VALUES (?1, ?2, ?3, ?4)")
			.bind(due)
			.bind(&event.job.id)
			.bind(bucket)
			.bind(&record)
			.execute(&mut *tx)
			.await?;

		sqlx::query(
			r#"
			INSERT INTO job_event_partitions (bucket, pending) VALUES (?1, 1)
			ON CONFLICT(bucket) DO UPDATE SET pending = pending + 1
			"#,
		)
		.bind(bucket)
		.execute(&mut *tx)
		.await?;

		tx.commit().await?;
		debug!("event saved");
		Ok(())
	}

	/// Remove and return every event due at or before `until`, plus the
	/// earliest due time left afterwards.
	///
	/// If any returned record cannot be decoded the transaction is rolled
	/// back and nothing is removed.
	#[instrument(skip(self))]
	pub async fn load(&self, until: DateTime<Utc>) -> StorageResult<LoadBatch> {
		let until = saturating_nanos(until);
		let last_bucket = partition_of(until);

		let mut tx = self.pool.begin().await?;

		let records: Vec<Vec<u8>> = sqlx::query_scalar(
			r#"
			SELECT record FROM job_events
			WHERE bucket IN (SELECT bucket FROM job_event_partitions WHERE bucket <= ?1)
			  AND due <= ?2
			ORDER BY due, job_id
			"#,
		)
		.bind(last_bucket)
		.bind(until)
		.fetch_all(&mut *tx)
		.await?;

		let events = records
			.iter()
			.map(|record| open_event(self.keyring.as_deref(), record))
			.collect::<Result<Vec<_>, _>>()?;

		if !events.is_empty() {
			sqlx::query(
				r#"
				DELETE FROM job_events
				WHERE bucket IN (SELECT bucket FROM job_event_partitions WHERE bucket <= ?1)
				  AND due <= ?2
				"#,
			)
			.bind(last_bucket)
			.bind(until)
			.execute(&mut *tx)
			.await?;

			sqlx::query(
				r#"
				UPDATE job_event_partitions
				SET pending = (SELECT COUNT(*) FROM job_events WHERE job_events.bucket = job_event_partitions.bucket)
				WHERE bucket <= ?1
				"#,
			)
			.bind(last_bucket)
			.execute(&mut *tx)
			.await?;

			sqlx::query("DELETE FROM job_event_partitions WHERE pending <= 0")
				.execute(&mut *tx)
				.await?;
		}

		let next: Option<i64> = sqlx::query_scalar(
			r#"
			SELECT MIN(due) FROM job_events
			WHERE bucket = (SELECT MIN(bucket) FROM job_event_partitions)
			"#,
		)
		.fetch_one(&mut *tx)
		.await?;

		tx.commit().await?;

		let next_due = next
			.map(from_unix_nanos)
			.transpose()
			.map_err(DecodeError::from)?;

		if !events.is_empty() {
			debug!(count = events.len(), next_due = ?next_due, "events loaded");
		}
		Ok(LoadBatch { events, next_due })
	}

	/// Number of events pending in the store.
	pub async fn pending(&self) -> StorageResult<u64> {
		let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_events")
			.fetch_one(&self.pool)
			.await?;
		Ok(count.max(0) as u64)
	}

	/// The earliest `limit` pending events, without removing them.
	pub async fn peek(&self, limit: u32) -> StorageResult<Vec<Event>> {
		let records: Vec<Vec<u8>> =
			sqlx::query_scalar("SELECT record FROM job_events ORDER BY due, job_id LIMIT ?1")
				.bind(i64::from(limit))
				.fetch_all(&self.pool)
				.await?;

		let events = records
			.iter()
			.map(|record| open_event(self.keyring.as_deref(), record))
			.collect::<Result<Vec<_>, _>>()?;
		Ok(events)
	}

	/// Flush and release the database file. The exclusive lock is gone when
	/// this returns. Closing twice is a no-op.
	///
	/// The connection is taken back from the pool and closed directly:
	/// `SqlitePool::close` alone leaves a connection that is still on its way
	/// back to the pool open, and with it the lock.
	#[instrument(skip(self), fields(path = %self.path.display()))]
	pub async fn close(&self) -> StorageResult<()> {
		if self.pool.is_closed() {
			return Ok(());
		}

		let conn = self.pool.acquire().await?.detach();
		self.pool.close().await;
		conn.close().await?;

		debug!("job store closed");
		Ok(())
	}

	#[cfg(test)]
	async fn partitions(&self) -> Vec<(i64, i64)> {
		sqlx::query_as("SELECT bucket, pending FROM job_event_partitions ORDER BY bucket")
			.fetch_all(&self.pool)
			.await
			.unwrap()
	}
}
