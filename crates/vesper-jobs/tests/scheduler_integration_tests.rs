// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! End-to-end tests for the job scheduler.
//!
//! Tests cover:
//! - Storage round trip, due ordering and future withholding
//! - Retry gaps, retry-limit and age-limit termination
//! - Encryption enforcement and key rotation
//! - Handler registration rules
//! - Restart durability and drain behaviour
//! - The mixed-delay dispatch scenario

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tempfile::{tempdir, TempDir};
use vesper_jobs::retry::jitter_bound;
use vesper_jobs::{
	age_limit, max_backoff, min_backoff, retry_limit, CancellationToken, Event, HandlerError, Job,
	JobContext, JobOptions, KeyRing, RecordKey, Scheduler, SchedulerConfig, SchedulerError, Storage,
	StorageError,
};
use vesper_jobs_core::{CryptoError, DecodeError};

fn config(dir: &TempDir) -> SchedulerConfig {
	SchedulerConfig {
		db_path: dir.path().join("jobs.db"),
		workers: 4,
		..SchedulerConfig::default()
	}
}

async fn started(config: SchedulerConfig) -> Scheduler {
	let scheduler = Scheduler::new(config);
	scheduler.start(CancellationToken::new()).await.unwrap();
	scheduler
}

/// Register a handler on `target` that records `(attempt, due, called_at)`
/// for every call and fails when `fail` is set.
fn record_calls(
	scheduler: &Scheduler,
	target: &str,
	fail: bool,
) -> Arc<Mutex<Vec<(u32, DateTime<Utc>, DateTime<Utc>)>>> {
	let calls = Arc::new(Mutex::new(Vec::new()));
	let log = calls.clone();
	let _registration = scheduler
		.handle_func(target, move |ctx: JobContext, _id: String, _data: Vec<u8>| {
			log.lock().unwrap().push((ctx.attempt, ctx.due, Utc::now()));
			async move {
				if fail {
					Err(HandlerError::failed("always fails"))
				} else {
					Ok(())
				}
			}
		})
		.unwrap();
	calls
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
	let deadline = tokio::time::Instant::now() + timeout;
	while tokio::time::Instant::now() < deadline {
		if condition() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	condition()
}

// ============================================================================
// Storage properties
// ============================================================================

#[tokio::test]
async fn saved_jobs_load_once_in_due_order() {
	let dir = tempdir().unwrap();
	let storage = Storage::open(&dir.path().join("jobs.db"), None).await.unwrap();
	let base = Utc::now() - chrono::Duration::minutes(10);

	let t1 = Event::first(Job::new("a", base, b"1".to_vec(), JobOptions::default()));
	let t2 = Event::first(Job::new("b", base + chrono::Duration::seconds(70), b"2".to_vec(), JobOptions::default()));
	let t3 = Event::first(Job::new("c", base + chrono::Duration::seconds(200), b"3".to_vec(), JobOptions::default()));
	for event in [&t3, &t1, &t2] {
		storage.save(event).await.unwrap();
	}

	let batch = storage.load(t3.due).await.unwrap();
	assert_eq!(batch.events, vec![t1.clone(), t2.clone(), t3.clone()]);
	assert!(batch.next_due.is_none());

	let again = storage.load(Utc::now()).await.unwrap();
	assert!(again.events.is_empty());
}

#[tokio::test]
async fn far_future_job_is_withheld() {
	let dir = tempdir().unwrap();
	let scheduler = started(config(&dir)).await;
	let calls = record_calls(&scheduler, "later", false);

	scheduler
		.after(Duration::from_secs(3600), "later", Vec::new(), &[])
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;

	assert!(calls.lock().unwrap().is_empty());
	assert_eq!(scheduler.pending().await.unwrap(), 1);
	scheduler.drain().await;
	scheduler.close().await.unwrap();
}

// ============================================================================
// Retry policy
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn retry_gaps_stay_within_backoff_and_jitter() {
	let dir = tempdir().unwrap();
	let scheduler = started(config(&dir)).await;
	let calls = record_calls(&scheduler, "flaky", true);
	let modifiers = [
		retry_limit(4),
		min_backoff(Duration::from_millis(10)),
		max_backoff(Duration::from_millis(40)),
	];
	let options = JobOptions::default().with(&modifiers);

	scheduler.after(Duration::ZERO, "flaky", Vec::new(), &modifiers).await.unwrap();
	assert!(wait_until(Duration::from_secs(5), || calls.lock().unwrap().len() == 4).await);

	let calls = calls.lock().unwrap().clone();
	for (index, window) in calls.windows(2).enumerate() {
		let (attempt, due, _) = window[0];
		let (next_attempt, next_due, _) = window[1];
		assert_eq!(attempt as usize, index + 1);
		assert_eq!(next_attempt, attempt + 1);

		let gap = (next_due - due).to_std().unwrap();
		assert!(gap >= options.min_backoff, "gap {gap:?} below min backoff");
		assert!(
			gap <= options.max_backoff + jitter_bound(attempt, &options),
			"gap {gap:?} above max backoff plus jitter"
		);
	}
	scheduler.drain().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_job_runs_exactly_retry_limit_times() {
	let dir = tempdir().unwrap();
	let scheduler = started(config(&dir)).await;
	let calls = record_calls(&scheduler, "broken", true);

	scheduler
		.after(
			Duration::ZERO,
			"broken",
			Vec::new(),
			&[
				retry_limit(3),
				min_backoff(Duration::from_millis(10)),
				max_backoff(Duration::from_millis(20)),
			],
		)
		.await
		.unwrap();

	assert!(wait_until(Duration::from_secs(5), || calls.lock().unwrap().len() == 3).await);
	tokio::time::sleep(Duration::from_millis(300)).await;

	assert_eq!(calls.lock().unwrap().len(), 3);
	assert_eq!(scheduler.pending().await.unwrap(), 0);
	scheduler.drain().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn age_limit_ends_retries_before_retry_limit() {
	let dir = tempdir().unwrap();
	let scheduler = started(config(&dir)).await;
	let calls = record_calls(&scheduler, "stale", true);
	let limit = Duration::from_millis(250);

	let due = Utc::now();
	scheduler
		.at(
			due,
			"stale",
			Vec::new(),
			&[
				retry_limit(100),
				min_backoff(Duration::from_millis(100)),
				max_backoff(Duration::from_millis(100)),
				age_limit(limit),
			],
		)
		.await
		.unwrap();

	tokio::time::sleep(Duration::from_secs(1)).await;
	let calls = calls.lock().unwrap().clone();
	assert!((2..=3).contains(&calls.len()), "unexpected call count {}", calls.len());
	for (_, attempt_due, _) in &calls {
		assert!((*attempt_due - due).to_std().unwrap() <= limit);
	}
	assert_eq!(scheduler.pending().await.unwrap(), 0);
	scheduler.drain().await;
}

// ============================================================================
// Encryption
// ============================================================================

#[tokio::test]
async fn encrypted_store_cannot_be_read_without_its_keys() {
	let dir = tempdir().unwrap();
	let ring = Arc::new(KeyRing::single(1, RecordKey::generate()));
	let scheduler = started(SchedulerConfig {
		keyring: Some(ring),
		..config(&dir)
	})
	.await;
	scheduler
		.after(Duration::from_secs(3600), "secret", b"payload".to_vec(), &[])
		.await
		.unwrap();
	scheduler.drain().await;
	scheduler.close().await.unwrap();

	let far = Utc::now() + chrono::Duration::days(1);
	let path = dir.path().join("jobs.db");

	let plain = Storage::open(&path, None).await.unwrap();
	assert!(matches!(
		plain.load(far).await,
		Err(StorageError::Decode(DecodeError::Crypto(CryptoError::KeyRingNotConfigured)))
	));
	assert_eq!(plain.pending().await.unwrap(), 1);
	plain.close().await.unwrap();

	let other = Arc::new(KeyRing::single(2, RecordKey::generate()));
	let wrong = Storage::open(&path, Some(other)).await.unwrap();
	assert!(matches!(
		wrong.load(far).await,
		Err(StorageError::Decode(DecodeError::Crypto(CryptoError::UnknownKey(1))))
	));
	wrong.close().await.unwrap();
}

#[tokio::test]
async fn rotated_key_ring_reads_old_and_new_records() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("jobs.db");
	let old_key = RecordKey::generate();
	let past = Utc::now() - chrono::Duration::seconds(1);

	let first = Event::first(Job::new("a", past, b"old".to_vec(), JobOptions::default()));
	{
		let ring = Arc::new(KeyRing::single(1, old_key.clone()));
		let storage = Storage::open(&path, Some(ring)).await.unwrap();
		storage.save(&first).await.unwrap();
		storage.close().await.unwrap();
	}

	let mut keys = BTreeMap::new();
	keys.insert(1, old_key);
	keys.insert(2, RecordKey::generate());
	let rotated = Arc::new(KeyRing::new(2, keys).unwrap());
	let storage = Storage::open(&path, Some(rotated)).await.unwrap();
	let second = Event::first(Job::new("b", past, b"new".to_vec(), JobOptions::default()));
	storage.save(&second).await.unwrap();

	let batch = storage.load(Utc::now()).await.unwrap();
	assert_eq!(batch.events.len(), 2);
	assert!(batch.events.contains(&first));
	assert!(batch.events.contains(&second));
}

// ============================================================================
// Handler registration
// ============================================================================

#[tokio::test]
async fn duplicate_handler_is_rejected_until_deregistered() {
	let dir = tempdir().unwrap();
	let scheduler = Scheduler::new(config(&dir));
	let ok = |_ctx: JobContext, _id: String, _data: Vec<u8>| async { Ok(()) };

	let registration = scheduler.handle_func("email", ok).unwrap();
	assert!(matches!(
		scheduler.handle_func("email", ok),
		Err(SchedulerError::DuplicateHandler(target)) if target == "email"
	));

	registration.deregister();
	let _again = scheduler.handle_func("email", ok).unwrap();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pending_jobs_survive_restart() {
	let dir = tempdir().unwrap();
	{
		let scheduler = started(config(&dir)).await;
		scheduler
			.after(Duration::from_millis(200), "resume", b"x".to_vec(), &[])
			.await
			.unwrap();
		scheduler.drain().await;
		scheduler.close().await.unwrap();
	}

	let scheduler = Scheduler::new(config(&dir));
	let calls = record_calls(&scheduler, "resume", false);
	scheduler.start(CancellationToken::new()).await.unwrap();

	assert!(wait_until(Duration::from_secs(5), || calls.lock().unwrap().len() == 1).await);
	scheduler.drain().await;
	assert_eq!(scheduler.pending().await.unwrap(), 0);
	scheduler.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drain_lets_running_handlers_finish_and_keeps_the_rest() {
	let dir = tempdir().unwrap();
	let scheduler = Scheduler::new(SchedulerConfig {
		workers: 1,
		..config(&dir)
	});
	let finished = Arc::new(AtomicUsize::new(0));
	let counter = finished.clone();
	let _reg = scheduler
		.handle_func("slow", move |_ctx: JobContext, _id: String, _data: Vec<u8>| {
			let counter = counter.clone();
			async move {
				tokio::time::sleep(Duration::from_millis(200)).await;
				counter.fetch_add(1, Ordering::SeqCst);
				Ok(())
			}
		})
		.unwrap();
	scheduler.start(CancellationToken::new()).await.unwrap();

	for _ in 0..5 {
		scheduler.after(Duration::ZERO, "slow", Vec::new(), &[]).await.unwrap();
	}
	tokio::time::sleep(Duration::from_millis(50)).await;
	scheduler.drain().await;

	let done = finished.load(Ordering::SeqCst);
	assert!(done >= 1);
	assert_eq!(done as u64 + scheduler.pending().await.unwrap(), 5);
	scheduler.close().await.unwrap();
}

// ============================================================================
// Mixed-delay scenario
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_jobs_due_within_window_run() {
	let dir = tempdir().unwrap();
	let scheduler = started(config(&dir)).await;
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();
	let _reg = scheduler
		.handle_func("tick", move |_ctx: JobContext, _id: String, _data: Vec<u8>| {
			counter.fetch_add(1, Ordering::SeqCst);
			async { Ok(()) }
		})
		.unwrap();

	for millis in [150, 300, 5_000, 10_000, 15_000, 20_000] {
		scheduler
			.after(Duration::from_millis(millis), "tick", Vec::new(), &[])
			.await
			.unwrap();
	}
	tokio::time::sleep(Duration::from_millis(50)).await;
	scheduler
		.after(Duration::from_millis(100), "tick", Vec::new(), &[])
		.await
		.unwrap();

	tokio::time::sleep(Duration::from_millis(450)).await;
	assert_eq!(calls.load(Ordering::SeqCst), 3);
	assert_eq!(scheduler.pending().await.unwrap(), 4);

	scheduler.drain().await;
	scheduler.close().await.unwrap();
}
