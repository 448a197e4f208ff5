//! Lock protocol properties: single-holder safety, crash recovery within
//! the grace period, bounded ownership, prompt cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use k6forge_core::blob::MemoryBlobStore;
use k6forge_core::clock::ManualClock;
use k6forge_core::lock::{LeaseLock, LeaseLockConfig, Lock, ProcessLock};

const LEASE: Duration = Duration::from_secs(60);
const BACKOFF: Duration = Duration::from_secs(1);
const GRACE: Duration = Duration::from_secs(180);
const MAX_LEASE: Duration = Duration::from_secs(300);

fn lease_lock() -> (LeaseLock, Arc<MemoryBlobStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_at(
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
    ));
    let blob = Arc::new(MemoryBlobStore::with_clock(clock.clone()));
    let lock = LeaseLock::with_clock(
        blob.clone(),
        LeaseLockConfig {
            lease: LEASE,
            backoff: BACKOFF,
            grace: GRACE,
            max_lease: MAX_LEASE,
        },
        clock.clone(),
    )
    .expect("lease lock");
    (lock, blob, clock)
}

/// With N concurrent acquirers of the same key, at most one holds the
/// lock at any instant. Each worker increments a counter inside its
/// critical section and asserts it never sees a peer in there.
async fn exclusion_over(lock: Arc<dyn Lock>, workers: usize) {
    let in_section = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..workers {
        let lock = Arc::clone(&lock);
        let in_section = Arc::clone(&in_section);
        let max_seen = Arc::clone(&max_seen);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let guard = lock.lock("shared", &cancel).await.expect("acquire");

            let concurrent = in_section.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(concurrent, Ordering::SeqCst);
            tokio::task::yield_now().await;
            in_section.fetch_sub(1, Ordering::SeqCst);

            guard.release().await.expect("release");
        }));
    }
    for handle in handles {
        handle.await.expect("worker");
    }

    assert_eq!(
        max_seen.load(Ordering::SeqCst),
        1,
        "more than one holder observed in the critical section"
    );
}

#[tokio::test]
async fn test_process_lock_mutual_exclusion() {
    exclusion_over(Arc::new(ProcessLock::new()), 8).await;
}

#[tokio::test(start_paused = true)]
async fn test_lease_lock_mutual_exclusion() {
    let (lock, _, _) = lease_lock();
    exclusion_over(Arc::new(lock), 4).await;
}

#[tokio::test(start_paused = true)]
async fn test_crashed_owner_loses_lock_within_grace() {
    let (lock, blob, clock) = lease_lock();

    // The owner acquires and crashes: the guard is dropped without
    // release, which only stops renewal. The lease blob remains.
    let guard = lock.try_lock("shared").await.expect("try").expect("acquire");
    drop(guard);
    assert_eq!(blob.len(), 1);

    // Until the lease ages past the grace period, contenders keep
    // losing.
    assert!(lock.try_lock("shared").await.expect("try").is_none());

    // After grace the next blocked acquirer gets in: one backoff round
    // reclaims the stale blob, the following one wins the create.
    clock.advance(GRACE + Duration::from_secs(1));
    let cancel = CancellationToken::new();
    let guard = lock.lock("shared", &cancel).await.expect("acquire after crash");
    guard.release().await.expect("release");
    assert_eq!(blob.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_owner_past_max_lease_is_aged_out() {
    let (lock, _, clock) = lease_lock();

    let _guard = lock.try_lock("shared").await.expect("try").expect("acquire");

    // The owner never releases. Its renewal loop stops at max_lease, the
    // blob then ages out, and a contender takes over.
    tokio::time::sleep(MAX_LEASE + LEASE * 2).await;
    clock.advance(MAX_LEASE + GRACE + Duration::from_secs(1));

    let cancel = CancellationToken::new();
    let guard = lock.lock("shared", &cancel).await.expect("take over");
    guard.release().await.expect("release");
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_lock_returns_within_backoff() {
    let (lock, _, _) = lease_lock();

    let _held = lock.try_lock("shared").await.expect("try").expect("acquire");

    let cancel = CancellationToken::new();
    let waiter = {
        let cancel = cancel.clone();
        let lock = Arc::new(lock);
        tokio::spawn(async move { lock.lock("shared", &cancel).await })
    };

    // Let the waiter park in its backoff sleep, then cancel. It must
    // return without waiting out the full backoff.
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let result = tokio::time::timeout(BACKOFF, waiter).await.expect("prompt return");
    assert!(result.expect("join").is_err());
}
