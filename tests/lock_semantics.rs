use keylock::{Driver, Lock, LockError, LockErrorKind, MemoryDriver, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

// Generous upper bound for sleeps on a loaded CI machine.
const TOLERANCE: Duration = Duration::from_millis(250);

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fails the first `acquire_failures` acquires and the first
/// `release_failures` releases, then behaves like the wrapped store.
#[derive(Default)]
struct ScriptedDriver {
    inner: MemoryDriver,
    acquire_failures: u32,
    release_failures: u32,
    acquires: AtomicU32,
    releases: AtomicU32,
}

impl ScriptedDriver {
    fn failing_acquire(n: u32) -> ScriptedDriver {
        ScriptedDriver {
            acquire_failures: n,
            ..Default::default()
        }
    }

    fn failing_release(n: u32) -> ScriptedDriver {
        ScriptedDriver {
            release_failures: n,
            ..Default::default()
        }
    }

    fn acquires(&self) -> u32 {
        self.acquires.load(Ordering::SeqCst)
    }

    fn releases(&self) -> u32 {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Driver for ScriptedDriver {
    fn acquire(&self, key: &str) -> Result<(), LockError> {
        let n = self.acquires.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.acquire_failures {
            return Err(LockError::acquire_with(key, format!("scripted failure {n}")));
        }

        self.inner.acquire(key)
    }

    fn release(&self, key: &str) -> Result<(), LockError> {
        let n = self.releases.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.release_failures {
            return Err(LockError::release_with(key, format!("scripted failure {n}")));
        }

        self.inner.release(key)
    }
}

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("invoice already sent")]
    AlreadySent,
    #[error(transparent)]
    Lock(#[from] LockError),
}

#[test]
fn only_one_concurrent_enter_wins() {
    init();
    let store = MemoryDriver::new();
    let n = 8;
    let barrier = Arc::new(Barrier::new(n));
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let driver = store.connect();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let lock = Lock::new(driver, "shared", RetryPolicy::once());
                barrier.wait();
                lock.enter()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_acquire())
    );
}

#[test]
fn shared_driver_across_locks() {
    init();
    let driver = Arc::new(MemoryDriver::new());
    let a = Lock::new(Arc::clone(&driver), "k", RetryPolicy::once());
    let b = Lock::new(Arc::clone(&driver), "k", RetryPolicy::once());
    a.enter().unwrap();
    assert!(b.enter().unwrap_err().is_acquire());
    a.exit().unwrap();
    b.enter().unwrap();
    b.exit().unwrap();
    assert!(driver.is_empty());
}

#[test]
fn driver_trait_objects() {
    init();
    let driver: Box<dyn Driver> = Box::new(MemoryDriver::new());
    let lock = Lock::new(driver, "k", RetryPolicy::once());
    lock.enter().unwrap();
    lock.exit().unwrap();
}

#[test]
fn enter_then_exit_succeeds() {
    init();
    let lock = Lock::new(MemoryDriver::new(), "k", RetryPolicy::once());
    lock.enter().unwrap();
    lock.exit().unwrap();
    assert!(lock.driver().is_empty());
}

#[test]
fn exit_without_enter_fails() {
    init();
    let lock = Lock::new(MemoryDriver::new(), "k", RetryPolicy::once());
    let e = lock.exit().unwrap_err();
    assert_eq!(e.kind(), LockErrorKind::Release);
    assert_eq!(e.key(), "k");
    assert!(lock.try_release("never").unwrap_err().is_release());
}

#[test]
fn second_enter_fails() {
    init();
    let lock = Lock::new(MemoryDriver::new(), "k", RetryPolicy::once());
    lock.enter().unwrap();
    assert!(lock.enter().unwrap_err().is_acquire());
    lock.exit().unwrap();
}

#[test]
fn enter_after_out_of_band_delete() {
    init();
    let lock = Lock::new(MemoryDriver::new(), "k", RetryPolicy::once());
    lock.enter().unwrap();
    lock.driver().evict("k");
    lock.enter().unwrap();
}

#[test]
fn enter_succeeds_on_fourth_attempt() {
    init();
    let lock = Lock::builder(ScriptedDriver::failing_acquire(3))
        .key("k".to_string())
        .tries(5)
        .delay(Duration::from_millis(10))
        .backoff(1.0)
        .build()
        .unwrap();

    let start = Instant::now();
    lock.enter().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(lock.driver().acquires(), 4);
    assert!(elapsed >= Duration::from_millis(30), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(30) + TOLERANCE, "{elapsed:?}");
    assert!(lock.driver().inner.contains("k"));
}

#[test]
fn enter_gives_up_after_tries() {
    init();
    let lock = Lock::builder(ScriptedDriver::failing_acquire(u32::MAX))
        .key("k".to_string())
        .tries(3)
        .delay(Duration::from_millis(5))
        .build()
        .unwrap();

    let start = Instant::now();
    let e = lock.enter().unwrap_err();
    let elapsed = start.elapsed();

    assert!(e.is_acquire());
    assert_eq!(lock.driver().acquires(), 3);
    assert!(elapsed >= Duration::from_millis(10), "{elapsed:?}");
    assert!(lock.driver().inner.is_empty());
}

#[test]
fn enter_waits_grow_until_capped() {
    init();
    // Waits: 10ms, 20ms, 30ms (capped), 30ms (capped) => at least 90ms.
    let lock = Lock::builder(ScriptedDriver::failing_acquire(4))
        .key("k".to_string())
        .tries(5)
        .delay(Duration::from_millis(10))
        .backoff(2.0)
        .max_delay(Duration::from_millis(30))
        .build()
        .unwrap();

    let start = Instant::now();
    lock.enter().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(lock.driver().acquires(), 5);
    assert!(elapsed >= Duration::from_millis(90), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(90) + TOLERANCE, "{elapsed:?}");
}

#[test]
fn zero_delay_backoff_never_stalls() {
    init();
    let lock = Lock::builder(ScriptedDriver::failing_acquire(4))
        .key("k".to_string())
        .tries(5)
        .delay(Duration::ZERO)
        .backoff(1e200)
        .build()
        .unwrap();

    let start = Instant::now();
    lock.enter().unwrap();
    assert_eq!(lock.driver().acquires(), 5);
    assert!(start.elapsed() < TOLERANCE);
}

#[test]
fn exit_retries_too() {
    init();
    let lock = Lock::builder(ScriptedDriver::failing_release(2))
        .key("k".to_string())
        .tries(3)
        .build()
        .unwrap();

    lock.enter().unwrap();
    lock.exit().unwrap();
    assert_eq!(lock.driver().releases(), 3);
    assert!(lock.driver().inner.is_empty());
}

#[test]
fn ineligible_failures_are_not_retried() {
    init();
    let lock = Lock::builder(ScriptedDriver::failing_acquire(u32::MAX))
        .key("k".to_string())
        .tries(5)
        .delay(Duration::from_millis(50))
        .retry_on(LockErrorKind::Release)
        .build()
        .unwrap();

    let start = Instant::now();
    assert!(lock.enter().unwrap_err().is_acquire());
    assert_eq!(lock.driver().acquires(), 1);
    assert!(start.elapsed() < Duration::from_millis(50));

    let lock = Lock::builder(ScriptedDriver::failing_release(u32::MAX))
        .key("k".to_string())
        .tries(5)
        .retry_on(LockErrorKind::Acquire)
        .build()
        .unwrap();
    lock.enter().unwrap();
    assert!(lock.exit().unwrap_err().is_release());
    assert_eq!(lock.driver().releases(), 1);
}

#[test]
fn scope_releases_once_then_returns_domain_error() {
    init();
    let lock = Lock::new(ScriptedDriver::default(), "invoice/7", RetryPolicy::once());
    let out: Result<(), AppError> = lock.run(|| {
        assert_eq!(lock.driver().releases(), 0);
        Err(AppError::AlreadySent)
    });

    assert!(matches!(out, Err(AppError::AlreadySent)));
    assert_eq!(lock.driver().releases(), 1);
    assert!(lock.driver().inner.is_empty());
}

#[test]
fn scope_release_failure_wins() {
    init();
    let lock = Lock::new(
        ScriptedDriver::failing_release(1),
        "invoice/7",
        RetryPolicy::once(),
    );
    let out: Result<(), AppError> = lock.run(|| Err(AppError::AlreadySent));

    match out {
        Err(AppError::Lock(e)) => assert!(e.is_release()),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(lock.driver().releases(), 1);
    // The key is orphaned.
    assert!(lock.driver().inner.contains("invoice/7"));
}

#[test]
fn scope_never_runs_without_the_lock() {
    init();
    let lock = Lock::builder(ScriptedDriver::failing_acquire(u32::MAX))
        .key("k".to_string())
        .tries(2)
        .build()
        .unwrap();

    let mut ran = false;
    let out: Result<(), AppError> = lock.run(|| {
        ran = true;
        Ok(())
    });

    assert!(matches!(out, Err(AppError::Lock(ref e)) if e.is_acquire()));
    assert!(!ran);
    assert_eq!(lock.driver().releases(), 0);
}

#[test]
fn guard_sees_both_failures() {
    init();
    let lock = Lock::new(
        ScriptedDriver::failing_release(1),
        "invoice/7",
        RetryPolicy::once(),
    );

    let guard = lock.acquire().unwrap();
    let work: Result<(), AppError> = Err(AppError::AlreadySent);
    let released = guard.release();

    assert!(matches!(work, Err(AppError::AlreadySent)));
    assert!(released.unwrap_err().is_release());
    assert_eq!(lock.driver().releases(), 1);
}
