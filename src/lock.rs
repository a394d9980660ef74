use crate::driver::Driver;
use crate::error::{LockError, LockErrorKind};
use crate::retry::{RetryPolicy, RetryPolicyBuilder};
use log::*;
use scopeguard::ScopeGuard;
use std::time::Duration;

/// An advisory lock on one key of a conditional key-value store.
///
/// The lock keeps no state of its own: whether it is held is whatever the
/// store says. Every acquire and release goes through the configured
/// [`RetryPolicy`].
///
/// Locks are not reentrant. Entering twice without exiting in between sends
/// a second create to the store, which fails because the key is already
/// there.
///
/// ```no_run
/// use keylock::{Lock, LockError, MemoryDriver};
/// use std::time::Duration;
///
/// let lock = Lock::builder(MemoryDriver::new())
///     .key("reports/daily".to_string())
///     .tries(5)
///     .delay(Duration::from_millis(10))
///     .build()?;
///
/// lock.run(|| {
///     println!("hello world!");
///     Ok::<_, LockError>(())
/// })?;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug)]
pub struct Lock<D> {
    driver: D,
    key: String,
    retry: RetryPolicy,
}

impl<D: Driver> Lock<D> {
    pub fn builder(driver: D) -> LockBuilder<D> {
        LockBuilder::new(driver)
    }

    pub fn new(driver: D, key: impl Into<String>, retry: RetryPolicy) -> Lock<D> {
        Lock {
            driver,
            key: key.into(),
            retry,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Acquires `key` (not necessarily this lock's own) under the retry
    /// policy.
    pub fn try_acquire(&self, key: &str) -> Result<(), LockError> {
        self.retry.call(|| self.driver.acquire(key))
    }

    /// Releases `key` (not necessarily this lock's own) under the retry
    /// policy.
    pub fn try_release(&self, key: &str) -> Result<(), LockError> {
        self.retry.call(|| self.driver.release(key))
    }

    /// Blocks until the key is acquired or the retry policy gives up.
    pub fn enter(&self) -> Result<(), LockError> {
        debug!("enter: key={}", self.key);
        self.try_acquire(&self.key)
    }

    pub fn exit(&self) -> Result<(), LockError> {
        debug!("exit: key={}", self.key);
        self.try_release(&self.key)
    }

    /// Enters the lock and returns a guard that exits it exactly once, either
    /// through [`LockGuard::release`] or when dropped.
    pub fn acquire(&self) -> Result<LockGuard<'_, D>, LockError> {
        self.enter()?;
        Ok(LockGuard {
            lock: self,
            released: false,
        })
    }

    /// Runs `f` while holding the lock.
    ///
    /// `f` never runs if the lock cannot be entered. Once it has been entered
    /// the lock is exited exactly once, after `f` returns or while a panic
    /// from `f` unwinds. If that release fails, its error is returned in
    /// place of whatever `f` produced, including an error from `f`; use
    /// [`Lock::acquire`] to see both.
    pub fn run<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<LockError>,
    {
        self.enter()?;

        let unwinding = scopeguard::guard_on_unwind((), |_| {
            if let Err(e) = self.exit() {
                error!("{e} while unwinding");
            }
        });

        let out = f();
        ScopeGuard::into_inner(unwinding);

        match self.exit() {
            Ok(()) => out,
            Err(e) => {
                if out.is_err() {
                    warn!("scope for `{}` failed, reporting release failure instead", self.key);
                }

                Err(e.into())
            }
        }
    }
}

/// Proof that a [`Lock`] was entered. Exits the lock when dropped unless
/// [`release`](LockGuard::release) was called.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a, D: Driver> {
    lock: &'a Lock<D>,
    released: bool,
}

impl<D: Driver> LockGuard<'_, D> {
    pub fn key(&self) -> &str {
        self.lock.key()
    }

    /// Exits the lock and reports the outcome.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.lock.exit()
    }
}

impl<D: Driver> Drop for LockGuard<'_, D> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        self.released = true;
        if let Err(e) = self.lock.exit() {
            error!("{e} on guard drop");
        }
    }
}

#[derive(Debug)]
pub struct LockBuilder<D> {
    driver: D,
    key: String,
    retry: RetryPolicyBuilder,
    policy: Option<RetryPolicy>,
}

impl<D: Driver> LockBuilder<D> {
    pub fn new(driver: D) -> LockBuilder<D> {
        LockBuilder {
            driver,
            key: String::new(),
            retry: RetryPolicyBuilder::new(),
            policy: None,
        }
    }

    pub fn key(mut self, key: String) -> LockBuilder<D> {
        self.key = key;
        self
    }

    pub fn tries(mut self, tries: u32) -> LockBuilder<D> {
        self.retry = self.retry.tries(tries);
        self
    }

    pub fn delay(mut self, delay: Duration) -> LockBuilder<D> {
        self.retry = self.retry.delay(delay);
        self
    }

    pub fn backoff(mut self, backoff: f64) -> LockBuilder<D> {
        self.retry = self.retry.backoff(backoff);
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> LockBuilder<D> {
        self.retry = self.retry.max_delay(max_delay);
        self
    }

    pub fn jitter(mut self, jitter: f64) -> LockBuilder<D> {
        self.retry = self.retry.jitter(jitter);
        self
    }

    pub fn retry_on(mut self, kind: LockErrorKind) -> LockBuilder<D> {
        self.retry = self.retry.retry_on(kind);
        self
    }

    /// Uses `policy` as is, ignoring the individual retry setters.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> LockBuilder<D> {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> anyhow::Result<Lock<D>> {
        anyhow::ensure!(!self.key.is_empty(), "lock key not set");
        let retry = match self.policy {
            Some(p) => p,
            None => self.retry.build(),
        };

        info!(
            "key={}, tries={}, delay={:?}, backoff={}",
            self.key,
            retry.tries(),
            retry.delay(),
            retry.backoff()
        );

        Ok(Lock::new(self.driver, self.key, retry))
    }
}
