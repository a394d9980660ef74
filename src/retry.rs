//! Bounded retry around fallible, zero-argument operations.
//!
//! Nothing in here knows about locks: [`RetryPolicy::call_if`] works for any
//! `FnMut() -> Result<T, E>`, and [`RetryPolicy::call`] only needs the error
//! to say which [`Classify::Kind`] it is so the policy can decide whether it
//! is worth another attempt.
//!
//! The wait before attempt `n + 1` is `delay * backoff^(n - 1)`, capped at
//! `max_delay`, then stretched by up to `jitter` (a fraction of itself) and
//! capped again. Errors are handed back exactly as the operation returned
//! them.

use crate::error::{LockError, LockErrorKind};
use log::*;
use rand::Rng;
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::thread;
use std::time::Duration;

/// Maps an error to the kind a [`RetryPolicy`] filters on.
pub trait Classify {
    type Kind: Eq + Hash;

    fn kind(&self) -> Self::Kind;
}

impl Classify for LockError {
    type Kind = LockErrorKind;

    fn kind(&self) -> LockErrorKind {
        LockError::kind(self)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy<K = LockErrorKind> {
    tries: u32,
    delay: Duration,
    backoff: f64,
    max_delay: Option<Duration>,
    jitter: f64,
    exceptions: Option<HashSet<K>>,
}

impl<K> Default for RetryPolicy<K> {
    fn default() -> Self {
        RetryPolicy {
            tries: 1,
            delay: Duration::ZERO,
            backoff: 1.0,
            max_delay: None,
            jitter: 0.0,
            exceptions: None,
        }
    }
}

impl<K> RetryPolicy<K> {
    pub fn builder() -> RetryPolicyBuilder<K> {
        RetryPolicyBuilder::default()
    }

    /// A single attempt, no waiting.
    pub fn once() -> Self {
        RetryPolicy::default()
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn backoff(&self) -> f64 {
        self.backoff
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Kinds eligible for retry; `None` means every failure is.
    pub fn exceptions(&self) -> Option<&HashSet<K>> {
        self.exceptions.as_ref()
    }

    /// Wait inserted after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.cap(scale(self.delay, self.backoff.powi(exp)));
        if self.jitter > 0.0 {
            let r: f64 = rand::rng().random();
            self.cap(scale(base, 1.0 + self.jitter * r))
        } else {
            base
        }
    }

    fn cap(&self, d: Duration) -> Duration {
        match self.max_delay {
            Some(max) => d.min(max),
            None => d,
        }
    }

    /// Runs `op` until it succeeds, `eligible` rejects its error, or `tries`
    /// attempts have been made. The `exceptions` set is not consulted.
    pub fn call_if<T, E, F, P>(&self, mut op: F, eligible: P) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt = 1;
        loop {
            let e = match op() {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            if !eligible(&e) {
                debug!("attempt {attempt}: {e} (not retryable)");
                return Err(e);
            }

            if attempt >= self.tries {
                if self.tries > 1 {
                    warn!("{e}, giving up after {attempt} attempts");
                }
                return Err(e);
            }

            let pause = self.delay_for(attempt);
            debug!("attempt {attempt}/{}: {e}, retrying in {pause:?}", self.tries);
            if !pause.is_zero() {
                thread::sleep(pause);
            }

            attempt += 1;
        }
    }
}

impl<K: Eq + Hash> RetryPolicy<K> {
    pub fn is_eligible(&self, kind: &K) -> bool {
        self.exceptions.as_ref().is_none_or(|set| set.contains(kind))
    }

    /// Runs `op` under this policy, retrying only failures whose kind is in
    /// `exceptions` (or all failures when no set was configured).
    pub fn call<T, E, F>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: Classify<Kind = K> + fmt::Display,
    {
        self.call_if(op, |e| self.is_eligible(&e.kind()))
    }
}

// A zero delay stays zero however large the factor; `0 * inf` would be NaN.
fn scale(d: Duration, factor: f64) -> Duration {
    if d.is_zero() || factor == 1.0 {
        return d;
    }

    Duration::try_from_secs_f64(d.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder<K = LockErrorKind> {
    tries: u32,
    delay: Duration,
    backoff: f64,
    max_delay: Option<Duration>,
    jitter: f64,
    exceptions: Option<HashSet<K>>,
}

impl<K> Default for RetryPolicyBuilder<K> {
    fn default() -> Self {
        let p = RetryPolicy::<K>::default();
        RetryPolicyBuilder {
            tries: p.tries,
            delay: p.delay,
            backoff: p.backoff,
            max_delay: p.max_delay,
            jitter: p.jitter,
            exceptions: None,
        }
    }
}

impl<K> RetryPolicyBuilder<K> {
    pub fn new() -> RetryPolicyBuilder<K> {
        RetryPolicyBuilder::default()
    }

    /// Maximum number of attempts; values below 1 are treated as 1.
    pub fn tries(mut self, tries: u32) -> RetryPolicyBuilder<K> {
        self.tries = tries.max(1);
        self
    }

    pub fn delay(mut self, delay: Duration) -> RetryPolicyBuilder<K> {
        self.delay = delay;
        self
    }

    /// Multiplier applied to the delay after each failure; below 1 (or NaN)
    /// falls back to a constant delay.
    pub fn backoff(mut self, backoff: f64) -> RetryPolicyBuilder<K> {
        self.backoff = if backoff >= 1.0 { backoff } else { 1.0 };
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> RetryPolicyBuilder<K> {
        self.max_delay = Some(max_delay);
        self
    }

    /// Fraction (0 to 1) by which each wait may be randomly lengthened.
    pub fn jitter(mut self, jitter: f64) -> RetryPolicyBuilder<K> {
        self.jitter = if jitter.is_nan() {
            0.0
        } else {
            jitter.clamp(0.0, 1.0)
        };
        self
    }

    pub fn build(self) -> RetryPolicy<K> {
        RetryPolicy {
            tries: self.tries,
            delay: self.delay,
            backoff: self.backoff,
            max_delay: self.max_delay,
            jitter: self.jitter,
            exceptions: self.exceptions,
        }
    }
}

impl<K: Eq + Hash> RetryPolicyBuilder<K> {
    /// Restricts retries to failures of `kind`; call repeatedly to allow
    /// several kinds.
    pub fn retry_on(mut self, kind: K) -> RetryPolicyBuilder<K> {
        self.exceptions.get_or_insert_with(HashSet::new).insert(kind);
        self
    }

    pub fn exceptions(mut self, kinds: impl IntoIterator<Item = K>) -> RetryPolicyBuilder<K> {
        self.exceptions = Some(kinds.into_iter().collect());
        self
    }
}
