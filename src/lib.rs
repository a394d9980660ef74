//! Advisory locks over any store that can "create if absent" and "delete".
//!
//! A [`Lock`] names one key in a backing store, reached through a
//! [`Driver`]. Holding the lock means the key exists. Acquire and release are
//! retried according to a [`RetryPolicy`]; the scoped forms ([`Lock::run`]
//! and [`Lock::acquire`]) make sure every successful acquire is followed by
//! exactly one release.
//!
//! There are no leases, fencing tokens, fairness or reentrancy: a holder that
//! dies without releasing leaves the key behind until someone removes it.

pub mod driver;
pub mod drivers;
pub mod error;
pub mod lock;
pub mod retry;

pub use driver::Driver;
pub use drivers::{FileDriver, MemoryDriver};
#[cfg(feature = "redis")]
pub use drivers::RedisDriver;
#[cfg(feature = "spanner")]
pub use drivers::SpannerDriver;
pub use error::{BoxError, LockError, LockErrorKind};
pub use lock::{Lock, LockBuilder, LockGuard};
pub use retry::{Classify, RetryPolicy, RetryPolicyBuilder};
