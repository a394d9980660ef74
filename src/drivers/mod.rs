//! Backend bindings for the [`Driver`](crate::Driver) contract.

pub mod file;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
#[cfg(feature = "spanner")]
pub mod spanner;

pub use file::{FileDriver, FileDriverBuilder};
pub use memory::MemoryDriver;
#[cfg(feature = "redis")]
pub use redis::RedisDriver;
#[cfg(feature = "spanner")]
pub use spanner::{SpannerDriver, SpannerDriverBuilder};
