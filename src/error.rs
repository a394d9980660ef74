use std::error::Error as StdError;
use std::fmt;

/// Boxed backend error carried along with a [`LockError`] for diagnostics.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The two ways a lock operation can fail.
///
/// The taxonomy is flat on purpose: backends cannot reliably tell "someone
/// else holds the key" apart from "the store is unreachable", so neither can
/// callers. The optional `source` keeps whatever the backend reported.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("failed to acquire lock `{key}`")]
    Acquire {
        key: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("failed to release lock `{key}`")]
    Release {
        key: String,
        #[source]
        source: Option<BoxError>,
    },
}

/// Discriminant of [`LockError`], used to select which failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockErrorKind {
    Acquire,
    Release,
}

impl fmt::Display for LockErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockErrorKind::Acquire => f.write_str("acquire"),
            LockErrorKind::Release => f.write_str("release"),
        }
    }
}

impl LockError {
    pub fn acquire(key: impl Into<String>) -> Self {
        LockError::Acquire {
            key: key.into(),
            source: None,
        }
    }

    pub fn acquire_with(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        LockError::Acquire {
            key: key.into(),
            source: Some(source.into()),
        }
    }

    pub fn release(key: impl Into<String>) -> Self {
        LockError::Release {
            key: key.into(),
            source: None,
        }
    }

    pub fn release_with(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        LockError::Release {
            key: key.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> LockErrorKind {
        match self {
            LockError::Acquire { .. } => LockErrorKind::Acquire,
            LockError::Release { .. } => LockErrorKind::Release,
        }
    }

    /// Key the failed operation was issued against.
    pub fn key(&self) -> &str {
        match self {
            LockError::Acquire { key, .. } | LockError::Release { key, .. } => key,
        }
    }

    pub fn is_acquire(&self) -> bool {
        self.kind() == LockErrorKind::Acquire
    }

    pub fn is_release(&self) -> bool {
        self.kind() == LockErrorKind::Release
    }
}
