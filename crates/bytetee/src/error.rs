#![forbid(unsafe_code)]

use std::{error::Error as StdError, fmt, sync::Arc};

use thiserror::Error;

/// Boxed error type used at the consumer boundary.
///
/// Consumer closures are free to surface any error type; the coordinator
/// wraps the first one it sees into a [`TeeError`] and fans that out.
pub type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

pub type TeeResult<T> = Result<T, TeeError>;

/// Classifies the first failure observed by the coordinator.
///
/// Peers inspect the kind and unwrap the cause via [`TeeError::cause`]; the
/// kind survives cloning and fan-out unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Rejected before any consumer task was spawned.
    InvalidConfig,
    /// The upstream source failed while filling.
    Source,
    /// A branch consumer returned an error or panicked.
    Consumer,
    /// The cancellation token fired.
    Cancelled,
}

impl FailureKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::InvalidConfig => "invalid configuration",
            Self::Source => "source failed",
            Self::Consumer => "consumer failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The single runtime failure type of the fan-out.
///
/// Whatever goes wrong first (source read, consumer fault, cancellation) is
/// wrapped exactly once and delivered to every party: the caller, every
/// sibling reader still draining its pipe, and every `on_error` hook. The
/// inner cause is shared, so all observers see the same original error.
#[derive(Debug, Clone)]
pub struct TeeError {
    kind: FailureKind,
    inner: Arc<BoxedError>,
}

impl TeeError {
    pub(crate) fn new(kind: FailureKind, inner: BoxedError) -> Self {
        Self {
            kind,
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(
            FailureKind::InvalidConfig,
            Box::new(ConfigMessage(message.into())),
        )
    }

    pub(crate) fn source_failure(err: impl StdError + Send + Sync + 'static) -> Self {
        Self::new(FailureKind::Source, Box::new(err))
    }

    pub(crate) fn consumer(err: BoxedError) -> Self {
        Self::new(FailureKind::Consumer, err)
    }

    pub(crate) fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, Box::new(Interrupted))
    }

    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The original error, before wrapping.
    #[must_use]
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref().as_ref()
    }
}

impl fmt::Display for TeeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.inner)
    }
}

impl StdError for TeeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        let cause: &(dyn StdError + 'static) = self.cause();
        Some(cause)
    }
}

/// Inner cause used when the cancellation token fires.
#[derive(Debug, Error)]
#[error("cancellation requested")]
pub struct Interrupted;

#[derive(Debug, Error)]
#[error("{0}")]
struct ConfigMessage(String);
