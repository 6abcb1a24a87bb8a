use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The error taxonomy shared by body sources, sinks and forwarders.
///
/// The type is `Clone` because a source or sink stores its first root cause
/// and replays it to every operation attempted afterwards.
#[derive(Debug, Clone, Error)]
pub enum BodyError {
    /// Not enough data buffered yet. Retry once more data has arrived.
    #[error("buffer underflow, more data required")]
    Underflow,

    #[error("body is closed: {reason}")]
    Closed { reason: String },

    #[error("body has been destroyed: {reason}")]
    Destroyed { reason: String },

    #[error("receive timeout {timeout:?} reached")]
    ReceiveTimeout { timeout: Duration },

    #[error("send timeout {timeout:?} reached")]
    SendTimeout { timeout: Duration },

    #[error("max read size {max_len} exceeded before the delimiter was found")]
    MaxReadSizeExceeded { max_len: usize },

    #[error("protocol violation: {reason}")]
    Protocol { reason: String },

    #[error("io error: {source}")]
    Io { source: Arc<io::Error> },
}

impl BodyError {
    pub fn closed<S: ToString>(str: S) -> Self {
        Self::Closed { reason: str.to_string() }
    }

    pub fn destroyed<S: ToString>(str: S) -> Self {
        Self::Destroyed { reason: str.to_string() }
    }

    pub fn protocol<S: ToString>(str: S) -> Self {
        Self::Protocol { reason: str.to_string() }
    }

    pub fn receive_timeout(timeout: Duration) -> Self {
        Self::ReceiveTimeout { timeout }
    }

    pub fn send_timeout(timeout: Duration) -> Self {
        Self::SendTimeout { timeout }
    }

    pub fn max_read_size_exceeded(max_len: usize) -> Self {
        Self::MaxReadSizeExceeded { max_len }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: Arc::new(e.into()) }
    }

    /// Only an underflow may succeed when retried later.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Underflow)
    }

    /// Close-type errors are not re-raised by `available()`.
    #[inline]
    pub fn is_close(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReceiveTimeout { .. } | Self::SendTimeout { .. })
    }
}

impl From<io::Error> for BodyError {
    fn from(e: io::Error) -> Self {
        Self::io(e)
    }
}

impl From<BodyError> for io::Error {
    fn from(e: BodyError) -> Self {
        let kind = match &e {
            BodyError::Underflow => io::ErrorKind::WouldBlock,
            BodyError::Closed { .. } | BodyError::Destroyed { .. } => io::ErrorKind::BrokenPipe,
            BodyError::ReceiveTimeout { .. } | BodyError::SendTimeout { .. } => io::ErrorKind::TimedOut,
            BodyError::MaxReadSizeExceeded { .. } | BodyError::Protocol { .. } => io::ErrorKind::InvalidData,
            BodyError::Io { source } => source.kind(),
        };
        io::Error::new(kind, e)
    }
}
