use std::io;
use std::sync::Arc;

use micro_body::protocol::BodyError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("body error: {source}")]
    Body {
        #[from]
        source: BodyError,
    },

    #[error("upstream failed: {reason}")]
    Upstream { reason: String },

    #[error("invalid http date: {value}")]
    InvalidDate { value: String },

    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("io error: {source}")]
    Io { source: Arc<io::Error> },
}

impl CacheError {
    pub fn upstream<S: ToString>(str: S) -> Self {
        Self::Upstream { reason: str.to_string() }
    }

    pub fn invalid_date<S: ToString>(str: S) -> Self {
        Self::InvalidDate { value: str.to_string() }
    }

    pub fn invalid_request<S: ToString>(str: S) -> Self {
        Self::InvalidRequest { reason: str.to_string() }
    }
}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        Self::Io { source: Arc::new(e) }
    }
}

impl From<http::Error> for CacheError {
    fn from(e: http::Error) -> Self {
        Self::invalid_request(e)
    }
}
