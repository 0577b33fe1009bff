//! Error types for storegate
//!
//! Three failure domains, three types:
//! - [`Error`]: crate-level setup and plumbing errors (config, I/O, clients)
//! - [`PrimaryError`]: what the primary document store collaborator reports
//! - [`CacheTierError`]: what a shared cache backend reports
//!
//! Primary and cache errors never escape the gateway; they are converted
//! into read/write outcomes there.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    // === Collaborator setup ===
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Cache backend error: {0}")]
    CacheBackend(String),

    // === Boundary ===
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::InvalidConfig(_) | Error::InvalidCollection(_) => StatusCode::BAD_REQUEST,
            Error::HttpClient(_) | Error::CacheBackend(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}

/// Failure reported by the primary document store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimaryError {
    #[error("primary store timed out after {0} ms")]
    Timeout(u64),

    #[error("primary store unavailable: {0}")]
    Unavailable(String),

    /// The store answered but refused the operation (bad query, validation).
    #[error("primary store rejected the operation: {0}")]
    Rejected(String),
}

impl PrimaryError {
    /// Transient infrastructure errors are the only ones that feed the
    /// circuit breaker.
    pub fn is_transient(&self) -> bool {
        matches!(self, PrimaryError::Timeout(_) | PrimaryError::Unavailable(_))
    }
}

/// Failure reported by a shared cache backend.
#[derive(Error, Debug)]
pub enum CacheTierError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("cache entry codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_transient_classification() {
        assert!(PrimaryError::Timeout(200).is_transient());
        assert!(PrimaryError::Unavailable("connection refused".into()).is_transient());
        assert!(!PrimaryError::Rejected("bad filter".into()).is_transient());
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            Error::InvalidCollection("a:b".into()).to_http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::CacheBackend("down".into()).to_http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Internal("oops".into()).to_http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
