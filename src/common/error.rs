//! Error types for blobroute

use thiserror::Error;

use crate::cluster::CodeMode;

pub type Result<T> = std::result::Result<T, Error>;

/// Every variant carries cloneable payloads so a result can be fanned out
/// to coalesced callers through the single-flight gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // === Service discovery ===
    #[error("service not found: {0}")]
    NotFoundService(String),

    #[error("no hosts registered for service: {0}")]
    EmptyRoster(String),

    #[error("no healthy host for service: {0}")]
    NoHealthyHost(String),

    // === Volume allocation ===
    #[error("code mode not enabled: {0}")]
    UnknownCodeMode(CodeMode),

    #[error("no available volume")]
    NoAvailableVolume,

    // === Upstream ===
    #[error("cluster manager: {0}")]
    Upstream(String),

    // === Config ===
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Is this a retryable error?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream(_))
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Upstream(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Upstream(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Upstream("connection refused".into()).is_retryable());
        assert!(!Error::NoAvailableVolume.is_retryable());
        assert!(!Error::NotFoundService("proxy".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::EmptyRoster("proxy".into());
        assert_eq!(err.to_string(), "no hosts registered for service: proxy");
    }
}
