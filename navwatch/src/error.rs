//! describe errors in navwatch

use thiserror::Error;

/// Error type for the navwatch library
#[derive(Error, Debug)]
pub enum NavError {
    /// No service with this id is present in the held configuration
    #[error("No health check configured for service `{0}`")]
    UnknownService(String),
    /// A check target could not be turned into a url
    #[error("Invalid check target: {0}")]
    Url(#[from] url::ParseError),
    /// Error when building the http client
    #[error("Http client error")]
    Client(#[from] reqwest::Error),
    /// The status service could not bind its address
    #[cfg(feature = "warp")]
    #[error("Status service error")]
    Bind(#[from] warp::Error),
}

/// Failure reported by a [crate::transport::Transport] request.
///
/// These never leave the executor or gate as errors; they are classified into a
/// [crate::status::Reachability] instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The timeout fired before any reply
    #[error("request timed out")]
    Timeout,
    /// The peer answered but the reply could not be read
    #[error("reply blocked: {0}")]
    Blocked(String),
    /// DNS failure, connection refused or any other network failure
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

impl TransportError {
    /// Short machine readable name recorded as `error_kind` on a status
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout => "timeout",
            TransportError::Blocked(_) => "cors",
            TransportError::ConnectionFailed(_) => "connection",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_kinds() {
        assert_eq!(TransportError::Timeout.kind(), "timeout");
        assert_eq!(TransportError::Blocked("tls".to_owned()).kind(), "cors");
        assert_eq!(
            TransportError::ConnectionFailed("refused".to_owned()).kind(),
            "connection"
        );
    }

    #[test]
    fn display_unknown_service() {
        let err = NavError::UnknownService("svc1".to_owned());
        assert_eq!(
            err.to_string(),
            "No health check configured for service `svc1`"
        );
    }
}
