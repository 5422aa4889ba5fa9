//! Error types for adapters.

use thiserror::Error;

/// Errors that can occur when talking to clusters, agents or discovery sources.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Authentication or authorization failed.
    #[error("invalid auth: {0}")]
    Auth(String),

    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Connection failed.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Timeout waiting for response.
    #[error("Request timed out")]
    Timeout,

    /// Several requests in one fan-out failed.
    #[error("{}", join_errors(.0))]
    Multiple(Vec<AdapterError>),
}

impl AdapterError {
    /// True if this error, or any error it wraps, is an auth failure.
    pub fn is_auth(&self) -> bool {
        match self {
            AdapterError::Auth(_) => true,
            AdapterError::Multiple(errors) => errors.iter().any(AdapterError::is_auth),
            _ => false,
        }
    }

    /// True if this error, or any error it wraps, is a missing resource.
    pub fn is_not_found(&self) -> bool {
        match self {
            AdapterError::NotFound(_) => true,
            AdapterError::Multiple(errors) => errors.iter().any(AdapterError::is_not_found),
            _ => false,
        }
    }

    /// True when the remote end refused the connection outright.
    pub fn is_connection_refused(&self) -> bool {
        match self {
            AdapterError::Connection(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("refused") || msg.contains("error trying to connect")
            }
            _ => false,
        }
    }

    /// Collapse a list of errors: `None` when empty, the error itself when
    /// there is one, `Multiple` otherwise.
    pub fn join(mut errors: Vec<AdapterError>) -> Option<AdapterError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(AdapterError::Multiple(errors)),
        }
    }
}

fn join_errors(errors: &[AdapterError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout
        } else if err.is_connect() {
            // The io error ("Connection refused") is only visible in the source chain.
            let mut message = err.to_string();
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                message.push_str(": ");
                message.push_str(&cause.to_string());
                source = cause.source();
            }
            AdapterError::Connection(message)
        } else if err.is_decode() {
            AdapterError::Parse(err.to_string())
        } else {
            AdapterError::Http(err.to_string())
        }
    }
}

/// Map a non-success HTTP status to the matching error variant.
#[cfg(feature = "http")]
pub(crate) fn status_error(status: reqwest::StatusCode, what: &str) -> AdapterError {
    match status {
        reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
            AdapterError::Auth(format!("{} returned status {}", what, status))
        }
        reqwest::StatusCode::NOT_FOUND => AdapterError::NotFound(what.to_string()),
        _ => AdapterError::Http(format!("{} returned status {}", what, status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_is_found_inside_multiple() {
        let err = AdapterError::Multiple(vec![
            AdapterError::Timeout,
            AdapterError::Auth("node2".to_string()),
        ]);
        assert!(err.is_auth());
        assert!(!err.is_not_found());
        assert!(!AdapterError::Timeout.is_auth());
    }

    #[test]
    fn join_collapses_single_error() {
        assert!(AdapterError::join(vec![]).is_none());
        assert!(matches!(
            AdapterError::join(vec![AdapterError::Timeout]),
            Some(AdapterError::Timeout)
        ));
        assert!(matches!(
            AdapterError::join(vec![AdapterError::Timeout, AdapterError::Timeout]),
            Some(AdapterError::Multiple(_))
        ));
    }

    #[test]
    fn multiple_display_joins_messages() {
        let err = AdapterError::Multiple(vec![
            AdapterError::NotFound("bucket".to_string()),
            AdapterError::Timeout,
        ]);
        assert_eq!(err.to_string(), "Not found: bucket; Request timed out");
    }

    #[test]
    fn connection_refused_detection() {
        assert!(AdapterError::Connection("tcp connect error: Connection refused (os error 111)".to_string())
            .is_connection_refused());
        assert!(!AdapterError::Timeout.is_connection_refused());
    }
}
