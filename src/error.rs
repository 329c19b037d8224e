//! Error taxonomy shared by the persistence, SMS and workspace layers.
//!
//! Every remote call returns `Result<T, Error>`; callers check the error
//! before touching data. [`Error::is_transient`] decides whether a failed
//! call is worth retrying.

use thiserror::Error;

/// Backend error code reported when its schema cache is being reloaded.
pub const STALE_SCHEMA_CODE: &str = "PGRST002";

#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Backend error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Backend schema cache is stale: {0}")]
    StaleSchema(String),

    #[error("Invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Authentication required")]
    Unauthorized,

    /// The session row exists but its records were not written. A retry of
    /// the same save reuses the row through the (group, date) lookup.
    #[error("Attendance records could not be saved: {0}")]
    PartialWrite(#[source] Box<Error>),

    #[error("SMS dispatch failed: {0}")]
    Sms(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation {
            field,
            message: message.into(),
        }
    }

    /// Network failures, timeouts, 5xx responses and a stale schema cache.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout | Error::StaleSchema(_) => true,
            Error::Server { status, .. } => *status >= 500,
            Error::PartialWrite(cause) => cause.is_transient(),
            _ => false,
        }
    }

    /// Classify an unsuccessful HTTP response.
    pub fn from_status(status: u16, code: Option<&str>, message: String) -> Self {
        if code == Some(STALE_SCHEMA_CODE) {
            return Error::StaleSchema(message);
        }
        match status {
            401 | 403 => Error::Unauthorized,
            404 => Error::NotFound(message),
            409 => Error::Conflict(message),
            400..=499 => Error::Rejected { status, message },
            _ => Error::Server { status, message },
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if let Some(status) = e.status() {
            Error::from_status(status.as_u16(), None, e.to_string())
        } else if e.is_decode() {
            Error::Rejected {
                status: 200,
                message: format!("Unexpected response body: {}", e),
            }
        } else {
            Error::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Network("reset".to_string()).is_transient());
        assert!(Error::Timeout.is_transient());
        assert!(Error::from_status(503, None, "down".to_string()).is_transient());
        assert!(Error::from_status(400, Some(STALE_SCHEMA_CODE), String::new()).is_transient());

        assert!(!Error::from_status(422, None, "bad".to_string()).is_transient());
        assert!(!Error::validation("name", "is required").is_transient());
        assert!(!Error::Unauthorized.is_transient());
    }

    #[test]
    fn test_partial_write_follows_cause() {
        let transient = Error::PartialWrite(Box::new(Error::Timeout));
        assert!(transient.is_transient());

        let permanent = Error::PartialWrite(Box::new(Error::Conflict("dup".to_string())));
        assert!(!permanent.is_transient());
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            Error::from_status(404, None, "gone".to_string()),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from_status(409, None, "dup".to_string()),
            Error::Conflict(_)
        ));
        assert!(matches!(
            Error::from_status(401, None, String::new()),
            Error::Unauthorized
        ));
    }
}
