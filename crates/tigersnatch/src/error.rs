//! Error types for the notifier subsystems.

use thiserror::Error;

/// Errors raised at the persistence boundary.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// The underlying database call failed
    #[error("Database error: {message}")]
    Database { message: String },

    /// A stored value did not have the expected shape
    #[error("Malformed record `{key}`: {message}")]
    Malformed { key: String, message: String },

    /// The user does not exist
    #[error("User {netid} does not exist")]
    UnknownUser { netid: String },

    /// The section does not exist
    #[error("Class {classid} does not exist")]
    UnknownClass { classid: String },

    /// The user is not on the section's waitlist (e.g. unsubscribed mid-cycle)
    #[error("User {netid} not in waitlist for class {classid}")]
    NotOnWaitlist { netid: String, classid: String },

    /// The user is already on the section's waitlist
    #[error("User {netid} is already in waitlist for class {classid}")]
    AlreadyOnWaitlist { netid: String, classid: String },
}

impl StoreError {
    /// Returns true if this error means the recipient left the waitlist or
    /// was never there; callers treat it as a per-recipient skip.
    pub fn is_recipient_gone(&self) -> bool {
        matches!(
            self,
            StoreError::NotOnWaitlist { .. } | StoreError::UnknownUser { .. }
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Malformed {
            key: "json".to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors from the seat-data and schedule sources.
#[derive(Debug, Error, Clone)]
pub enum FetchError {
    /// Network/HTTP request failed
    #[error("Network error: {message}")]
    Network { message: String },

    /// Could not obtain an access token
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    /// The upstream answered with something we could not interpret
    #[error("Malformed response: {message}")]
    Malformed { message: String },

    /// URL parsing/construction failed
    #[error("URL error: {message}")]
    Url { message: String },
}

impl FetchError {
    /// Returns true if this error is potentially transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network { .. } | FetchError::Auth { .. })
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::Url {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed {
            message: err.to_string(),
        }
    }
}

/// Errors raised by the enrollment change detector.
#[derive(Debug, Error, Clone)]
pub enum MonitorError {
    /// A section had an enrollment count but no capacity (upstream contract break)
    #[error("Missing key {classid} in either capacity or enrollment data")]
    MissingSectionData { classid: String },

    /// The seat source could not be queried
    #[error("Seat fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The store could not be read or written
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from a single send attempt.
#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    /// The provider is not configured (missing credentials)
    #[error("{channel} provider is not configured")]
    NotConfigured { channel: &'static str },

    /// Network/HTTP request failed
    #[error("Network error: {message}")]
    Network { message: String },

    /// The provider rejected the message
    #[error("Provider returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Network {
            message: err.to_string(),
        }
    }
}

/// Errors produced while deriving or validating notification windows.
#[derive(Debug, Error, Clone)]
pub enum ScheduleError {
    /// The schedule source was unreachable or malformed
    #[error("Schedule source unavailable: {0}")]
    Unavailable(#[from] FetchError),

    /// Windows overlap or are not in ascending order
    #[error("Windows either overlap or are not in ascending order (at index {index})")]
    NotMonotonic { index: usize },

    /// A row or event could not be parsed
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// The persisted schedule could not be read or written
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors in the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_gone() {
        let gone = StoreError::NotOnWaitlist {
            netid: "abc".into(),
            classid: "123".into(),
        };
        assert!(gone.is_recipient_gone());
        assert!(!StoreError::Database {
            message: "locked".into()
        }
        .is_recipient_gone());
    }

    #[test]
    fn test_fetch_retryable() {
        assert!(FetchError::Network {
            message: "timeout".into()
        }
        .is_retryable());
        assert!(!FetchError::Malformed {
            message: "bad json".into()
        }
        .is_retryable());
    }
}
