//! Error types for the spiderq queue library.

use thiserror::Error;

/// The main error type for the spiderq library.
#[derive(Error, Debug)]
pub enum QueueError {
    /// A stored payload could not be encoded or decoded as a job record.
    #[error("Malformed record: {0}")]
    MalformedRecord(#[from] serde_json::Error),

    /// The backing store could not be opened or reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A storage operation failed after the connection was established.
    #[error("Backend error: {0}")]
    Backend(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A priority that cannot be stored or ordered (NaN or infinite).
    #[error("Invalid priority: {0}")]
    InvalidPriority(f64),
}

/// Result type alias using QueueError.
pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_malformed_record() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("invalid").unwrap_err();
        let err = QueueError::MalformedRecord(json_err);
        let display = format!("{}", err);
        assert!(display.starts_with("Malformed record:"));
    }

    #[test]
    fn test_error_display_connection() {
        let err = QueueError::Connection("connection refused".to_string());
        assert_eq!(format!("{}", err), "Connection error: connection refused");
    }

    #[test]
    fn test_error_display_backend() {
        let err = QueueError::Backend("disk I/O error".to_string());
        assert_eq!(format!("{}", err), "Backend error: disk I/O error");
    }

    #[test]
    fn test_error_display_config() {
        let err = QueueError::Config("empty project".to_string());
        assert_eq!(format!("{}", err), "Configuration error: empty project");
    }

    #[test]
    fn test_error_display_invalid_priority() {
        let err = QueueError::InvalidPriority(f64::NAN);
        assert_eq!(format!("{}", err), "Invalid priority: NaN");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err: serde_json::Error = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: QueueError = json_err.into();
        assert!(matches!(err, QueueError::MalformedRecord(_)));
    }
}
