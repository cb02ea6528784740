//! Error types for stdio-app

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Application is not running")]
    NotRunning,

    #[error("Stdin buffer is full, data was not written")]
    Backpressure,

    #[error("Stdin of the application is closed")]
    StdinClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures of a single stdin write, as opposed to spawn or
    /// configuration problems.
    pub fn is_write_failure(&self) -> bool {
        matches!(
            self,
            Error::NotRunning | Error::Backpressure | Error::StdinClosed
        )
    }
}

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, Error>;

// Errors cross process boundaries as plain strings
impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_failures() {
        assert!(Error::NotRunning.is_write_failure());
        assert!(Error::Backpressure.is_write_failure());
        assert!(Error::StdinClosed.is_write_failure());
        assert!(!Error::CommandNotFound("nope".to_string()).is_write_failure());
    }

    #[test]
    fn test_serializes_as_message() {
        let json = serde_json::to_string(&Error::NotRunning).unwrap();
        assert_eq!(json, "\"Application is not running\"");
    }
}
