//! Error types for STAGEHAND.

use thiserror::Error;

/// Common error type for STAGEHAND.
///
/// Faults raised *by* scripts during hook execution are not represented here;
/// they are contained by the runtime and recorded as
/// [`crate::script::faults::ErrorRecord`] values. This type covers host-side
/// failures: configuration, I/O, and invalid requests against the registry.
#[derive(Error, Debug)]
pub enum StagehandError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Script lifecycle error (duplicate name, rejected source, dead worker).
    #[error("script error: {0}")]
    Script(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Persistent store error.
    #[error("store error: {0}")]
    Store(String),
}

/// Result type alias for STAGEHAND operations.
pub type Result<T> = std::result::Result<T, StagehandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = StagehandError::Config("tick_interval_ms must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: tick_interval_ms must be positive"
        );
    }

    #[test]
    fn test_script_error_display() {
        let err = StagehandError::Script("duplicate script name 'miner'".to_string());
        assert_eq!(err.to_string(), "script error: duplicate script name 'miner'");
    }

    #[test]
    fn test_not_found_display() {
        let err = StagehandError::NotFound("script 'ghost'".to_string());
        assert_eq!(err.to_string(), "script 'ghost' not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StagehandError = io_err.into();
        assert!(matches!(err, StagehandError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_result_alias() {
        fn sample_ok() -> Result<i32> {
            Ok(42)
        }

        fn sample_err() -> Result<i32> {
            Err(StagehandError::Store("disk full".to_string()))
        }

        assert_eq!(sample_ok().unwrap(), 42);
        assert!(sample_err().is_err());
    }
}
