use thiserror::Error;

/// Result type for rate limiter operations
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Rate limiter error types
///
/// Storage errors are transient and resolve to fail-open at the middleware
/// boundary. Configuration errors surface at construction time; a limiter
/// cannot be built from an invalid configuration.
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LimiterError::Config("windowMs must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: windowMs must be positive"
        );

        let err = LimiterError::Storage("connection refused".to_string());
        assert_eq!(err.to_string(), "Storage error: connection refused");
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<u64>("not a number").unwrap_err();
        let err: LimiterError = parse_err.into();
        assert!(matches!(err, LimiterError::Serialization(_)));
    }
}
