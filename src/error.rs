use thiserror::Error;

/// Unified error type for the Warden application
#[derive(Error, Debug)]
pub enum WardenError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] serde_yaml::Error),

    // HTTP errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Control plane request failed: {0}")]
    ControlPlane(String),

    // Event/action errors
    #[error("Invalid trigger pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    // Script errors
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("Script path escapes the scripts directory: {0}")]
    ScriptPathRejected(String),

    #[error("Script execution timed out after {0} seconds")]
    ScriptTimeout(u64),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;

// Convert from URL parse errors
impl From<url::ParseError> for WardenError {
    fn from(err: url::ParseError) -> Self {
        WardenError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WardenError::UnknownAction("Reboot".to_string());
        assert_eq!(err.to_string(), "Unknown action: Reboot");

        let err = WardenError::ScriptTimeout(300);
        assert_eq!(
            err.to_string(),
            "Script execution timed out after 300 seconds"
        );
    }

    #[test]
    fn test_error_from_url_parse() {
        let parse_err = url::Url::parse("not a url").unwrap_err();
        let err = WardenError::from(parse_err);
        assert!(matches!(err, WardenError::InvalidConfig(_)));
    }
}
