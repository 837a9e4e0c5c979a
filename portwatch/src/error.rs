//! Error types for portwatch.
//!
//! Enumeration and probing never fail from the caller's point of view: an
//! unreachable source is an empty result. These errors only surface from
//! fallible construction (opening a discovery daemon) and configuration
//! validation.

use thiserror::Error;

/// Result type for portwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for portwatch operations.
#[derive(Debug, Error)]
pub enum Error {
    /// mDNS daemon error.
    #[cfg(feature = "mdns")]
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = Error::Config("check_interval must be greater than zero".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: check_interval must be greater than zero"
        );
    }
}
