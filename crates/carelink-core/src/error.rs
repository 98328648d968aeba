use thiserror::Error;

/// Core error types for CareLink operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid account status: {0}")]
    InvalidAccountStatus(String),

    #[error("Invalid status filter: {0}")]
    InvalidStatusFilter(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CoreError {
    /// Create a new InvalidAccountStatus error
    pub fn invalid_account_status(status: impl Into<String>) -> Self {
        Self::InvalidAccountStatus(status.into())
    }

    /// Create a new InvalidStatusFilter error
    pub fn invalid_status_filter(filter: impl Into<String>) -> Self {
        Self::InvalidStatusFilter(filter.into())
    }

    /// Create a new InvalidTimestamp error
    pub fn invalid_timestamp(value: impl Into<String>) -> Self {
        Self::InvalidTimestamp(value.into())
    }
}

/// Result type alias for CareLink core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_account_status("SUSPENDED");
        assert_eq!(err.to_string(), "Invalid account status: SUSPENDED");

        let err = CoreError::MissingField("patientId");
        assert_eq!(err.to_string(), "Missing required field: patientId");
    }
}
