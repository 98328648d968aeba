use carelink_storage::StorageError;
use thiserror::Error;

/// Errors surfaced to callers of the provider-facing operations.
///
/// Malformed events, duplicate deliveries, query timeouts and broker outages
/// never show up here; they are logged where they happen.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Patient not found: {patient_id}")]
    PatientNotFound { patient_id: String },

    #[error("Cannot activate patient {patient_id}: profile is incomplete")]
    ProfileIncomplete { patient_id: String },

    #[error("Forbidden: {subject} is not a provider")]
    Forbidden { subject: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    pub fn patient_not_found(patient_id: impl Into<String>) -> Self {
        Self::PatientNotFound {
            patient_id: patient_id.into(),
        }
    }

    pub fn profile_incomplete(patient_id: impl Into<String>) -> Self {
        Self::ProfileIncomplete {
            patient_id: patient_id.into(),
        }
    }

    pub fn forbidden(subject: impl Into<String>) -> Self {
        Self::Forbidden {
            subject: subject.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PatientNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            SyncError::patient_not_found("p1").to_string(),
            "Patient not found: p1"
        );
        assert_eq!(
            SyncError::forbidden("alice").to_string(),
            "Forbidden: alice is not a provider"
        );
    }

    #[test]
    fn test_storage_error_converts() {
        let err: SyncError = StorageError::internal("disk on fire").into();
        assert!(matches!(err, SyncError::Storage(_)));
        assert!(!err.is_not_found());
    }
}
