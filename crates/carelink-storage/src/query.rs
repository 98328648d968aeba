//! Field filters for `find_by_field` / `count_by_field`.

use carelink_core::{AccountStatus, PatientRecord};
use serde::{Deserialize, Serialize};

/// Indexed fields of a patient record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatientField {
    AccountStatus,
    AssignedProviderId,
    Email,
}

impl PatientField {
    /// Wire name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientField::AccountStatus => "accountStatus",
            PatientField::AssignedProviderId => "assignedProviderId",
            PatientField::Email => "email",
        }
    }
}

/// Exact-match filter on one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: PatientField,
    pub value: String,
}

impl FieldFilter {
    pub fn new(field: PatientField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }

    pub fn account_status(status: AccountStatus) -> Self {
        Self::new(PatientField::AccountStatus, status.as_str())
    }

    pub fn assigned_provider(provider_id: impl Into<String>) -> Self {
        Self::new(PatientField::AssignedProviderId, provider_id)
    }

    pub fn email(email: impl Into<String>) -> Self {
        Self::new(PatientField::Email, email)
    }

    pub fn matches(&self, record: &PatientRecord) -> bool {
        match self.field {
            PatientField::AccountStatus => {
                record.account_status.as_str().eq_ignore_ascii_case(&self.value)
            }
            PatientField::AssignedProviderId => {
                record.assigned_provider_id.as_deref() == Some(self.value.as_str())
            }
            PatientField::Email => record.email == self.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_filter_is_case_insensitive() {
        let record = PatientRecord::new("p1", "a@b.com", AccountStatus::Active, None);
        assert!(FieldFilter::new(PatientField::AccountStatus, "active").matches(&record));
        assert!(FieldFilter::account_status(AccountStatus::Active).matches(&record));
        assert!(!FieldFilter::account_status(AccountStatus::Pending).matches(&record));
    }

    #[test]
    fn test_unassigned_record_never_matches_provider() {
        let mut record = PatientRecord::new("p1", "a@b.com", AccountStatus::Pending, None);
        assert!(!FieldFilter::assigned_provider("prov1").matches(&record));
        record.assign_provider("prov1", None);
        assert!(FieldFilter::assigned_provider("prov1").matches(&record));
        assert!(FieldFilter::email("a@b.com").matches(&record));
    }
}
