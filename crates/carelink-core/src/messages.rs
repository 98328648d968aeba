//! Broker wire contracts exchanged with the patient service.
//!
//! All payloads are JSON objects with camelCase keys. Inbound types are lenient
//! where the producer is known to vary; outbound types always carry every field.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::patient::{AccountStatus, PatientRecord, StatusFilter};
use crate::time::Timestamp;

/// Action tag carried by profile-update notifications.
pub const PROFILE_UPDATE_ACTION: &str = "PROFILE_UPDATE";

/// Registration event published by the patient service on `patient.registration`.
///
/// Every field is optional at the wire level so that validation can name the
/// missing one instead of failing inside the decoder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_date: Option<String>,
}

/// Activation command sent on `patient.activation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationMessage {
    pub patient_id: String,
    pub provider_id: String,
    pub provider_name: String,
    pub status: AccountStatus,
    pub activation_date: Timestamp,
    pub message: String,
}

impl ActivationMessage {
    pub fn new(
        patient_id: impl Into<String>,
        provider_id: impl Into<String>,
        provider_name: impl Into<String>,
    ) -> Self {
        let provider_name = provider_name.into();
        Self {
            patient_id: patient_id.into(),
            provider_id: provider_id.into(),
            message: format!("Your account has been activated by {provider_name}"),
            provider_name,
            status: AccountStatus::Active,
            activation_date: Timestamp::now(),
        }
    }
}

/// Kind of medical-history change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MedicalAction {
    Create,
    Update,
}

/// Medical-history update sent on `medical.updates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicalUpdateMessage {
    pub action: MedicalAction,
    pub patient_id: String,
    pub provider_id: String,
    pub provider_name: String,
    pub data: Value,
    pub timestamp: Timestamp,
}

/// Profile-field update sent on `patient.profile.update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateMessage {
    pub action: String,
    pub patient_id: String,
    pub provider_id: String,
    pub provider_name: String,
    pub updated_fields: Map<String, Value>,
    pub timestamp: Timestamp,
}

impl ProfileUpdateMessage {
    pub fn new(
        patient_id: impl Into<String>,
        provider_id: impl Into<String>,
        provider_name: impl Into<String>,
        updated_fields: Map<String, Value>,
    ) -> Self {
        Self {
            action: PROFILE_UPDATE_ACTION.to_string(),
            patient_id: patient_id.into(),
            provider_id: provider_id.into(),
            provider_name: provider_name.into(),
            updated_fields,
            timestamp: Timestamp::now(),
        }
    }
}

/// Query sent on `patient.sync.request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub request_id: String,
    pub provider_id: String,
    pub status: StatusFilter,
}

/// Answer to a [`SyncRequest`], received on the sync response queue.
///
/// Decodes both the correlated form `{"requestId": "...", "patients": [...]}`
/// and the legacy bare array, which carries no `request_id`. Records are
/// decoded one by one; a record that cannot be read is skipped with a warning
/// and the rest of the answer is kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub patients: Vec<PatientRecord>,
}

impl SyncResponse {
    pub fn correlated(request_id: impl Into<String>, patients: Vec<PatientRecord>) -> Self {
        Self {
            request_id: Some(request_id.into()),
            patients,
        }
    }

    pub fn uncorrelated(patients: Vec<PatientRecord>) -> Self {
        Self {
            request_id: None,
            patients,
        }
    }
}

fn decode_records(request_id: Option<&str>, values: Vec<Value>) -> Vec<PatientRecord> {
    values
        .into_iter()
        .filter_map(|value| match PatientRecord::deserialize(&value) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(
                    request_id = request_id.unwrap_or("-"),
                    patient_id = value.get("id").and_then(serde_json::Value::as_str).unwrap_or("-"),
                    error = %e,
                    "Skipping unreadable patient record in sync response"
                );
                None
            }
        })
        .collect()
}

impl<'de> Deserialize<'de> for SyncResponse {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Bare(Vec<Value>),
            Correlated {
                #[serde(rename = "requestId", default)]
                request_id: Option<String>,
                #[serde(default)]
                patients: Option<Vec<Value>>,
            },
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Correlated {
                request_id,
                patients,
            } => SyncResponse {
                patients: decode_records(request_id.as_deref(), patients.unwrap_or_default()),
                request_id,
            },
            Wire::Bare(patients) => SyncResponse::uncorrelated(decode_records(None, patients)),
        })
    }
}

/// Status transition command sent on `patient.status.update`.
///
/// `previous_status` is the transition the sender expects, not a value read
/// back from the patient service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateCommand {
    pub patient_id: String,
    pub provider_id: String,
    pub new_status: AccountStatus,
    pub previous_status: AccountStatus,
    pub reason: String,
    pub timestamp: Timestamp,
}

impl StatusUpdateCommand {
    /// PENDING → ACTIVE
    pub fn activate(
        patient_id: impl Into<String>,
        provider_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::transition(
            patient_id,
            provider_id,
            AccountStatus::Pending,
            AccountStatus::Active,
            reason,
        )
    }

    /// ACTIVE → INACTIVE
    pub fn deactivate(
        patient_id: impl Into<String>,
        provider_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::transition(
            patient_id,
            provider_id,
            AccountStatus::Active,
            AccountStatus::Inactive,
            reason,
        )
    }

    fn transition(
        patient_id: impl Into<String>,
        provider_id: impl Into<String>,
        previous_status: AccountStatus,
        new_status: AccountStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            patient_id: patient_id.into(),
            provider_id: provider_id.into(),
            new_status,
            previous_status,
            reason: reason.into(),
            timestamp: Timestamp::now(),
        }
    }
}
