//! # carelink-core
//!
//! Shared types for the provider-side patient replica: the mirrored
//! [`PatientRecord`], the broker wire contracts exchanged with the patient
//! service, timestamps and caller identity.

pub mod error;
pub mod id;
pub mod identity;
pub mod messages;
pub mod patient;
pub mod time;

pub use error::{CoreError, Result};
pub use id::{generate_message_id, generate_request_id};
pub use identity::{Principal, ROLE_PATIENT, ROLE_PROVIDER};
pub use messages::{
    ActivationMessage, MedicalAction, MedicalUpdateMessage, PROFILE_UPDATE_ACTION,
    ProfileUpdateMessage, RegistrationEvent, StatusUpdateCommand, SyncRequest, SyncResponse,
};
pub use patient::{AccountStatus, PatientRecord, ProfileUpdate, StatusFilter};
pub use self::time::{Timestamp, now_utc};
