//! # carelink-sync
//!
//! The provider side of patient synchronisation:
//!
//! - [`ingestion`]: registration events into the local replica, at most once per patient
//! - [`publisher`]: fire-and-forget commands toward the patient service
//! - [`bridge`]: request/response over pub/sub with per-request correlation and a deadline
//! - [`service`]: provider-facing list/get/activate/deactivate
//! - [`management`]: profile completion and activation against the replica
//!
//! [`SyncRuntime`] wires them to a broker and a store.

pub mod bridge;
mod error;
pub mod ingestion;
pub mod management;
pub mod publisher;
mod runtime;
pub mod service;

pub use bridge::{BridgeConfig, QueryBridge, QueryOutcome, SyncResponseHandler};
pub use error::{Result, SyncError};
pub use ingestion::{IngestOutcome, RegistrationHandler, record_from_event};
pub use management::{PatientManagementService, PatientStats};
pub use publisher::{CommandPublisher, PublishOutcome};
pub use runtime::SyncRuntime;
pub use service::ProviderPatientService;
