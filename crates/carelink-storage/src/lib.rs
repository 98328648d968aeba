//! # carelink-storage
//!
//! The local patient replica: a keyed collection of records mirrored from the
//! patient service and the unit of truth for every local read.
//!
//! [`PatientStore`] is the document-store contract the sync layer depends on;
//! [`InMemoryPatientStore`] is the concurrent in-process backend.

mod error;
pub mod memory;
pub mod query;
mod traits;

pub use error::{ErrorCategory, StorageError};
pub use memory::InMemoryPatientStore;
pub use query::{FieldFilter, PatientField};
pub use traits::{InsertOutcome, PatientStore, UpsertOutcome};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shareable store.
pub type DynPatientStore = std::sync::Arc<dyn PatientStore>;
