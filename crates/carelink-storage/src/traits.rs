//! The replica store contract.

use async_trait::async_trait;
use carelink_core::{PatientRecord, Timestamp};

use crate::error::StorageError;
use crate::query::FieldFilter;

/// Result of [`PatientStore::insert_if_absent`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The record was new and has been stored.
    Inserted(PatientRecord),
    /// A record with the same id was already present; it is returned untouched.
    Existing(PatientRecord),
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }

    pub fn into_record(self) -> PatientRecord {
        match self {
            InsertOutcome::Inserted(record) | InsertOutcome::Existing(record) => record,
        }
    }
}

/// Result of [`PatientStore::upsert_if_newer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// The stored copy is newer; nothing changed.
    Stale,
}

/// Document-store abstraction over the local patient replica.
///
/// Implementations must be safe under concurrent reads and writes; the
/// conditional writes (`insert_if_absent`, `upsert_if_newer`) must be atomic
/// per id.
#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Reads a record by id. `None` if absent.
    async fn find_by_id(&self, id: &str) -> Result<Option<PatientRecord>, StorageError>;

    /// Stores the record, replacing any previous version.
    async fn save(&self, record: PatientRecord) -> Result<PatientRecord, StorageError>;

    async fn exists_by_id(&self, id: &str) -> Result<bool, StorageError>;

    /// Stores the record only if its id is unknown.
    async fn insert_if_absent(&self, record: PatientRecord) -> Result<InsertOutcome, StorageError>;

    /// Stores the record unless the stored copy has a later `last_updated`.
    async fn upsert_if_newer(&self, record: PatientRecord) -> Result<UpsertOutcome, StorageError>;

    /// Replaces the stored record only while its `last_updated` still equals
    /// `expected_last_updated`, the value the caller read.
    ///
    /// Returns `StorageError::NotFound` if the record is gone and
    /// `StorageError::VersionConflict` if it changed in between.
    async fn update_if_match(
        &self,
        record: PatientRecord,
        expected_last_updated: Timestamp,
    ) -> Result<PatientRecord, StorageError>;

    async fn find_by_field(&self, filter: &FieldFilter) -> Result<Vec<PatientRecord>, StorageError>;

    async fn count_by_field(&self, filter: &FieldFilter) -> Result<usize, StorageError>;

    async fn find_all(&self) -> Result<Vec<PatientRecord>, StorageError>;

    async fn count(&self) -> Result<usize, StorageError>;
}
