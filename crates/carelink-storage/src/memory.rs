//! In-memory replica backend.

use async_trait::async_trait;
use carelink_core::{PatientRecord, Timestamp};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::trace;

use crate::error::StorageError;
use crate::query::FieldFilter;
use crate::traits::{InsertOutcome, PatientStore, UpsertOutcome};

const COLLECTION: &str = "patients";

/// Replica store backed by a sharded concurrent map.
///
/// Conditional writes go through the map's entry API, which holds the shard
/// lock for the duration of the check and the write.
#[derive(Debug, Default)]
pub struct InMemoryPatientStore {
    records: DashMap<String, PatientRecord>,
}

impl InMemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn validate(record: &PatientRecord) -> Result<(), StorageError> {
        if record.id.trim().is_empty() {
            return Err(StorageError::invalid_record("patient id must not be empty"));
        }
        Ok(())
    }

    fn collect(&self, filter: Option<&FieldFilter>) -> Vec<PatientRecord> {
        let mut records: Vec<PatientRecord> = self
            .records
            .iter()
            .filter(|entry| filter.is_none_or(|f| f.matches(entry.value())))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}

#[async_trait]
impl PatientStore for InMemoryPatientStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<PatientRecord>, StorageError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, record: PatientRecord) -> Result<PatientRecord, StorageError> {
        Self::validate(&record)?;
        trace!(patient_id = %record.id, "save");
        self.records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn exists_by_id(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.records.contains_key(id))
    }

    async fn insert_if_absent(&self, record: PatientRecord) -> Result<InsertOutcome, StorageError> {
        Self::validate(&record)?;
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(existing) => Ok(InsertOutcome::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(InsertOutcome::Inserted(record))
            }
        }
    }

    async fn upsert_if_newer(&self, record: PatientRecord) -> Result<UpsertOutcome, StorageError> {
        Self::validate(&record)?;
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(mut existing) => {
                if record.last_updated < existing.get().last_updated {
                    return Ok(UpsertOutcome::Stale);
                }
                existing.insert(record);
                Ok(UpsertOutcome::Replaced)
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn update_if_match(
        &self,
        record: PatientRecord,
        expected_last_updated: Timestamp,
    ) -> Result<PatientRecord, StorageError> {
        Self::validate(&record)?;
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(mut existing) => {
                let actual = existing.get().last_updated;
                if actual != expected_last_updated {
                    return Err(StorageError::version_conflict(
                        &record.id,
                        expected_last_updated,
                        actual,
                    ));
                }
                trace!(patient_id = %record.id, "update_if_match");
                existing.insert(record.clone());
                Ok(record)
            }
            Entry::Vacant(_) => Err(StorageError::not_found(COLLECTION, &record.id)),
        }
    }

    async fn find_by_field(&self, filter: &FieldFilter) -> Result<Vec<PatientRecord>, StorageError> {
        Ok(self.collect(Some(filter)))
    }

    async fn count_by_field(&self, filter: &FieldFilter) -> Result<usize, StorageError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count())
    }

    async fn find_all(&self) -> Result<Vec<PatientRecord>, StorageError> {
        Ok(self.collect(None))
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::{AccountStatus, Timestamp};
    use std::sync::Arc;

    fn record(id: &str, status: AccountStatus) -> PatientRecord {
        PatientRecord::new(id, format!("{id}@example.com"), status, None)
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let store = InMemoryPatientStore::new();
        store.save(record("p1", AccountStatus::Pending)).await.unwrap();

        let found = store.find_by_id("p1").await.unwrap().unwrap();
        assert_eq!(found.email, "p1@example.com");
        assert!(store.exists_by_id("p1").await.unwrap());
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let store = InMemoryPatientStore::new();
        let err = store.save(record("  ", AccountStatus::Pending)).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { .. }));
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first_record() {
        let store = InMemoryPatientStore::new();
        let first = record("p1", AccountStatus::Pending);
        assert!(store.insert_if_absent(first.clone()).await.unwrap().is_inserted());

        let mut second = record("p1", AccountStatus::Active);
        second.email = "other@example.com".into();
        let outcome = store.insert_if_absent(second).await.unwrap();
        assert_eq!(outcome, InsertOutcome::Existing(first.clone()));
        assert_eq!(store.find_by_id("p1").await.unwrap().unwrap(), first);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_upsert_if_newer_is_last_writer_wins() {
        let store = InMemoryPatientStore::new();
        let mut current = record("p1", AccountStatus::Pending);
        current.last_updated = "2024-03-01T10:00:00Z".parse::<Timestamp>().unwrap();
        assert_eq!(
            store.upsert_if_newer(current.clone()).await.unwrap(),
            UpsertOutcome::Inserted
        );

        let mut older = record("p1", AccountStatus::Inactive);
        older.last_updated = "2024-03-01T09:00:00Z".parse().unwrap();
        assert_eq!(store.upsert_if_newer(older).await.unwrap(), UpsertOutcome::Stale);
        assert_eq!(
            store.find_by_id("p1").await.unwrap().unwrap().account_status,
            AccountStatus::Pending
        );

        let mut newer = record("p1", AccountStatus::Active);
        newer.last_updated = "2024-03-01T11:00:00Z".parse().unwrap();
        assert_eq!(store.upsert_if_newer(newer).await.unwrap(), UpsertOutcome::Replaced);
        assert_eq!(
            store.find_by_id("p1").await.unwrap().unwrap().account_status,
            AccountStatus::Active
        );
    }

    #[tokio::test]
    async fn test_update_if_match_rejects_moved_copy() {
        let store = InMemoryPatientStore::new();
        let read = store.save(record("p1", AccountStatus::Pending)).await.unwrap();

        let mut remote = read.clone();
        remote.email = "remote@example.com".into();
        remote.touch();
        assert_eq!(
            store.upsert_if_newer(remote.clone()).await.unwrap(),
            UpsertOutcome::Replaced
        );

        let mut local = read.clone();
        local.set_status(AccountStatus::Active);
        let err = store
            .update_if_match(local, read.last_updated)
            .await
            .unwrap_err();
        assert!(err.is_version_conflict());
        assert_eq!(store.find_by_id("p1").await.unwrap().unwrap(), remote);

        let mut local = remote.clone();
        local.set_status(AccountStatus::Active);
        let saved = store
            .update_if_match(local, remote.last_updated)
            .await
            .unwrap();
        assert_eq!(saved.email, "remote@example.com");
        assert_eq!(saved.account_status, AccountStatus::Active);
    }

    #[tokio::test]
    async fn test_update_if_match_requires_existing_record() {
        let store = InMemoryPatientStore::new();
        let ghost = record("ghost", AccountStatus::Pending);
        let expected = ghost.last_updated;
        let err = store.update_if_match(ghost, expected).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_find_and_count_by_field() {
        let store = InMemoryPatientStore::new();
        for (id, status) in [
            ("p1", AccountStatus::Pending),
            ("p2", AccountStatus::Pending),
            ("p3", AccountStatus::Active),
            ("p4", AccountStatus::Inactive),
        ] {
            store.save(record(id, status)).await.unwrap();
        }

        let pending = FieldFilter::account_status(AccountStatus::Pending);
        let ids: Vec<_> = store
            .find_by_field(&pending)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert_eq!(store.count_by_field(&pending).await.unwrap(), 2);
        assert_eq!(store.find_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_inserts_store_one_record() {
        let store = Arc::new(InMemoryPatientStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .insert_if_absent(record("p1", AccountStatus::Pending))
                    .await
                    .unwrap()
                    .is_inserted()
            }));
        }

        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 1);
    }
}
