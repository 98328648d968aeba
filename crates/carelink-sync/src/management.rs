//! Patient management over the local replica.
//!
//! These operations read and write the replica directly and notify the
//! patient service after the local write has been committed.

use std::cmp::Reverse;
use std::sync::Arc;

use carelink_core::{
    AccountStatus, ActivationMessage, MedicalAction, MedicalUpdateMessage, PatientRecord,
    Principal, ProfileUpdate, ProfileUpdateMessage, Timestamp,
};
use carelink_storage::{DynPatientStore, FieldFilter, InsertOutcome};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::publisher::{CommandPublisher, PublishOutcome};
use crate::service::require_provider;

const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Replica counts by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientStats {
    pub pending_count: usize,
    pub active_count: usize,
    pub total_count: usize,
}

pub struct PatientManagementService {
    store: DynPatientStore,
    publisher: Arc<CommandPublisher>,
}

impl PatientManagementService {
    pub fn new(store: DynPatientStore, publisher: Arc<CommandPublisher>) -> Self {
        Self { store, publisher }
    }

    /// PENDING patients, most recently registered first.
    pub async fn pending_patients(&self) -> Result<Vec<PatientRecord>> {
        let mut patients = self
            .store
            .find_by_field(&FieldFilter::account_status(AccountStatus::Pending))
            .await?;
        sort_newest_first(&mut patients);
        Ok(patients)
    }

    pub async fn provider_patients(&self, provider_id: &str) -> Result<Vec<PatientRecord>> {
        Ok(self
            .store
            .find_by_field(&FieldFilter::assigned_provider(provider_id))
            .await?)
    }

    pub async fn patient(&self, patient_id: &str) -> Result<PatientRecord> {
        self.store
            .find_by_id(patient_id)
            .await?
            .ok_or_else(|| SyncError::patient_not_found(patient_id))
    }

    /// Insert a patient unless the id is already known, in which case the
    /// existing record is returned untouched.
    pub async fn add_new_patient(
        &self,
        patient_id: &str,
        email: &str,
        status: AccountStatus,
        registration_date: Option<Timestamp>,
    ) -> Result<PatientRecord> {
        let mut record = PatientRecord::new(
            patient_id,
            email,
            status,
            Some(registration_date.unwrap_or_else(Timestamp::now)),
        );
        record.activated = status == AccountStatus::Active;

        match self.store.insert_if_absent(record).await? {
            InsertOutcome::Inserted(record) => {
                info!(patient_id = %record.id, status = %record.account_status, "Added new patient");
                Ok(record)
            }
            InsertOutcome::Existing(record) => {
                warn!(patient_id = %record.id, "Patient already exists");
                Ok(record)
            }
        }
    }

    /// Fill in profile fields on behalf of `provider`, who becomes the
    /// assigned provider.
    ///
    /// The patient service is told about exactly the fields that changed.
    pub async fn update_profile(
        &self,
        patient_id: &str,
        update: &ProfileUpdate,
        provider: &Principal,
    ) -> Result<PatientRecord> {
        require_provider(provider)?;
        let (record, changed) = self
            .modify(patient_id, |record| {
                let changed = record.apply_profile_update(update);
                record.assign_provider(&provider.subject, Some(provider.name().to_string()));
                record.refresh_profile_complete();
                Ok(changed)
            })
            .await?;
        info!(
            patient_id = %record.id,
            changed = changed.len(),
            profile_complete = record.profile_complete,
            "Updated patient profile"
        );

        if changed.is_empty() {
            debug!(patient_id = %record.id, "No profile fields changed, nothing to publish");
        } else {
            let message =
                ProfileUpdateMessage::new(&record.id, &provider.subject, provider.name(), changed);
            self.publisher.publish_profile_update(&message).await;
        }
        Ok(record)
    }

    /// Activate a patient whose required profile information is filled in.
    pub async fn activate_patient(
        &self,
        patient_id: &str,
        provider: &Principal,
    ) -> Result<PatientRecord> {
        require_provider(provider)?;
        let (record, ()) = self
            .modify(patient_id, |record| {
                if !record.has_required_info() {
                    return Err(SyncError::profile_incomplete(patient_id));
                }
                record.set_status(AccountStatus::Active);
                record.assign_provider(&provider.subject, Some(provider.name().to_string()));
                Ok(())
            })
            .await?;

        let message = ActivationMessage::new(&record.id, &provider.subject, provider.name());
        self.publisher.publish_activation(&message).await;
        info!(patient_id = %record.id, provider = %provider.name(), "Activated patient");
        Ok(record)
    }

    /// Read, change and write back one record.
    ///
    /// The write only lands if the stored copy is still the one that was read.
    /// When a newer copy arrived in between, `mutate` is applied again on top
    /// of it, up to `MAX_WRITE_ATTEMPTS` times.
    async fn modify<T, F>(&self, patient_id: &str, mut mutate: F) -> Result<(PatientRecord, T)>
    where
        F: FnMut(&mut PatientRecord) -> Result<T>,
    {
        let mut attempt = 1;
        loop {
            let mut record = self.patient(patient_id).await?;
            let read_version = record.last_updated;
            let outcome = mutate(&mut record)?;
            match self.store.update_if_match(record, read_version).await {
                Ok(saved) => return Ok((saved, outcome)),
                Err(e) if e.is_version_conflict() && attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(
                        patient_id = %patient_id,
                        attempt,
                        "Replica copy changed while updating, reapplying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        patient_id = %patient_id,
                        category = %e.category(),
                        error = %e,
                        "Replica update failed"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    /// Forward a medical-history change for a known patient.
    pub async fn record_medical_update(
        &self,
        patient_id: &str,
        provider: &Principal,
        action: MedicalAction,
        data: Value,
    ) -> Result<PublishOutcome> {
        require_provider(provider)?;
        if !self.store.exists_by_id(patient_id).await? {
            return Err(SyncError::patient_not_found(patient_id));
        }
        let message = MedicalUpdateMessage {
            action,
            patient_id: patient_id.to_string(),
            provider_id: provider.subject.clone(),
            provider_name: provider.name().to_string(),
            data,
            timestamp: Timestamp::now(),
        };
        Ok(self.publisher.publish_medical_update(&message).await)
    }

    pub async fn patient_stats(&self) -> Result<PatientStats> {
        Ok(PatientStats {
            pending_count: self
                .store
                .count_by_field(&FieldFilter::account_status(AccountStatus::Pending))
                .await?,
            active_count: self
                .store
                .count_by_field(&FieldFilter::account_status(AccountStatus::Active))
                .await?,
            total_count: self.store.count().await?,
        })
    }

    /// Patients registered within the last `days` days, newest first.
    pub async fn recently_registered(&self, days: u32) -> Result<Vec<PatientRecord>> {
        let since = Timestamp::new(Timestamp::now().into_inner() - time::Duration::days(days.into()));
        let mut patients: Vec<PatientRecord> = self
            .store
            .find_all()
            .await?
            .into_iter()
            .filter(|p| p.registration_date.is_some_and(|date| date >= since))
            .collect();
        sort_newest_first(&mut patients);
        Ok(patients)
    }
}

impl std::fmt::Debug for PatientManagementService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatientManagementService")
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

fn sort_newest_first(patients: &mut [PatientRecord]) {
    patients.sort_by_key(|p| Reverse(p.registration_date));
}
