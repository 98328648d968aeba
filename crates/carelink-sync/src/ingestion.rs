//! Registration event ingestion.
//!
//! Each event materialises at most one replica record. Redelivery of an event
//! whose patient is already known is a no-op; the stored record is never
//! merged or overwritten from this path.

use async_trait::async_trait;
use carelink_broker::{Delivery, HandlerError, MessageHandler};
use carelink_core::{AccountStatus, PatientRecord, RegistrationEvent, Timestamp};
use carelink_storage::{DynPatientStore, InsertOutcome};
use tracing::{info, warn};

/// What ingesting one event did to the replica.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Created(PatientRecord),
    Duplicate(PatientRecord),
}

/// Build the record a registration event describes.
///
/// `patientId` and `email` are required. A missing or unknown status becomes
/// PENDING; a missing or unparsable registration date becomes `now`.
pub fn record_from_event(
    event: &RegistrationEvent,
    now: Timestamp,
) -> Result<PatientRecord, HandlerError> {
    let patient_id = required(event.patient_id.as_deref(), "patientId")?;
    let email = required(event.email.as_deref(), "email")?;

    let status = match event.account_status.as_deref() {
        None => AccountStatus::Pending,
        Some(raw) => raw.parse::<AccountStatus>().unwrap_or_else(|_| {
            warn!(patient_id = %patient_id, status = %raw, "Unknown account status, using PENDING");
            AccountStatus::Pending
        }),
    };

    let registration_date = match event.registration_date.as_deref() {
        None => now,
        Some(raw) => raw.parse::<Timestamp>().unwrap_or_else(|e| {
            warn!(patient_id = %patient_id, error = %e, "Invalid registration date, using ingestion time");
            now
        }),
    };

    let mut record = PatientRecord::new(patient_id, email, status, Some(registration_date));
    record.activated = status == AccountStatus::Active;
    Ok(record)
}

fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, HandlerError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(HandlerError::malformed(format!("missing required field '{field}'"))),
    }
}

/// Consumer of the registration queue.
pub struct RegistrationHandler {
    store: DynPatientStore,
}

impl RegistrationHandler {
    pub fn new(store: DynPatientStore) -> Self {
        Self { store }
    }

    pub async fn ingest(&self, event: &RegistrationEvent) -> Result<IngestOutcome, HandlerError> {
        let record = record_from_event(event, Timestamp::now())?;
        let outcome = self.store.insert_if_absent(record).await.map_err(|e| {
            warn!(category = %e.category(), error = %e, "Replica write failed");
            HandlerError::storage(e.to_string())
        })?;

        Ok(match outcome {
            InsertOutcome::Inserted(record) => {
                info!(
                    patient_id = %record.id,
                    status = %record.account_status,
                    "Added new patient to replica"
                );
                IngestOutcome::Created(record)
            }
            InsertOutcome::Existing(record) => {
                warn!(patient_id = %record.id, "Patient already exists, duplicate registration ignored");
                IngestOutcome::Duplicate(record)
            }
        })
    }
}

#[async_trait]
impl MessageHandler for RegistrationHandler {
    fn name(&self) -> &str {
        "patient-registration"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let event: RegistrationEvent = delivery.decode()?;
        self.ingest(&event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_storage::{InMemoryPatientStore, PatientStore};
    use serde_json::json;
    use std::sync::Arc;
    use time::macros::datetime;

    fn event(value: serde_json::Value) -> RegistrationEvent {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_for_missing_optional_fields() {
        let now = Timestamp::new(datetime!(2024-03-01 12:00:00 UTC));
        let record =
            record_from_event(&event(json!({"patientId": "p1", "email": "a@b.com"})), now).unwrap();
        assert_eq!(record.id, "p1");
        assert_eq!(record.account_status, AccountStatus::Pending);
        assert_eq!(record.registration_date, Some(now));
    }

    #[test]
    fn test_local_date_time_accepted() {
        let now = Timestamp::now();
        let record = record_from_event(
            &event(json!({
                "patientId": "p1",
                "email": "a@b.com",
                "accountStatus": "active",
                "registrationDate": "2024-03-01T09:30:00"
            })),
            now,
        )
        .unwrap();
        assert_eq!(record.account_status, AccountStatus::Active);
        assert!(record.activated);
        assert_eq!(
            record.registration_date,
            Some(Timestamp::new(datetime!(2024-03-01 09:30:00 UTC)))
        );
    }

    #[test]
    fn test_unparsable_date_falls_back_to_now() {
        let now = Timestamp::new(datetime!(2024-03-01 12:00:00 UTC));
        let record = record_from_event(
            &event(json!({"patientId": "p1", "email": "a@b.com", "registrationDate": "yesterday"})),
            now,
        )
        .unwrap();
        assert_eq!(record.registration_date, Some(now));
    }

    #[test]
    fn test_missing_required_fields_are_malformed() {
        let now = Timestamp::now();
        for payload in [
            json!({"email": "a@b.com"}),
            json!({"patientId": "p1"}),
            json!({"patientId": "  ", "email": "a@b.com"}),
        ] {
            let err = record_from_event(&event(payload), now).unwrap_err();
            assert!(matches!(err, HandlerError::Malformed(_)));
        }
    }

    #[tokio::test]
    async fn test_duplicate_event_is_a_noop() {
        let store = Arc::new(InMemoryPatientStore::new());
        let handler = RegistrationHandler::new(store.clone());
        let first = event(json!({"patientId": "p1", "email": "a@b.com"}));

        let created = match handler.ingest(&first).await.unwrap() {
            IngestOutcome::Created(record) => record,
            other => panic!("expected Created, got {other:?}"),
        };

        let second = event(json!({"patientId": "p1", "email": "changed@b.com", "accountStatus": "ACTIVE"}));
        let outcome = handler.ingest(&second).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Duplicate(created.clone()));
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.find_by_id("p1").await.unwrap().unwrap(), created);
    }

    #[tokio::test]
    async fn test_handle_rejects_non_object_body() {
        let store = Arc::new(InMemoryPatientStore::new());
        let handler = RegistrationHandler::new(store.clone());
        let delivery = Delivery::new("patient-care-exchange", "patient.registration", json!("oops"));
        assert!(handler.handle(&delivery).await.is_err());
        assert!(store.is_empty());
    }
}
