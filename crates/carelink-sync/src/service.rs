//! Provider-facing operations.
//!
//! Listing goes through the [`QueryBridge`]; status changes are one-way
//! commands to the patient service. Nothing here writes to the local replica.

use std::sync::Arc;

use carelink_core::{PatientRecord, Principal, ROLE_PROVIDER, StatusFilter, StatusUpdateCommand};
use tracing::info;

use crate::bridge::QueryBridge;
use crate::error::{Result, SyncError};
use crate::publisher::{CommandPublisher, PublishOutcome};

/// Reject callers that do not carry the provider role.
pub(crate) fn require_provider(principal: &Principal) -> Result<()> {
    if principal.has_role(ROLE_PROVIDER) {
        Ok(())
    } else {
        Err(SyncError::forbidden(&principal.subject))
    }
}

fn require_patient_id(patient_id: &str) -> Result<()> {
    if patient_id.trim().is_empty() {
        return Err(SyncError::invalid_input("patient id must not be empty"));
    }
    Ok(())
}

#[derive(Debug)]
pub struct ProviderPatientService {
    bridge: Arc<QueryBridge>,
    publisher: Arc<CommandPublisher>,
}

impl ProviderPatientService {
    pub fn new(bridge: Arc<QueryBridge>, publisher: Arc<CommandPublisher>) -> Self {
        Self { bridge, publisher }
    }

    /// Patients of the calling provider whose status matches `status`
    /// (`"ALL"` or an account status, any casing).
    pub async fn list_patients(
        &self,
        principal: &Principal,
        status: &str,
    ) -> Result<Vec<PatientRecord>> {
        require_provider(principal)?;
        let filter: StatusFilter = status
            .parse()
            .map_err(|e: carelink_core::CoreError| SyncError::invalid_input(e.to_string()))?;
        info!(provider_id = %principal.subject, status = %filter, "Listing patients");
        Ok(self.bridge.get_patients(&principal.subject, filter).await)
    }

    /// One patient of the calling provider.
    ///
    /// Resolved by listing all of the provider's patients and picking the id,
    /// so a query timeout surfaces as `PatientNotFound`.
    pub async fn get_patient(&self, principal: &Principal, patient_id: &str) -> Result<PatientRecord> {
        require_provider(principal)?;
        require_patient_id(patient_id)?;
        self.bridge
            .get_patients(&principal.subject, StatusFilter::All)
            .await
            .into_iter()
            .find(|p| p.id == patient_id)
            .ok_or_else(|| SyncError::patient_not_found(patient_id))
    }

    /// Ask the patient service to move `patient_id` from PENDING to ACTIVE.
    pub async fn activate_patient(
        &self,
        principal: &Principal,
        patient_id: &str,
        reason: &str,
    ) -> Result<PublishOutcome> {
        require_provider(principal)?;
        require_patient_id(patient_id)?;
        info!(provider_id = %principal.subject, patient_id = %patient_id, "Requesting activation");
        let command = StatusUpdateCommand::activate(patient_id, &principal.subject, reason);
        Ok(self.publisher.publish_status_update(&command).await)
    }

    /// Ask the patient service to move `patient_id` from ACTIVE to INACTIVE.
    pub async fn deactivate_patient(
        &self,
        principal: &Principal,
        patient_id: &str,
        reason: &str,
    ) -> Result<PublishOutcome> {
        require_provider(principal)?;
        require_patient_id(patient_id)?;
        info!(provider_id = %principal.subject, patient_id = %patient_id, "Requesting deactivation");
        let command = StatusUpdateCommand::deactivate(patient_id, &principal.subject, reason);
        Ok(self.publisher.publish_status_update(&command).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeConfig;
    use carelink_broker::{InMemoryBroker, MessageBroker, Topology, TopologyConfig};
    use serde_json::json;

    async fn service() -> (Arc<InMemoryBroker>, ProviderPatientService) {
        let broker = Arc::new(InMemoryBroker::new());
        let topology = TopologyConfig::default();
        broker.declare(&Topology::provider(&topology)).await.unwrap();
        let publisher = Arc::new(CommandPublisher::new(broker.clone(), topology));
        let bridge = Arc::new(QueryBridge::new(publisher.clone(), BridgeConfig::default()));
        (broker, ProviderPatientService::new(bridge, publisher))
    }

    #[tokio::test]
    async fn test_non_provider_is_forbidden() {
        let (_broker, service) = service().await;
        let patient = Principal::new("p1").with_role("PATIENT");
        let err = service.list_patients(&patient, "ALL").await.unwrap_err();
        assert!(matches!(err, SyncError::Forbidden { .. }));
        let err = service.activate_patient(&patient, "p1", "x").await.unwrap_err();
        assert!(matches!(err, SyncError::Forbidden { .. }));
    }

    #[tokio::test]
    async fn test_unknown_status_filter_is_invalid_input() {
        let (_broker, service) = service().await;
        let provider = Principal::provider("prov1", "Dr. House");
        let err = service.list_patients(&provider, "ARCHIVED").await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_deactivate_publishes_expected_transition() {
        let (broker, service) = service().await;
        let mut rx = broker.consume("patient.status.queue").await.unwrap();
        let provider = Principal::provider("prov1", "Dr. House");

        let outcome = service
            .deactivate_patient(&provider, "p1", "treatment finished")
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Published { deliveries: 1 });

        let body = rx.recv().await.unwrap().body;
        assert_eq!(body["patientId"], json!("p1"));
        assert_eq!(body["providerId"], json!("prov1"));
        assert_eq!(body["newStatus"], json!("INACTIVE"));
        assert_eq!(body["previousStatus"], json!("ACTIVE"));
        assert_eq!(body["reason"], json!("treatment finished"));
    }

    #[tokio::test]
    async fn test_activate_survives_broker_outage() {
        let (broker, service) = service().await;
        broker.set_available(false);
        let provider = Principal::provider("prov1", "Dr. House");
        let outcome = service.activate_patient(&provider, "p1", "ok").await.unwrap();
        assert_eq!(outcome, PublishOutcome::Failed);
    }
}
