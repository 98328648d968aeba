//! Outbound commands and notifications.
//!
//! Every publish is attempted once. Failures are logged and reported as
//! [`PublishOutcome::Failed`]; they never become caller errors, since any local
//! state change has already been committed by the time we publish.

use carelink_broker::{BrokerError, DynBroker, TopologyConfig, publish_json};
use carelink_core::{
    ActivationMessage, MedicalUpdateMessage, ProfileUpdateMessage, StatusUpdateCommand,
    SyncRequest,
};
use serde::Serialize;
use tracing::{debug, error, info};

/// What is known after a fire-and-forget publish.
///
/// `Published` only means the broker accepted the message; whether the patient
/// service processed it is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { deliveries: usize },
    Failed,
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

pub struct CommandPublisher {
    broker: DynBroker,
    topology: TopologyConfig,
}

impl CommandPublisher {
    pub fn new(broker: DynBroker, topology: TopologyConfig) -> Self {
        Self { broker, topology }
    }

    pub async fn publish_activation(&self, message: &ActivationMessage) -> PublishOutcome {
        self.fire(
            &self.topology.care_exchange,
            &self.topology.routing_keys.patient_activation,
            "activation",
            &message.patient_id,
            message,
        )
        .await
    }

    pub async fn publish_medical_update(&self, message: &MedicalUpdateMessage) -> PublishOutcome {
        self.fire(
            &self.topology.care_exchange,
            &self.topology.routing_keys.medical_updates,
            "medical_update",
            &message.patient_id,
            message,
        )
        .await
    }

    pub async fn publish_profile_update(&self, message: &ProfileUpdateMessage) -> PublishOutcome {
        self.fire(
            &self.topology.care_exchange,
            &self.topology.routing_keys.patient_profile_update,
            "profile_update",
            &message.patient_id,
            message,
        )
        .await
    }

    pub async fn publish_status_update(&self, command: &StatusUpdateCommand) -> PublishOutcome {
        self.fire(
            &self.topology.sync_exchange,
            &self.topology.routing_keys.patient_status_update,
            "status_update",
            &command.patient_id,
            command,
        )
        .await
    }

    /// Publish a sync query. Unlike the commands above the error is returned,
    /// so the bridge can stop waiting for a reply that will never come.
    pub async fn publish_sync_request(&self, request: &SyncRequest) -> Result<usize, BrokerError> {
        publish_json(
            self.broker.as_ref(),
            &self.topology.sync_exchange,
            &self.topology.routing_keys.patient_sync_request,
            request,
        )
        .await
    }

    async fn fire<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        kind: &'static str,
        patient_id: &str,
        payload: &T,
    ) -> PublishOutcome
    where
        T: Serialize + Sync,
    {
        match publish_json(self.broker.as_ref(), exchange, routing_key, payload).await {
            Ok(0) => {
                debug!(
                    kind,
                    patient_id = %patient_id,
                    routing_key = %routing_key,
                    "No local queue bound for routing key"
                );
                PublishOutcome::Published { deliveries: 0 }
            }
            Ok(deliveries) => {
                info!(
                    kind,
                    patient_id = %patient_id,
                    routing_key = %routing_key,
                    deliveries,
                    "Published"
                );
                PublishOutcome::Published { deliveries }
            }
            Err(e) => {
                error!(
                    kind,
                    patient_id = %patient_id,
                    routing_key = %routing_key,
                    error = %e,
                    "Publish failed, notification lost"
                );
                PublishOutcome::Failed
            }
        }
    }
}

impl std::fmt::Debug for CommandPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPublisher")
            .field("care_exchange", &self.topology.care_exchange)
            .field("sync_exchange", &self.topology.sync_exchange)
            .finish()
    }
}
