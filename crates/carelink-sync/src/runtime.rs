//! Wiring of the sync components around one broker and one replica store.

use std::sync::Arc;

use carelink_broker::{BrokerError, DynBroker, Topology, TopologyConfig, spawn_consumer};
use carelink_storage::DynPatientStore;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bridge::{BridgeConfig, QueryBridge};
use crate::ingestion::RegistrationHandler;
use crate::management::PatientManagementService;
use crate::publisher::CommandPublisher;
use crate::service::ProviderPatientService;

pub struct SyncRuntime {
    broker: DynBroker,
    topology: TopologyConfig,
    pub store: DynPatientStore,
    pub publisher: Arc<CommandPublisher>,
    pub bridge: Arc<QueryBridge>,
    pub patients: Arc<ProviderPatientService>,
    pub management: Arc<PatientManagementService>,
}

impl SyncRuntime {
    pub fn new(
        broker: DynBroker,
        store: DynPatientStore,
        topology: TopologyConfig,
        bridge_config: BridgeConfig,
    ) -> Self {
        let publisher = Arc::new(CommandPublisher::new(broker.clone(), topology.clone()));
        let bridge = Arc::new(QueryBridge::new(publisher.clone(), bridge_config));
        let patients = Arc::new(ProviderPatientService::new(
            bridge.clone(),
            publisher.clone(),
        ));
        let management = Arc::new(PatientManagementService::new(
            store.clone(),
            publisher.clone(),
        ));
        Self {
            broker,
            topology,
            store,
            publisher,
            bridge,
            patients,
            management,
        }
    }

    /// Declare the provider topology and attach the registration and sync
    /// response consumers.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, BrokerError> {
        self.broker.declare(&Topology::provider(&self.topology)).await?;

        let timeout = self.topology.handler_timeout();
        let queues = &self.topology.queues;
        let registration = spawn_consumer(
            self.broker.as_ref(),
            &queues.patient_registration,
            Arc::new(RegistrationHandler::new(self.store.clone())),
            timeout,
        )
        .await?;
        let responses = spawn_consumer(
            self.broker.as_ref(),
            &queues.patient_sync_response,
            Arc::new(self.bridge.response_handler(self.store.clone())),
            timeout,
        )
        .await?;

        info!(
            registration_queue = %queues.patient_registration,
            response_queue = %queues.patient_sync_response,
            "Sync consumers started"
        );
        Ok(vec![registration, responses])
    }
}

impl std::fmt::Debug for SyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncRuntime")
            .field("topology", &self.topology)
            .field("bridge", &self.bridge)
            .finish()
    }
}
