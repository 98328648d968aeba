//! Process assembly: broker, replica store, sync runtime and its consumers.

use std::future::Future;
use std::sync::Arc;

use carelink_broker::{BrokerError, InMemoryBroker};
use carelink_storage::InMemoryPatientStore;
use carelink_sync::SyncRuntime;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;

#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: AppConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Declare the topology and start consuming.
    pub async fn build(self) -> Result<ProviderServer, BrokerError> {
        let broker = Arc::new(InMemoryBroker::with_capacity(
            self.config.broker.queue_capacity,
        ));
        let store = Arc::new(InMemoryPatientStore::new());
        let runtime = SyncRuntime::new(
            broker.clone(),
            store,
            self.config.broker.clone(),
            self.config.sync.clone(),
        );
        let consumers = runtime.start().await?;

        info!(
            care_exchange = %self.config.broker.care_exchange,
            sync_exchange = %self.config.broker.sync_exchange,
            response_timeout_ms = self.config.sync.response_timeout_ms,
            "Provider sync service started"
        );
        Ok(ProviderServer {
            broker,
            runtime,
            consumers,
        })
    }
}

#[derive(Debug)]
pub struct ProviderServer {
    broker: Arc<InMemoryBroker>,
    runtime: SyncRuntime,
    consumers: Vec<JoinHandle<()>>,
}

impl ProviderServer {
    pub fn broker(&self) -> &Arc<InMemoryBroker> {
        &self.broker
    }

    pub fn runtime(&self) -> &SyncRuntime {
        &self.runtime
    }

    /// Serve until `shutdown` resolves, then stop the consumers.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        shutdown.await;
        info!(
            pending_queries = self.runtime.bridge.pending_count(),
            "Shutting down"
        );
        for consumer in &self.consumers {
            consumer.abort();
        }
        for consumer in self.consumers {
            let _ = consumer.await;
        }
    }
}
