//! Synchronous query bridge.
//!
//! A caller asks for the patients matching a status filter; the answer only
//! exists on the patient service, which replies asynchronously on a shared
//! response queue. Each query registers a one-shot slot under a fresh request
//! id, publishes the request and waits for the slot to be filled or the
//! deadline to pass:
//!
//! ```text
//! ISSUED -> WAITING -> MATCHED
//!                   \-> TIMED_OUT
//! ```
//!
//! The slot is removed on every exit path, so late replies find nothing and
//! are dropped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carelink_broker::{Delivery, HandlerError, MessageHandler};
use carelink_core::{PatientRecord, StatusFilter, SyncRequest, SyncResponse, generate_request_id};
use carelink_storage::{DynPatientStore, UpsertOutcome};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::publisher::CommandPublisher;

type ResponseSender = oneshot::Sender<Vec<PatientRecord>>;

/// Queries waiting for their response, keyed by request id.
///
/// Registration and the uncorrelated claim share `registration`, so no query
/// can be added between counting the waiters and taking the only one.
/// Claims by request id and slot removal do not need it.
#[derive(Default)]
struct PendingQueries {
    slots: DashMap<String, ResponseSender>,
    registration: Mutex<()>,
}

impl PendingQueries {
    fn register(&self, request_id: String, tx: ResponseSender) {
        let _guard = self.registration.lock();
        self.slots.insert(request_id, tx);
    }

    fn remove(&self, request_id: &str) -> Option<ResponseSender> {
        self.slots.remove(request_id).map(|(_, tx)| tx)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// Take the waiter only if it is the sole one.
    fn claim_sole(&self) -> Result<(String, ResponseSender), usize> {
        let _guard = self.registration.lock();
        self.claim_sole_locked()
    }

    fn claim_sole_locked(&self) -> Result<(String, ResponseSender), usize> {
        let waiting = self.slots.len();
        if waiting != 1 {
            return Err(waiting);
        }
        let request_id = self
            .slots
            .iter()
            .next()
            .map(|entry| entry.key().clone())
            .ok_or(0usize)?;
        self.remove(&request_id)
            .map(|tx| (request_id, tx))
            .ok_or(0usize)
    }
}

/// `sync` section of the application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// How long a query waits for its response
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Apply records from correlated responses to the replica
    #[serde(default = "default_true")]
    pub mirror_responses: bool,
    /// Accept bare-array responses when exactly one query is waiting
    #[serde(default = "default_true")]
    pub legacy_uncorrelated_responses: bool,
}

fn default_response_timeout_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            mirror_responses: true,
            legacy_uncorrelated_responses: true,
        }
    }
}

impl BridgeConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.response_timeout_ms == 0 {
            return Err("sync.response_timeout_ms must be > 0".into());
        }
        Ok(())
    }
}

/// Terminal state of one query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Matched(Vec<PatientRecord>),
    TimedOut,
    /// The request never left; no reply can arrive.
    PublishFailed,
}

/// Removes the pending slot when the query ends, however it ends.
struct PendingSlot<'a> {
    pending: &'a PendingQueries,
    request_id: &'a str,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.request_id);
    }
}

pub struct QueryBridge {
    publisher: Arc<CommandPublisher>,
    pending: Arc<PendingQueries>,
    config: BridgeConfig,
}

impl QueryBridge {
    pub fn new(publisher: Arc<CommandPublisher>, config: BridgeConfig) -> Self {
        Self {
            publisher,
            pending: Arc::new(PendingQueries::default()),
            config,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Queries currently waiting for a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Consumer for the sync response queue, sharing this bridge's slots.
    ///
    /// `store` receives mirrored records when `mirror_responses` is on.
    pub fn response_handler(&self, store: DynPatientStore) -> SyncResponseHandler {
        SyncResponseHandler {
            pending: self.pending.clone(),
            mirror: self.config.mirror_responses.then_some(store),
            legacy_uncorrelated: self.config.legacy_uncorrelated_responses,
        }
    }

    /// Patients of `provider_id` matching `status`.
    ///
    /// Returns an empty list when no response arrives in time; that case is
    /// logged but indistinguishable from "no patients" for the caller.
    pub async fn get_patients(&self, provider_id: &str, status: StatusFilter) -> Vec<PatientRecord> {
        match self.query(provider_id, status).await {
            QueryOutcome::Matched(patients) => {
                let total = patients.len();
                let matching: Vec<PatientRecord> = patients
                    .into_iter()
                    .filter(|p| status.matches(p.account_status))
                    .collect();
                info!(
                    provider_id = %provider_id,
                    status = %status.as_str(),
                    total,
                    matching = matching.len(),
                    "Retrieved patients"
                );
                matching
            }
            QueryOutcome::TimedOut | QueryOutcome::PublishFailed => Vec::new(),
        }
    }

    /// Run one query through its state machine without filtering the result.
    pub async fn query(&self, provider_id: &str, status: StatusFilter) -> QueryOutcome {
        let request_id = generate_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.register(request_id.clone(), tx);
        let _slot = PendingSlot {
            pending: &self.pending,
            request_id: &request_id,
        };

        let request = SyncRequest {
            request_id: request_id.clone(),
            provider_id: provider_id.to_string(),
            status,
        };
        if let Err(e) = self.publisher.publish_sync_request(&request).await {
            warn!(
                request_id = %request_id,
                provider_id = %provider_id,
                error = %e,
                "Failed to publish sync request"
            );
            return QueryOutcome::PublishFailed;
        }
        debug!(request_id = %request_id, provider_id = %provider_id, "Sync request sent, waiting for response");

        let timeout = self.config.response_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(patients)) => QueryOutcome::Matched(patients),
            Ok(Err(_)) => {
                warn!(request_id = %request_id, "Sync response slot closed without a response");
                QueryOutcome::TimedOut
            }
            Err(_) => {
                warn!(
                    request_id = %request_id,
                    provider_id = %provider_id,
                    timeout_ms = self.config.response_timeout_ms,
                    "No sync response received within timeout"
                );
                QueryOutcome::TimedOut
            }
        }
    }
}

impl std::fmt::Debug for QueryBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBridge")
            .field("pending", &self.pending.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Consumer of the sync response queue.
pub struct SyncResponseHandler {
    pending: Arc<PendingQueries>,
    mirror: Option<DynPatientStore>,
    legacy_uncorrelated: bool,
}

impl SyncResponseHandler {
    /// Find the waiter a response belongs to, removing its slot.
    fn claim(&self, request_id: Option<&str>) -> Option<ResponseSender> {
        match request_id {
            Some(id) => {
                let claimed = self.pending.remove(id);
                if claimed.is_none() {
                    warn!(request_id = %id, "Sync response for unknown or expired request, dropped");
                }
                claimed
            }
            None if self.legacy_uncorrelated => self.claim_sole_waiter(),
            None => {
                warn!("Uncorrelated sync response ignored");
                None
            }
        }
    }

    /// A response without a request id can only be attributed when exactly
    /// one query is waiting.
    fn claim_sole_waiter(&self) -> Option<ResponseSender> {
        match self.pending.claim_sole() {
            Ok((request_id, tx)) => {
                debug!(request_id = %request_id, "Matched uncorrelated sync response to sole waiter");
                Some(tx)
            }
            Err(waiting) => {
                warn!(waiting, "Uncorrelated sync response cannot be matched, dropped");
                None
            }
        }
    }

    async fn mirror(&self, patients: &[PatientRecord]) {
        let Some(store) = &self.mirror else {
            return;
        };
        let mut refreshed = 0usize;
        for patient in patients {
            match store.upsert_if_newer(patient.clone()).await {
                Ok(UpsertOutcome::Stale) => {}
                Ok(_) => refreshed += 1,
                Err(e) => warn!(
                    patient_id = %patient.id,
                    category = %e.category(),
                    error = %e,
                    "Failed to mirror patient into replica"
                ),
            }
        }
        debug!(received = patients.len(), refreshed, "Mirrored sync response into replica");
    }
}

#[async_trait]
impl MessageHandler for SyncResponseHandler {
    fn name(&self) -> &str {
        "patient-sync-response"
    }

    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let SyncResponse {
            request_id,
            patients,
        } = delivery.decode()?;
        info!(
            request_id = request_id.as_deref().unwrap_or("-"),
            count = patients.len(),
            "Received patients from patient service"
        );

        if request_id.is_some() {
            self.mirror(&patients).await;
        }

        if let Some(tx) = self.claim(request_id.as_deref()) {
            if tx.send(patients).is_err() {
                debug!("Waiter gave up before the response was delivered");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_broker::{DynBroker, InMemoryBroker, MessageBroker, Topology, TopologyConfig};
    use carelink_core::AccountStatus;
    use carelink_storage::{InMemoryPatientStore, PatientStore};
    use serde_json::json;

    struct Harness {
        broker: Arc<InMemoryBroker>,
        bridge: Arc<QueryBridge>,
        handler: SyncResponseHandler,
        store: Arc<InMemoryPatientStore>,
    }

    async fn harness(config: BridgeConfig) -> Harness {
        let broker = Arc::new(InMemoryBroker::new());
        let topology = TopologyConfig::default();
        broker.declare(&Topology::provider(&topology)).await.unwrap();
        let dyn_broker: DynBroker = broker.clone();
        let publisher = Arc::new(CommandPublisher::new(dyn_broker, topology));
        let bridge = Arc::new(QueryBridge::new(publisher, config));
        let store = Arc::new(InMemoryPatientStore::new());
        let handler = bridge.response_handler(store.clone());
        Harness {
            broker,
            bridge,
            handler,
            store,
        }
    }

    fn patient(id: &str, status: AccountStatus) -> PatientRecord {
        PatientRecord::new(id, format!("{id}@example.com"), status, None)
    }

    fn response_delivery(body: serde_json::Value) -> Delivery {
        Delivery::new("patient.exchange", "patient.sync.response", body)
    }

    async fn wait_for_pending(bridge: &QueryBridge, n: usize) {
        while bridge.pending_count() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_empty_and_clears_slot() {
        let h = harness(BridgeConfig::default()).await;
        let started = tokio::time::Instant::now();
        let patients = h.bridge.get_patients("prov1", StatusFilter::All).await;
        assert!(patients.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(3000));
        assert_eq!(h.bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_returns_immediately() {
        let h = harness(BridgeConfig::default()).await;
        h.broker.set_available(false);
        let outcome = h.bridge.query("prov1", StatusFilter::All).await;
        assert_eq!(outcome, QueryOutcome::PublishFailed);
        assert_eq!(h.bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_correlated_response_matches_waiter() {
        let h = harness(BridgeConfig::default()).await;
        let mut requests = h.broker.consume("patient.sync.queue").await.unwrap();

        let bridge = h.bridge.clone();
        let query = tokio::spawn(async move {
            bridge
                .get_patients("prov1", "active".parse().unwrap())
                .await
        });

        let request: SyncRequest = requests.recv().await.unwrap().decode().unwrap();
        assert_eq!(request.provider_id, "prov1");
        let response = SyncResponse::correlated(
            request.request_id,
            vec![
                patient("p1", AccountStatus::Pending),
                patient("p2", AccountStatus::Active),
            ],
        );
        h.handler
            .handle(&response_delivery(serde_json::to_value(&response).unwrap()))
            .await
            .unwrap();

        let patients = query.await.unwrap();
        assert_eq!(patients.len(), 1);
        assert_eq!(patients[0].id, "p2");
        assert_eq!(h.store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_legacy_response_goes_to_sole_waiter() {
        let h = harness(BridgeConfig::default()).await;
        let bridge = h.bridge.clone();
        let query = tokio::spawn(async move { bridge.get_patients("prov1", StatusFilter::All).await });
        wait_for_pending(&h.bridge, 1).await;

        h.handler
            .handle(&response_delivery(json!([{"id": "p1", "accountStatus": "PENDING"}])))
            .await
            .unwrap();

        let patients = query.await.unwrap();
        assert_eq!(patients.len(), 1);
        // bare arrays are not mirrored
        assert!(h.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_response_dropped_when_ambiguous() {
        let h = harness(BridgeConfig::default()).await;
        let a = {
            let bridge = h.bridge.clone();
            tokio::spawn(async move { bridge.get_patients("prov1", StatusFilter::All).await })
        };
        let b = {
            let bridge = h.bridge.clone();
            tokio::spawn(async move { bridge.get_patients("prov2", StatusFilter::All).await })
        };
        wait_for_pending(&h.bridge, 2).await;

        h.handler
            .handle(&response_delivery(json!([{"id": "p1", "accountStatus": "PENDING"}])))
            .await
            .unwrap();

        assert!(a.await.unwrap().is_empty());
        assert!(b.await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_legacy_fallback_can_be_disabled() {
        let h = harness(BridgeConfig {
            legacy_uncorrelated_responses: false,
            ..BridgeConfig::default()
        })
        .await;
        let bridge = h.bridge.clone();
        let query = tokio::spawn(async move { bridge.get_patients("prov1", StatusFilter::All).await });
        wait_for_pending(&h.bridge, 1).await;

        h.handler
            .handle(&response_delivery(json!([{"id": "p1", "accountStatus": "PENDING"}])))
            .await
            .unwrap();
        assert!(query.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_late_response_is_dropped() {
        let h = harness(BridgeConfig::default()).await;
        let response = SyncResponse::correlated("expired", vec![patient("p1", AccountStatus::Active)]);
        h.handler
            .handle(&response_delivery(serde_json::to_value(&response).unwrap()))
            .await
            .unwrap();
        assert_eq!(h.bridge.pending_count(), 0);
        // still mirrored
        assert!(h.store.exists_by_id("p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_mirroring_disabled() {
        let h = harness(BridgeConfig {
            mirror_responses: false,
            ..BridgeConfig::default()
        })
        .await;
        let response = SyncResponse::correlated("r1", vec![patient("p1", AccountStatus::Active)]);
        h.handler
            .handle(&response_delivery(serde_json::to_value(&response).unwrap()))
            .await
            .unwrap();
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_record_does_not_sink_response() {
        let h = harness(BridgeConfig::default()).await;
        let mut requests = h.broker.consume("patient.sync.queue").await.unwrap();

        let bridge = h.bridge.clone();
        let query = tokio::spawn(async move { bridge.get_patients("prov1", StatusFilter::All).await });

        let request: SyncRequest = requests.recv().await.unwrap().decode().unwrap();
        h.handler
            .handle(&response_delivery(json!({
                "requestId": request.request_id,
                "patients": [
                    {
                        "id": "p1",
                        "email": "a@b.com",
                        "firstName": null,
                        "accountStatus": "PENDING",
                        "createdAt": "2024-03-01T09:30:00",
                        "updatedAt": null
                    },
                    {"id": "p2", "email": null, "accountStatus": "SUSPENDED"},
                    {"id": "p3", "email": "c@d.com", "accountStatus": "ACTIVE"}
                ]
            })))
            .await
            .unwrap();

        let ids: Vec<_> = query.await.unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["p1", "p3"]);
        assert_eq!(h.store.count().await.unwrap(), 2);
    }

    #[test]
    fn test_registration_waits_for_uncorrelated_claim() {
        let pending = Arc::new(PendingQueries::default());
        let (tx_a, mut rx_a) = oneshot::channel();
        pending.register("a".into(), tx_a);

        let guard = pending.registration.lock();
        let late = {
            let pending = pending.clone();
            std::thread::spawn(move || {
                let (tx_b, _rx_b) = oneshot::channel();
                pending.register("b".into(), tx_b);
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(pending.len(), 1);

        let (request_id, tx) = pending.claim_sole_locked().unwrap();
        assert_eq!(request_id, "a");
        drop(guard);
        late.join().unwrap();

        tx.send(Vec::new()).unwrap();
        assert!(rx_a.try_recv().is_ok());
        assert_eq!(pending.len(), 1);
        assert!(pending.remove("b").is_some());
    }

    #[test]
    fn test_sole_claim_refuses_two_waiters() {
        let pending = PendingQueries::default();
        let (tx_a, _rx_a) = oneshot::channel();
        let (tx_b, _rx_b) = oneshot::channel();
        pending.register("a".into(), tx_a);
        pending.register("b".into(), tx_b);

        assert_eq!(pending.claim_sole().err(), Some(2));
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_config_defaults_and_validation() {
        let config: BridgeConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.response_timeout(), Duration::from_secs(3));

        let zero = BridgeConfig {
            response_timeout_ms: 0,
            ..BridgeConfig::default()
        };
        assert!(zero.validate().is_err());
    }
}
