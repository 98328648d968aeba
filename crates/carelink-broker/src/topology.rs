//! Exchange, queue and binding declarations.
//!
//! Two topologies coexist on the broker:
//!
//! ```text
//! patient-care-exchange (topic)            patient.exchange (topic)
//!   patient.activation   -> activation q     patient.status.update -> status q
//!   medical.updates      -> medical q        patient.sync.request  -> sync q
//!   patient.registration -> registration q   patient.sync.response -> sync response q
//! ```
//!
//! `patient.profile.update` has no binding on the provider side; the patient
//! service declares its own queue for it. Until it does, those messages are
//! dropped by the exchange.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exchange routing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Pattern match on dot-separated words (`*` one word, `#` zero or more)
    Topic,
    /// Exact routing key match
    Direct,
    /// Every bound queue receives every message
    Fanout,
}

impl ExchangeKind {
    /// Check whether a binding key routes a message with `routing_key`.
    pub fn routes(&self, binding_key: &str, routing_key: &str) -> bool {
        match self {
            ExchangeKind::Topic => topic_matches(binding_key, routing_key),
            ExchangeKind::Direct => binding_key == routing_key,
            ExchangeKind::Fanout => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
}

/// Binds a queue to an exchange under a routing pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// A set of declarations applied together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeDeclaration>,
    pub queues: Vec<QueueDeclaration>,
    pub bindings: Vec<Binding>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a durable topic exchange.
    pub fn topic_exchange(mut self, name: impl Into<String>) -> Self {
        self.exchanges.push(ExchangeDeclaration {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
        });
        self
    }

    /// Declare a durable queue bound to `exchange` under `routing_key`.
    pub fn bound_queue(
        mut self,
        queue: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        let queue = queue.into();
        self.queues.push(QueueDeclaration {
            name: queue.clone(),
            durable: true,
        });
        self.bindings.push(Binding {
            queue,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
        });
        self
    }

    /// Activation, medical update and registration traffic.
    pub fn care(config: &TopologyConfig) -> Self {
        let exchange = &config.care_exchange;
        let keys = &config.routing_keys;
        let queues = &config.queues;
        Self::new()
            .topic_exchange(exchange)
            .bound_queue(&queues.patient_activation, exchange, &keys.patient_activation)
            .bound_queue(&queues.medical_updates, exchange, &keys.medical_updates)
            .bound_queue(
                &queues.patient_registration,
                exchange,
                &keys.patient_registration,
            )
    }

    /// Status update commands and the sync query/response pair.
    pub fn sync(config: &TopologyConfig) -> Self {
        let exchange = &config.sync_exchange;
        let keys = &config.routing_keys;
        let queues = &config.queues;
        Self::new()
            .topic_exchange(exchange)
            .bound_queue(&queues.patient_status, exchange, &keys.patient_status_update)
            .bound_queue(&queues.patient_sync, exchange, &keys.patient_sync_request)
            .bound_queue(
                &queues.patient_sync_response,
                exchange,
                &keys.patient_sync_response,
            )
    }

    /// Everything the provider service declares.
    pub fn provider(config: &TopologyConfig) -> Self {
        Self::care(config).merge(Self::sync(config))
    }

    pub fn merge(mut self, other: Topology) -> Self {
        self.exchanges.extend(other.exchanges);
        self.queues.extend(other.queues);
        self.bindings.extend(other.bindings);
        self
    }
}

/// Topic pattern match over dot-separated words.
///
/// `*` matches exactly one word and `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&first, key_rest)) => (word == "*" || word == first) && match_words(rest, key_rest),
            None => false,
        },
    }
}

/// Queue names declared by the provider service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNames {
    #[serde(default = "default_patient_activation_queue")]
    pub patient_activation: String,
    #[serde(default = "default_medical_updates_queue")]
    pub medical_updates: String,
    #[serde(default = "default_patient_registration_queue")]
    pub patient_registration: String,
    #[serde(default = "default_patient_status_queue")]
    pub patient_status: String,
    #[serde(default = "default_patient_sync_queue")]
    pub patient_sync: String,
    #[serde(default = "default_patient_sync_response_queue")]
    pub patient_sync_response: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            patient_activation: default_patient_activation_queue(),
            medical_updates: default_medical_updates_queue(),
            patient_registration: default_patient_registration_queue(),
            patient_status: default_patient_status_queue(),
            patient_sync: default_patient_sync_queue(),
            patient_sync_response: default_patient_sync_response_queue(),
        }
    }
}

/// Routing keys of every message kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingKeys {
    #[serde(default = "default_patient_activation_key")]
    pub patient_activation: String,
    #[serde(default = "default_medical_updates_key")]
    pub medical_updates: String,
    #[serde(default = "default_patient_registration_key")]
    pub patient_registration: String,
    #[serde(default = "default_patient_profile_update_key")]
    pub patient_profile_update: String,
    #[serde(default = "default_patient_status_update_key")]
    pub patient_status_update: String,
    #[serde(default = "default_patient_sync_request_key")]
    pub patient_sync_request: String,
    #[serde(default = "default_patient_sync_response_key")]
    pub patient_sync_response: String,
}

impl Default for RoutingKeys {
    fn default() -> Self {
        Self {
            patient_activation: default_patient_activation_key(),
            medical_updates: default_medical_updates_key(),
            patient_registration: default_patient_registration_key(),
            patient_profile_update: default_patient_profile_update_key(),
            patient_status_update: default_patient_status_update_key(),
            patient_sync_request: default_patient_sync_request_key(),
            patient_sync_response: default_patient_sync_response_key(),
        }
    }
}

/// Broker section of the application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyConfig {
    #[serde(default = "default_care_exchange")]
    pub care_exchange: String,
    #[serde(default = "default_sync_exchange")]
    pub sync_exchange: String,
    /// Per-queue buffer; deliveries beyond it are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound for a single handler invocation
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
    #[serde(default)]
    pub queues: QueueNames,
    #[serde(default)]
    pub routing_keys: RoutingKeys,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            care_exchange: default_care_exchange(),
            sync_exchange: default_sync_exchange(),
            queue_capacity: default_queue_capacity(),
            handler_timeout_ms: default_handler_timeout_ms(),
            queues: QueueNames::default(),
            routing_keys: RoutingKeys::default(),
        }
    }
}

impl TopologyConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.care_exchange.is_empty() || self.sync_exchange.is_empty() {
            return Err("broker exchange names must not be empty".into());
        }
        let queues = &self.queues;
        let names = [
            &queues.patient_activation,
            &queues.medical_updates,
            &queues.patient_registration,
            &queues.patient_status,
            &queues.patient_sync,
            &queues.patient_sync_response,
        ];
        if names.iter().any(|n| n.is_empty()) {
            return Err("broker queue names must not be empty".into());
        }
        let keys = &self.routing_keys;
        let keys = [
            &keys.patient_activation,
            &keys.medical_updates,
            &keys.patient_registration,
            &keys.patient_profile_update,
            &keys.patient_status_update,
            &keys.patient_sync_request,
            &keys.patient_sync_response,
        ];
        if keys.iter().any(|k| k.is_empty()) {
            return Err("broker routing keys must not be empty".into());
        }
        if self.queue_capacity == 0 {
            return Err("broker.queue_capacity must be > 0".into());
        }
        if self.handler_timeout_ms == 0 {
            return Err("broker.handler_timeout_ms must be > 0".into());
        }
        Ok(())
    }
}

fn default_care_exchange() -> String {
    "patient-care-exchange".into()
}
fn default_sync_exchange() -> String {
    "patient.exchange".into()
}
fn default_patient_activation_queue() -> String {
    "patient-activation-queue".into()
}
fn default_medical_updates_queue() -> String {
    "medical-updates-queue".into()
}
fn default_patient_registration_queue() -> String {
    "patient-registration-queue".into()
}
fn default_patient_status_queue() -> String {
    "patient.status.queue".into()
}
fn default_patient_sync_queue() -> String {
    "patient.sync.queue".into()
}
fn default_patient_sync_response_queue() -> String {
    "patient.sync.response.queue".into()
}
fn default_patient_activation_key() -> String {
    "patient.activation".into()
}
fn default_medical_updates_key() -> String {
    "medical.updates".into()
}
fn default_patient_registration_key() -> String {
    "patient.registration".into()
}
fn default_patient_profile_update_key() -> String {
    "patient.profile.update".into()
}
fn default_patient_status_update_key() -> String {
    "patient.status.update".into()
}
fn default_patient_sync_request_key() -> String {
    "patient.sync.request".into()
}
fn default_patient_sync_response_key() -> String {
    "patient.sync.response".into()
}
fn default_queue_capacity() -> usize {
    1024
}
fn default_handler_timeout_ms() -> u64 {
    30_000
}
