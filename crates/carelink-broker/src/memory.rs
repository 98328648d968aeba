//! In-process topic broker.
//!
//! Exchanges hold their bindings; every queue is a bounded tokio channel with
//! exactly one consumer. A message matching several bindings of the same queue
//! is delivered to that queue once.

use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::broker::{MessageBroker, QueueReceiver};
use crate::error::BrokerError;
use crate::message::Delivery;
use crate::topology::{Binding, ExchangeDeclaration, QueueDeclaration, Topology};

/// Default buffer size for each queue.
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

struct ExchangeState {
    declaration: ExchangeDeclaration,
    bindings: Vec<Binding>,
}

struct QueueState {
    declaration: QueueDeclaration,
    sender: mpsc::Sender<Delivery>,
    receiver: Mutex<Option<QueueReceiver>>,
}

/// Topic broker living inside the process.
pub struct InMemoryBroker {
    exchanges: DashMap<String, ExchangeState>,
    queues: DashMap<String, QueueState>,
    queue_capacity: usize,
    available: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a broker whose queues buffer up to `queue_capacity` deliveries.
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            exchanges: DashMap::new(),
            queues: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining the broker connection.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        info!(available, "Broker availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.contains_key(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Bindings currently attached to an exchange.
    pub fn bindings(&self, exchange: &str) -> Vec<Binding> {
        self.exchanges
            .get(exchange)
            .map(|state| state.bindings.clone())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<(), BrokerError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(BrokerError::unavailable("in-memory broker marked unavailable"))
        }
    }

    fn declare_exchange(&self, declaration: &ExchangeDeclaration) -> Result<(), BrokerError> {
        if let Some(existing) = self.exchanges.get(&declaration.name) {
            if existing.declaration != *declaration {
                return Err(BrokerError::DeclarationConflict {
                    name: declaration.name.clone(),
                    message: format!(
                        "declared as {:?}, redeclared as {:?}",
                        existing.declaration.kind, declaration.kind
                    ),
                });
            }
            return Ok(());
        }
        self.exchanges
            .entry(declaration.name.clone())
            .or_insert_with(|| ExchangeState {
                declaration: declaration.clone(),
                bindings: Vec::new(),
            });
        debug!(exchange = %declaration.name, kind = ?declaration.kind, "Declared exchange");
        Ok(())
    }

    fn declare_queue(&self, declaration: &QueueDeclaration) -> Result<(), BrokerError> {
        if let Some(existing) = self.queues.get(&declaration.name) {
            if existing.declaration != *declaration {
                return Err(BrokerError::DeclarationConflict {
                    name: declaration.name.clone(),
                    message: "durability differs".into(),
                });
            }
            return Ok(());
        }
        let capacity = self.queue_capacity;
        self.queues
            .entry(declaration.name.clone())
            .or_insert_with(|| {
                let (sender, receiver) = mpsc::channel(capacity);
                QueueState {
                    declaration: declaration.clone(),
                    sender,
                    receiver: Mutex::new(Some(receiver)),
                }
            });
        debug!(queue = %declaration.name, durable = declaration.durable, "Declared queue");
        Ok(())
    }

    fn bind(&self, binding: &Binding) -> Result<(), BrokerError> {
        if !self.queues.contains_key(&binding.queue) {
            return Err(BrokerError::queue_not_found(&binding.queue));
        }
        let mut exchange = self
            .exchanges
            .get_mut(&binding.exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(&binding.exchange))?;
        if !exchange.bindings.contains(binding) {
            exchange.bindings.push(binding.clone());
            debug!(
                exchange = %binding.exchange,
                queue = %binding.queue,
                routing_key = %binding.routing_key,
                "Bound queue"
            );
        }
        Ok(())
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<BTreeSet<String>, BrokerError> {
        let state = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::exchange_not_found(exchange))?;
        let kind = state.declaration.kind;
        Ok(state
            .bindings
            .iter()
            .filter(|b| kind.routes(&b.routing_key, routing_key))
            .map(|b| b.queue.clone())
            .collect())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("exchanges", &self.exchanges.len())
            .field("queues", &self.queues.len())
            .field("available", &self.is_available())
            .finish()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn declare(&self, topology: &Topology) -> Result<(), BrokerError> {
        self.ensure_available()?;
        for exchange in &topology.exchanges {
            self.declare_exchange(exchange)?;
        }
        for queue in &topology.queues {
            self.declare_queue(queue)?;
        }
        for binding in &topology.bindings {
            self.bind(binding)?;
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Value,
    ) -> Result<usize, BrokerError> {
        self.ensure_available()?;
        let targets = self.route(exchange, routing_key)?;
        if targets.is_empty() {
            debug!(exchange, routing_key, "No binding matched, message dropped");
            return Ok(0);
        }

        let delivery = Delivery::new(exchange, routing_key, body);
        let mut delivered = 0;
        for queue in targets {
            let Some(state) = self.queues.get(&queue) else {
                continue;
            };
            match state.sender.try_send(delivery.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(queue = %queue, routing_key, "Queue full, message dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(queue = %queue, routing_key, "Queue consumer gone, message dropped");
                }
            }
        }
        debug!(
            exchange,
            routing_key,
            message_id = %delivery.message_id,
            queues = delivered,
            "Published message"
        );
        Ok(delivered)
    }

    async fn consume(&self, queue: &str) -> Result<QueueReceiver, BrokerError> {
        self.ensure_available()?;
        let state = self
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::queue_not_found(queue))?;
        let mut slot = state
            .receiver
            .lock()
            .map_err(|_| BrokerError::unavailable(format!("queue {queue} lock poisoned")))?;
        slot.take().ok_or_else(|| BrokerError::ConsumerAttached {
            queue: queue.to_string(),
        })
    }
}
