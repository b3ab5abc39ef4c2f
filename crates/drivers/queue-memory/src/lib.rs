#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Rotor Queue Memory Driver
//!
//! In-process transport for tests and single-node deployments.
//!
//! - [`MemoryQueue`]: bounded [`MessageQueue`] with ack/nack and in-flight
//!   tracking, built on `tokio::sync::mpsc`
//! - [`MemoryBroker`]: topic → queue map implementing [`MessagePublisher`];
//!   every publication is also kept for inspection
//!
//! Nothing survives a restart.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use rotor_ports::{MessagePublisher, MessageQueue, OutboundMessage};
//! use rotor_queue_memory::MemoryBroker;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = MemoryBroker::new(1024);
//! broker
//!     .publish("events.retry", OutboundMessage {
//!         key: None,
//!         headers: Default::default(),
//!         payload: serde_json::json!({"type": "track"}),
//!     })
//!     .await?;
//!
//! let queue = broker.queue("events.retry");
//! if let Some((id, envelope)) = queue.dequeue(Duration::from_secs(1)).await? {
//!     println!("{}", envelope["payload"]);
//!     queue.ack(&id).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rotor_ports::{MessagePublisher, MessageQueue, OutboundMessage, PortsError};
use tokio::sync::{Mutex, mpsc};

#[derive(Debug, Clone)]
struct Delivery {
    id: String,
    payload: serde_json::Value,
}

/// Bounded in-memory queue.
///
/// A message is queued, then in flight once dequeued, then either gone
/// (acked) or queued again at the back (nacked).
pub struct MemoryQueue {
    sender: mpsc::Sender<Delivery>,
    receiver: Mutex<mpsc::Receiver<Delivery>>,
    in_flight: Mutex<HashMap<String, Delivery>>,
    queued: AtomicUsize,
}

impl std::fmt::Debug for MemoryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("queued", &self.queued.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryQueue {
    /// Queue holding at most `capacity` queued messages. `enqueue` fails
    /// with [`PortsError::Backend`] beyond that.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Mutex::new(receiver),
            in_flight: Mutex::new(HashMap::new()),
            queued: AtomicUsize::new(0),
        }
    }

    /// Messages dequeued but not yet acked or nacked.
    pub async fn in_flight(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    fn push(&self, delivery: Delivery) -> Result<(), PortsError> {
        self.sender
            .try_send(delivery)
            .map_err(|e| PortsError::Backend(format!("queue full or closed: {e}")))?;
        self.queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn enqueue(&self, payload: serde_json::Value) -> Result<String, PortsError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.push(Delivery {
            id: id.clone(),
            payload,
        })?;
        Ok(id)
    }

    async fn dequeue(
        &self,
        timeout: Duration,
    ) -> Result<Option<(String, serde_json::Value)>, PortsError> {
        let mut rx = self.receiver.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(delivery)) => {
                self.queued.fetch_sub(1, Ordering::Relaxed);
                let out = (delivery.id.clone(), delivery.payload.clone());
                self.in_flight
                    .lock()
                    .await
                    .insert(delivery.id.clone(), delivery);
                Ok(Some(out))
            }
            // closed or timed out
            Ok(None) | Err(_) => Ok(None),
        }
    }

    async fn ack(&self, id: &str) -> Result<(), PortsError> {
        match self.in_flight.lock().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(PortsError::not_found("Message", id)),
        }
    }

    async fn nack(&self, id: &str) -> Result<(), PortsError> {
        let delivery = self.in_flight.lock().await.remove(id);
        match delivery {
            Some(delivery) => self.push(delivery),
            None => Err(PortsError::not_found("Message", id)),
        }
    }

    async fn len(&self) -> Result<usize, PortsError> {
        Ok(self.queued.load(Ordering::Relaxed))
    }
}

/// A message as it was published.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    /// Topic.
    pub topic: String,
    /// The message.
    pub message: OutboundMessage,
}

/// Topic broker backed by [`MemoryQueue`]s.
///
/// Publishing enqueues the message envelope (`{key, headers, payload}`) on
/// the topic's queue, creating it on first use.
#[derive(Debug)]
pub struct MemoryBroker {
    capacity: usize,
    topics: DashMap<String, Arc<MemoryQueue>>,
    published: parking_lot::Mutex<Vec<Publication>>,
}

impl MemoryBroker {
    /// Broker whose topic queues hold `capacity` messages each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: DashMap::new(),
            published: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Queue of `topic`.
    pub fn queue(&self, topic: &str) -> Arc<MemoryQueue> {
        Arc::clone(
            self.topics
                .entry(topic.to_owned())
                .or_insert_with(|| Arc::new(MemoryQueue::new(self.capacity)))
                .value(),
        )
    }

    /// Every publication so far, in order.
    pub fn published(&self) -> Vec<Publication> {
        self.published.lock().clone()
    }

    /// Publications on `topic`.
    pub fn published_to(&self, topic: &str) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.message.clone())
            .collect()
    }
}

#[async_trait]
impl MessagePublisher for MemoryBroker {
    async fn publish(&self, topic: &str, message: OutboundMessage) -> Result<(), PortsError> {
        let envelope = serde_json::json!({
            "key": &message.key,
            "headers": &message.headers,
            "payload": &message.payload,
        });
        self.queue(topic).enqueue(envelope).await?;
        tracing::debug!(topic, "message published");
        self.published.lock().push(Publication {
            topic: topic.to_owned(),
            message,
        });
        Ok(())
    }
}
