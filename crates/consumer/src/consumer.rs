//! Priority-weighted worker pool over several message queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use rotor_ports::MessageQueue;
use serde_json::Value;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ConsumerConfig;
use crate::error::ConsumerError;

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Processes one message. `Ok` acks it, `Err` nacks it for redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle the message `id` taken from the class with priority `rank`.
    async fn handle(&self, rank: usize, id: &str, payload: Value) -> Result<(), ConsumerError>;
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Total in-flight count below which class `rank` may take more work.
///
/// `ceil(pool × (classes − rank) / classes)`: rank 0 may use the whole pool,
/// each lower class a linearly smaller share.
pub fn admission_threshold(pool: usize, classes: usize, rank: usize) -> usize {
    if classes == 0 || rank >= classes {
        return 0;
    }
    (pool * (classes - rank)).div_ceil(classes)
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

struct Shared {
    handler: Arc<dyn MessageHandler>,
    config: ConsumerConfig,
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    released: Notify,
}

/// Drains N priority classes through one bounded pool.
///
/// Class 0 is the highest priority. Each class has its own poll loop, which
/// only takes a message while the pool's in-flight count is below that
/// class's [`admission_threshold`].
pub struct PriorityConsumer {
    classes: Vec<Arc<dyn MessageQueue>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    started: AtomicBool,
}

impl std::fmt::Debug for PriorityConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityConsumer")
            .field("classes", &self.classes.len())
            .field("config", &self.shared.config)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl PriorityConsumer {
    /// Consumer over `classes`, highest priority first.
    pub fn new(
        classes: Vec<Arc<dyn MessageQueue>>,
        handler: Arc<dyn MessageHandler>,
        config: ConsumerConfig,
    ) -> Result<Self, ConsumerError> {
        config.validate()?;
        if classes.is_empty() {
            return Err(ConsumerError::InvalidConfig(
                "at least one priority class is required".into(),
            ));
        }
        Ok(Self {
            classes,
            shared: Arc::new(Shared {
                handler,
                permits: Arc::new(Semaphore::new(config.pool_size)),
                config,
                in_flight: AtomicUsize::new(0),
                released: Notify::new(),
            }),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Messages currently being handled.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Admission threshold of class `rank`.
    pub fn threshold(&self, rank: usize) -> usize {
        admission_threshold(self.shared.config.pool_size, self.classes.len(), rank)
    }

    /// Start one poll loop per class. Calling it again does nothing.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        for (rank, queue) in self.classes.iter().enumerate() {
            let poller = Poller {
                rank,
                threshold: self.threshold(rank),
                queue: Arc::clone(queue),
                shared: Arc::clone(&self.shared),
                cancel: self.cancel.clone(),
                tracker: self.tracker.clone(),
            };
            self.tracker.spawn(poller.run());
        }
        tracing::info!(
            classes = self.classes.len(),
            pool_size = self.shared.config.pool_size,
            "priority consumer started"
        );
    }

    /// Stop polling and wait until every in-flight message is handled.
    pub async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("priority consumer drained");
    }
}

struct Poller {
    rank: usize,
    threshold: usize,
    queue: Arc<dyn MessageQueue>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Poller {
    async fn run(self) {
        let poll_timeout = self.shared.config.poll_timeout;
        loop {
            if !self.admitted().await {
                break;
            }

            // Not raced against cancellation: a dequeue dropped halfway could
            // strand the message. `poll_timeout` bounds the shutdown delay.
            let (id, payload) = match self.queue.dequeue(poll_timeout).await {
                Ok(Some(delivery)) => delivery,
                Ok(None) if self.cancel.is_cancelled() => break,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(rank = self.rank, error = %e, "dequeue failed");
                    tokio::select! {
                        () = tokio::time::sleep(poll_timeout) => continue,
                        () = self.cancel.cancelled() => break,
                    }
                }
            };

            let permit = tokio::select! {
                permit = Arc::clone(&self.shared.permits).acquire_owned() => permit.ok(),
                () = self.cancel.cancelled() => None,
            };
            let Some(permit) = permit else {
                self.settle(&id, Err(ConsumerError::handler("consumer closing"))).await;
                break;
            };

            self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
            let rank = self.rank;
            let queue = Arc::clone(&self.queue);
            let shared = Arc::clone(&self.shared);
            self.tracker.spawn(async move {
                let outcome = shared.handler.handle(rank, &id, payload).await;
                settle(queue.as_ref(), rank, &id, outcome).await;
                drop(permit);
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                shared.released.notify_waiters();
            });
        }
        tracing::debug!(rank = self.rank, "poll loop stopped");
    }

    /// Wait until the pool is below this class's threshold. `false` once
    /// the consumer is closing.
    async fn admitted(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let released = self.shared.released.notified();
            if self.shared.in_flight.load(Ordering::Acquire) < self.threshold {
                return true;
            }
            tokio::select! {
                () = released => {}
                () = self.cancel.cancelled() => return false,
            }
        }
    }

    async fn settle(&self, id: &str, outcome: Result<(), ConsumerError>) {
        settle(self.queue.as_ref(), self.rank, id, outcome).await;
    }
}

async fn settle(
    queue: &dyn MessageQueue,
    rank: usize,
    id: &str,
    outcome: Result<(), ConsumerError>,
) {
    let settled = match outcome {
        Ok(()) => queue.ack(id).await,
        Err(e) => {
            tracing::warn!(rank, id, error = %e, "message handling failed, nacking");
            queue.nack(id).await
        }
    };
    if let Err(e) = settled {
        tracing::error!(rank, id, error = %e, "failed to settle message");
    }
}
