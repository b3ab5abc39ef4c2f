//! Consumer behaviour against in-memory queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rotor_consumer::{ConsumerConfig, ConsumerError, MessageHandler, PriorityConsumer};
use rotor_ports::MessageQueue;
use rotor_queue_memory::MemoryQueue;
use serde_json::{Value, json};

fn config(pool_size: usize) -> ConsumerConfig {
    ConsumerConfig {
        pool_size,
        poll_timeout: Duration::from_millis(20),
        ..ConsumerConfig::default()
    }
}

/// Sleeps per message and tracks concurrency.
#[derive(Default)]
struct Slow {
    running: AtomicUsize,
    peak: AtomicUsize,
    done: Mutex<Vec<(usize, Value)>>,
}

#[async_trait]
impl MessageHandler for Slow {
    async fn handle(&self, rank: usize, _id: &str, payload: Value) -> Result<(), ConsumerError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.done.lock().push((rank, payload));
        Ok(())
    }
}

async fn fill(queue: &MemoryQueue, n: usize) {
    for i in 0..n {
        queue.enqueue(json!({"n": i})).await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn close_drains_in_flight_work() {
    let queue = Arc::new(MemoryQueue::new(64));
    fill(&queue, 3).await;
    let handler = Arc::new(Slow::default());
    let consumer =
        PriorityConsumer::new(vec![queue.clone() as Arc<dyn MessageQueue>], handler.clone(), config(4)).unwrap();

    consumer.start();
    while consumer.in_flight() < 3 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    consumer.close().await;

    assert_eq!(consumer.in_flight(), 0);
    assert_eq!(handler.done.lock().len(), 3);
    assert_eq!(queue.in_flight().await, 0);
    assert!(queue.is_empty().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn low_class_stays_under_its_threshold() {
    let high = Arc::new(MemoryQueue::new(64));
    let low = Arc::new(MemoryQueue::new(64));
    fill(&low, 10).await;
    let handler = Arc::new(Slow::default());
    let consumer =
        PriorityConsumer::new(vec![high.clone() as Arc<dyn MessageQueue>, low.clone()], handler.clone(), config(4))
            .unwrap();
    assert_eq!(consumer.threshold(1), 2);

    consumer.start();
    while handler.done.lock().len() < 10 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    consumer.close().await;

    assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn high_class_uses_the_whole_pool() {
    let high = Arc::new(MemoryQueue::new(64));
    let low = Arc::new(MemoryQueue::new(64));
    fill(&high, 8).await;
    let handler = Arc::new(Slow::default());
    let consumer =
        PriorityConsumer::new(vec![high.clone() as Arc<dyn MessageQueue>, low.clone()], handler.clone(), config(4))
            .unwrap();

    consumer.start();
    while handler.done.lock().len() < 8 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    consumer.close().await;

    assert_eq!(handler.peak.load(Ordering::SeqCst), 4);
    assert!(handler.done.lock().iter().all(|(rank, _)| *rank == 0));
}

/// Fails the first delivery of every message.
#[derive(Default)]
struct FlakyOnce {
    seen: Mutex<Vec<String>>,
    handled: AtomicUsize,
}

#[async_trait]
impl MessageHandler for FlakyOnce {
    async fn handle(&self, _rank: usize, id: &str, _payload: Value) -> Result<(), ConsumerError> {
        let mut seen = self.seen.lock();
        if !seen.iter().any(|s| s == id) {
            seen.push(id.to_owned());
            return Err(ConsumerError::handler("transient"));
        }
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn failed_messages_are_redelivered() {
    let queue = Arc::new(MemoryQueue::new(64));
    fill(&queue, 2).await;
    let handler = Arc::new(FlakyOnce::default());
    let consumer =
        PriorityConsumer::new(vec![queue.clone() as Arc<dyn MessageQueue>], handler.clone(), config(2)).unwrap();

    consumer.start();
    while handler.handled.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    consumer.close().await;

    assert_eq!(handler.seen.lock().len(), 2);
    assert!(queue.is_empty().await.unwrap());
}

#[test]
fn rejects_empty_class_list() {
    let err = PriorityConsumer::new(Vec::new(), Arc::new(Slow::default()), config(1)).unwrap_err();
    assert!(matches!(err, ConsumerError::InvalidConfig(_)));
}
