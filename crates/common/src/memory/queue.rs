use crate::nats::{topic_of, Delivery, MessageHeaders, Queue, Subscription, PRIMING_PAYLOAD};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: MessageHeaders,
}

#[derive(Default)]
struct Topic {
    /// Every message ever published; replayed to groups joining late
    retained: Vec<QueuedMessage>,
    groups: HashMap<String, mpsc::UnboundedSender<QueuedMessage>>,
}

#[derive(Debug, Default, Clone)]
struct Ledger {
    published: Vec<QueuedMessage>,
    acked: Vec<QueuedMessage>,
    requeued: Vec<QueuedMessage>,
}

#[derive(Default)]
struct Shared {
    topics: Mutex<HashMap<String, Topic>>,
    ledger: Mutex<Ledger>,
    failing_topics: Mutex<HashSet<String>>,
    disconnected: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Broker double with durable-stream semantics.
///
/// Each consumer group gets every message of its topic, including those
/// published before it joined. Deliveries inside a group are shared by all
/// workers holding the subscription. Acks, requeues and publishes are kept in
/// a ledger for assertions.
#[derive(Clone, Default)]
pub struct InMemoryQueue {
    shared: Arc<Shared>,
    requeue_delay: Duration,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    /// Make every subsequent publish to `topic` fail until reset
    pub fn fail_publishes(&self, topic: &str, fail: bool) {
        let mut failing = lock(&self.shared.failing_topics);
        if fail {
            failing.insert(topic.to_string());
        } else {
            failing.remove(topic);
        }
    }

    pub fn published_on(&self, topic: &str) -> Vec<QueuedMessage> {
        lock(&self.shared.ledger)
            .published
            .iter()
            .filter(|m| topic_of(&m.subject) == topic)
            .cloned()
            .collect()
    }

    pub fn acked(&self) -> Vec<QueuedMessage> {
        lock(&self.shared.ledger).acked.clone()
    }

    pub fn requeued(&self) -> Vec<QueuedMessage> {
        lock(&self.shared.ledger).requeued.clone()
    }

    pub fn settled_count(&self) -> usize {
        let ledger = lock(&self.shared.ledger);
        ledger.acked.len() + ledger.requeued.len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.disconnected.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` deliveries were acked or requeued.
    /// Returns false when `timeout` elapses first.
    pub async fn wait_for_settled(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.settled_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    fn route(&self, message: QueuedMessage) {
        let mut topics = lock(&self.shared.topics);
        let topic = topics
            .entry(topic_of(&message.subject).to_string())
            .or_default();
        topic
            .groups
            .retain(|_, sender| sender.send(message.clone()).is_ok());
        topic.retained.push(message.clone());
        drop(topics);

        lock(&self.shared.ledger).published.push(message);
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.publish_with_headers(subject, MessageHeaders::new(), payload)
            .await
    }

    async fn publish_with_headers(
        &self,
        subject: &str,
        headers: MessageHeaders,
        payload: Bytes,
    ) -> Result<()> {
        if lock(&self.shared.failing_topics).contains(topic_of(subject)) {
            return Err(anyhow!("publish to {} rejected", subject));
        }
        self.route(QueuedMessage {
            subject: subject.to_string(),
            payload,
            headers,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Arc<dyn Subscription>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        {
            let mut topics = lock(&self.shared.topics);
            let entry = topics.entry(topic.to_string()).or_default();
            if entry.groups.contains_key(group) {
                return Err(anyhow!(
                    "consumer group {} already subscribed to {}",
                    group,
                    topic
                ));
            }
            for message in &entry.retained {
                // Receiver is alive: it is returned below
                let _ = sender.send(message.clone());
            }
            entry.groups.insert(group.to_string(), sender.clone());
        }

        Ok(Arc::new(InMemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group: group.to_string(),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            closed: CancellationToken::new(),
            requeue_delay: self.requeue_delay,
        }))
    }

    async fn prime(&self, topic: &str) -> Result<()> {
        lock(&self.shared.topics)
            .entry(topic.to_string())
            .or_default();
        self.publish(
            &format!("{}.priming", topic),
            Bytes::from_static(PRIMING_PAYLOAD),
        )
        .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.shared.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct InMemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    sender: mpsc::UnboundedSender<QueuedMessage>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedMessage>>,
    closed: CancellationToken,
    requeue_delay: Duration,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_message(&self) -> Result<Option<Box<dyn Delivery>>> {
        let mut receiver = self.receiver.lock().await;
        let message = tokio::select! {
            _ = self.closed.cancelled() => None,
            message = receiver.recv() => message,
        };

        Ok(message.map(|message| {
            Box::new(InMemoryDelivery {
                message,
                shared: Arc::clone(&self.shared),
                redeliver: self.sender.clone(),
                requeue_delay: self.requeue_delay,
                settled: AtomicBool::new(false),
            }) as Box<dyn Delivery>
        }))
    }

    async fn unsubscribe(&self) -> Result<()> {
        self.closed.cancel();
        if let Some(topic) = lock(&self.shared.topics).get_mut(&self.topic) {
            topic.groups.remove(&self.group);
        }
        Ok(())
    }
}

pub struct InMemoryDelivery {
    message: QueuedMessage,
    shared: Arc<Shared>,
    redeliver: mpsc::UnboundedSender<QueuedMessage>,
    requeue_delay: Duration,
    settled: AtomicBool,
}

impl InMemoryDelivery {
    fn settle(&self) -> Result<()> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("delivery on {} already settled", self.message.subject));
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn subject(&self) -> &str {
        &self.message.subject
    }

    fn payload(&self) -> &Bytes {
        &self.message.payload
    }

    fn headers(&self) -> &MessageHeaders {
        &self.message.headers
    }

    async fn ack(&self) -> Result<()> {
        self.settle()?;
        lock(&self.shared.ledger).acked.push(self.message.clone());
        Ok(())
    }

    async fn requeue(&self) -> Result<()> {
        self.settle()?;
        lock(&self.shared.ledger).requeued.push(self.message.clone());

        let message = self.message.clone();
        if self.requeue_delay.is_zero() {
            self.redeliver
                .send(message)
                .map_err(|_| anyhow!("subscription closed"))?;
        } else {
            let sender = self.redeliver.clone();
            let delay = self.requeue_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = sender.send(message);
            });
        }
        Ok(())
    }
}
