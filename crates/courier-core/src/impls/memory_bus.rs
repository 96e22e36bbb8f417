//! MemoryBroker - プロセス内の Pub/Sub ブローカー
//!
//! # 実装詳細
//! - 購読ごとに unbounded mpsc を持ち、publish 時にパターンが一致する購読へ配る
//! - 購読者リストは短時間しか保持しない std の Mutex で守る（ロック跨ぎ await なし）
//! - 受信側が drop された購読は次の publish で掃除される
//! - `disconnect()` で全購読を閉じる（runner からは drain 完了に見える）

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::domain::{BusError, Pattern};
use crate::ports::{Connection, Message, Publisher, ReadyFlag, Subscriber, Subscription};

struct Entry {
    pattern: Pattern,
    tx: mpsc::UnboundedSender<Message>,
}

/// In-process broadcast bus with glob-pattern subscriptions.
///
/// # 使用例
/// ```ignore
/// let broker = MemoryBroker::connected();
/// let connection = broker.connection();
/// let mut sub = connection.subscriber().psubscribe("jobs:*").await?;
/// connection.publisher().publish("jobs:1", "{}".into()).await?;
/// ```
#[derive(Clone)]
pub struct MemoryBroker {
    entries: Arc<Mutex<Vec<Entry>>>,
    ready: ReadyFlag,
    /// Number of live subscriptions, for callers that must not publish
    /// before their listeners are in place.
    subscribers: Arc<watch::Sender<usize>>,
}

impl MemoryBroker {
    /// A broker whose readiness flag is not yet set.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            ready: ReadyFlag::new(),
            subscribers: Arc::new(watch::Sender::new(0)),
        }
    }

    pub fn connected() -> Self {
        let broker = Self::new();
        broker.connect();
        broker
    }

    pub fn connect(&self) {
        self.ready.set();
    }

    /// Clear the readiness flag and close every subscription.
    pub fn disconnect(&self) {
        self.ready.clear();
        let mut entries = self.lock();
        entries.clear();
        self.subscribers.send_replace(0);
    }

    pub fn is_connected(&self) -> bool {
        self.ready.is_set()
    }

    /// Both transport handles backed by this broker.
    pub fn connection(&self) -> Connection {
        let handle = Arc::new(self.clone());
        Connection::new(handle.clone(), handle, self.ready.clone())
    }

    pub fn subscriber_count(&self) -> usize {
        *self.subscribers.borrow()
    }

    /// Wait until at least `n` subscriptions are live.
    pub async fn wait_for_subscribers(&self, n: usize) {
        let mut rx = self.subscribers.subscribe();
        // the sender lives as long as `self`
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, channel: &str, data: String) -> Result<usize, BusError> {
        if !self.ready.is_set() {
            return Err(BusError::NotConnected);
        }
        let mut entries = self.lock();
        entries.retain(|entry| !entry.tx.is_closed());

        let mut delivered = 0;
        for entry in entries.iter().filter(|e| e.pattern.matches(channel)) {
            let message = Message {
                pattern: entry.pattern.as_str().to_string(),
                channel: channel.to_string(),
                data: data.clone(),
            };
            if entry.tx.send(message).is_ok() {
                delivered += 1;
            }
        }
        self.subscribers.send_replace(entries.len());
        Ok(delivered)
    }
}

#[async_trait]
impl Subscriber for MemoryBroker {
    async fn psubscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>, BusError> {
        if !self.ready.is_set() {
            return Err(BusError::NotConnected);
        }
        let pattern = Pattern::new(pattern).map_err(|e| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut entries = self.lock();
        entries.push(Entry { pattern, tx });
        self.subscribers.send_replace(entries.len());

        Ok(Box::new(MemorySubscription { rx }))
    }
}

/// Receiving side of a `MemoryBroker` subscription.
pub struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next_message(&mut self) -> Result<Option<Message>, BusError> {
        Ok(self.rx.recv().await)
    }
}
