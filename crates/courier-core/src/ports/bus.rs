//! Bus port - publish / pattern-subscribe の抽象化
//!
//! # 設計原則
//! - publish 用と受信用のハンドルを分ける（同じ実装でもよい）
//! - 購読が閉じたら `next_message()` は `Ok(None)` を返す（drain 完了）
//! - transport の失敗は `BusError` として呼び出し側に伝播する

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::domain::BusError;

/// One message delivered to a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The pattern the subscription was made with.
    pub pattern: String,
    /// The concrete channel the message was published on.
    pub channel: String,
    /// Raw body (JSON text).
    pub data: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `data` on `channel`; returns how many subscriptions got it.
    async fn publish(&self, channel: &str, data: String) -> Result<usize, BusError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Open a glob-pattern subscription.
    async fn psubscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>, BusError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message. `Ok(None)` once the subscription is drained.
    async fn next_message(&mut self) -> Result<Option<Message>, BusError>;
}

/// Readiness flag owned by whoever establishes the connection.
#[derive(Debug, Clone, Default)]
pub struct ReadyFlag(Arc<AtomicBool>);

impl ReadyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The pair of transport handles plus the `connected` flag.
///
/// Cheap to clone; every dispatcher and runner holds one.
#[derive(Clone)]
pub struct Connection {
    publisher: Arc<dyn Publisher>,
    subscriber: Arc<dyn Subscriber>,
    ready: ReadyFlag,
}

impl Connection {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        subscriber: Arc<dyn Subscriber>,
        ready: ReadyFlag,
    ) -> Self {
        Self {
            publisher,
            subscriber,
            ready,
        }
    }

    pub fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }

    pub fn subscriber(&self) -> &Arc<dyn Subscriber> {
        &self.subscriber
    }

    pub fn is_connected(&self) -> bool {
        self.ready.is_set()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
