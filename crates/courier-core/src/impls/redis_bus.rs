//! RedisBus - Redis pub/sub 上の transport
//!
//! # 実装詳細
//! - publish は 1 本の multiplexed 接続を clone して使う（`db` はこちらに効く）
//! - `psubscribe()` ごとに専用の pub/sub 接続を開く
//! - `Client::open` は接続しない。`connect()` で publish 用接続を張り、
//!   readiness フラグを立てる
//! - Redis 側で接続が切れると購読 stream が終わり、runner からは drain 完了に見える

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, ConnectionInfo, IntoConnectionInfo, Msg, RedisError};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::BusConfig;
use crate::domain::{BusError, Pattern};
use crate::ports::{Connection, Message, Publisher, ReadyFlag, Subscriber, Subscription};

/// Redis-backed bus.
///
/// ```ignore
/// let bus = RedisBus::open(&config.bus)?;
/// bus.connect().await?;
/// let courier = Courier::new(bus.connection());
/// ```
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: Arc<OnceCell<MultiplexedConnection>>,
    ready: ReadyFlag,
}

impl RedisBus {
    /// Validate the address; no I/O happens here.
    pub fn open(bus: &BusConfig) -> Result<Self, BusError> {
        let client = redis::Client::open(connection_info(bus)?).map_err(transport)?;
        Ok(Self {
            client,
            publisher: Arc::new(OnceCell::new()),
            ready: ReadyFlag::new(),
        })
    }

    /// Open the publishing connection and set the readiness flag.
    pub async fn connect(&self) -> Result<(), BusError> {
        self.publisher
            .get_or_try_init(|| self.client.get_multiplexed_async_connection())
            .await
            .map_err(transport)?;
        self.ready.set();
        info!("connected to redis");
        Ok(())
    }

    pub fn disconnect(&self) {
        self.ready.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.ready.is_set()
    }

    pub fn connection(&self) -> Connection {
        let handle = Arc::new(self.clone());
        Connection::new(handle.clone(), handle, self.ready.clone())
    }
}

/// `address` plus `db` and `password` (an empty password means none).
pub fn connection_info(bus: &BusConfig) -> Result<ConnectionInfo, BusError> {
    let mut info = bus.address.as_str().into_connection_info().map_err(transport)?;
    info.redis.db = i64::from(bus.db);
    if !bus.password.is_empty() {
        info.redis.password = Some(bus.password.clone());
    }
    Ok(info)
}

fn transport(e: RedisError) -> BusError {
    BusError::Transport(e.to_string())
}

#[async_trait]
impl Publisher for RedisBus {
    async fn publish(&self, channel: &str, data: String) -> Result<usize, BusError> {
        if !self.ready.is_set() {
            return Err(BusError::NotConnected);
        }
        let mut conn = self.publisher.get().cloned().ok_or(BusError::NotConnected)?;
        let receivers: usize = conn.publish(channel, data).await.map_err(transport)?;
        Ok(receivers)
    }
}

#[async_trait]
impl Subscriber for RedisBus {
    async fn psubscribe(&self, pattern: &str) -> Result<Box<dyn Subscription>, BusError> {
        if !self.ready.is_set() {
            return Err(BusError::NotConnected);
        }
        Pattern::new(pattern).map_err(|e| BusError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;

        let mut pubsub = self.client.get_async_pubsub().await.map_err(transport)?;
        pubsub.psubscribe(pattern).await.map_err(transport)?;
        Ok(Box::new(RedisSubscription {
            messages: Box::pin(pubsub.into_on_message()),
        }))
    }
}

/// One dedicated pub/sub connection.
pub struct RedisSubscription {
    messages: Pin<Box<dyn Stream<Item = Msg> + Send>>,
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn next_message(&mut self) -> Result<Option<Message>, BusError> {
        let Some(msg) = self.messages.next().await else {
            return Ok(None);
        };
        let pattern: String = msg.get_pattern().map_err(transport)?;
        let data: String = msg.get_payload().map_err(transport)?;
        Ok(Some(Message {
            pattern,
            channel: msg.get_channel_name().to_string(),
            data,
        }))
    }
}
