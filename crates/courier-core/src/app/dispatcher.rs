//! Dispatcher - 呼び出し側の API
//!
//! # フロー（wait = true）
//! 1. `<pattern>:on_completed` を購読（`ErrorWait::Race` なら `:on_error` も）
//! 2. `{type: pattern, payload: args}` を `pattern` に publish
//! 3. 最初に届いたメッセージの `payload` を返す
//!
//! 購読を publish より先に張るので、速い返信を取りこぼさない。
//!
//! # 相関について
//! 相関はチャンネル名だけで行う（リクエスト ID はない）。同じ pattern に
//! 対して wait 付きの呼び出しを同時に複数投げると、どの返信を受け取るかは
//! 保証されない。
//!
//! # タイムアウト
//! ない。返信が来なければ永久に待つ。

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::envelope::{self, Envelope};
use crate::domain::pattern::{error_channel, result_channel};
use crate::domain::{BusError, DispatchError};
use crate::ports::{Connection, Message};

/// Whether a waiting dispatch also listens on the error channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorWait {
    /// Only the completion channel is watched; a handler failure leaves
    /// the caller waiting forever.
    #[default]
    Ignore,
    /// Race completion and error channels; an error envelope becomes
    /// `DispatchError::Remote`.
    Race,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub wait: bool,
    pub errors: ErrorWait,
}

impl DispatchOptions {
    /// Fire-and-forget.
    pub fn no_wait() -> Self {
        Self {
            wait: false,
            errors: ErrorWait::Ignore,
        }
    }

    pub fn race_errors() -> Self {
        Self {
            wait: true,
            errors: ErrorWait::Race,
        }
    }
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            wait: true,
            errors: ErrorWait::Ignore,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    connection: Connection,
}

impl Dispatcher {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Encode and publish one envelope.
    pub async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<usize, BusError> {
        let data = envelope.encode()?;
        debug!(channel, data = %data, "publish");
        self.connection.publisher().publish(channel, data).await
    }

    /// Returns `None` when not waiting, otherwise the reply's `payload`
    /// (`Value::Null` when the reply carried none).
    pub async fn dispatch(
        &self,
        pattern: &str,
        args: Map<String, Value>,
        options: DispatchOptions,
    ) -> Result<Option<Value>, DispatchError> {
        let invocation = Envelope::invocation(pattern, args);
        if !options.wait {
            self.publish(pattern, &invocation).await?;
            return Ok(None);
        }

        let subscriber = self.connection.subscriber();
        let mut completed = subscriber.psubscribe(&result_channel(pattern)).await?;
        let mut failed = match options.errors {
            ErrorWait::Race => Some(subscriber.psubscribe(&error_channel(pattern)).await?),
            ErrorWait::Ignore => None,
        };

        self.publish(pattern, &invocation).await?;

        let reply = match failed.as_mut() {
            None => completed.next_message().await?,
            Some(failed) => tokio::select! {
                reply = completed.next_message() => reply?,
                error = failed.next_message() => {
                    let message = error?.ok_or(DispatchError::NoReply)?;
                    return Err(DispatchError::Remote(error_text(&message)));
                }
            },
        };

        let message = reply.ok_or(DispatchError::NoReply)?;
        let body = envelope::decode(&message.data).map_err(DispatchError::Decode)?;
        Ok(Some(body.get("payload").cloned().unwrap_or(Value::Null)))
    }

    /// `dispatch` with `wait = false`.
    pub async fn send(&self, pattern: &str, args: Map<String, Value>) -> Result<(), DispatchError> {
        self.dispatch(pattern, args, DispatchOptions::no_wait())
            .await
            .map(|_| ())
    }

    /// `dispatch` with `wait = true`, completion channel only.
    pub async fn call(&self, pattern: &str, args: Map<String, Value>) -> Result<Value, DispatchError> {
        let reply = self
            .dispatch(pattern, args, DispatchOptions::default())
            .await?;
        Ok(reply.unwrap_or(Value::Null))
    }
}

fn error_text(message: &Message) -> String {
    match envelope::decode(&message.data) {
        Ok(Value::Object(fields)) => match fields.get("error") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => message.data.clone(),
        },
        _ => message.data.clone(),
    }
}
