//! TaskRunner - task ごとの常駐ループ
//!
//! # 状態遷移
//! `WaitingForConnection → Subscribing → Listening → (繰り返し)`
//!
//! # フロー（1 メッセージ）
//! 1. 自分の完了・エラーチャンネルに届いたものは無視（`*` が自分の出力を拾うのを防ぐ）
//! 2. body を decode → envelope 形に正規化 → 引数をマージ
//! 3. ErrorWrapper 経由で handler を実行
//! 4. `Completed` → 完了チャンネル、`Failed` → エラーチャンネルへ publish
//!
//! 購読が drain したら少し待ってから再購読する。shutdown 要求以外で
//! ループが終わるのは transport エラーか、捕捉されない handler エラーのとき。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::domain::envelope::{self, Envelope};
use crate::domain::{Outcome, RunnerError};
use crate::ports::{Connection, Message};
use crate::typed::{Request, Task};

use super::dispatcher::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    WaitingForConnection,
    Subscribing,
    Listening,
}

/// Timing knobs for a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Sleep between readiness polls.
    pub poll_interval: Duration,
    /// Sleep after a subscription drains, before resubscribing.
    pub resubscribe_delay: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            resubscribe_delay: Duration::from_secs(1),
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

pub struct TaskRunner {
    task: Arc<Task>,
    connection: Connection,
    dispatcher: Dispatcher,
    settings: RunnerSettings,
}

impl TaskRunner {
    pub fn new(task: Arc<Task>, connection: Connection, settings: RunnerSettings) -> Self {
        let dispatcher = Dispatcher::new(connection.clone());
        Self {
            task,
            connection,
            dispatcher,
            settings,
        }
    }

    fn enter(&self, state: RunnerState) {
        trace!(pattern = %self.task.pattern(), ?state, "runner state");
    }

    /// Loop until `shutdown` flips to true (or its sender is dropped).
    ///
    /// An in-flight handler is never cancelled; shutdown is observed only
    /// while waiting.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), RunnerError> {
        info!(pattern = %self.task.pattern(), "runner started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Flow::Stop = self.cycle(&mut shutdown).await? {
                break;
            }
        }
        info!(pattern = %self.task.pattern(), "runner stopped");
        Ok(())
    }

    /// One pass through the state machine, ending after the backoff sleep.
    async fn cycle(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Flow, RunnerError> {
        self.enter(RunnerState::WaitingForConnection);
        while !self.connection.is_connected() {
            tokio::select! {
                _ = shutdown.changed() => return Ok(Flow::Stop),
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.enter(RunnerState::Subscribing);
        let mut subscription = self
            .connection
            .subscriber()
            .psubscribe(self.task.pattern().as_str())
            .await?;

        self.enter(RunnerState::Listening);
        loop {
            let message = tokio::select! {
                _ = shutdown.changed() => return Ok(Flow::Stop),
                message = subscription.next_message() => message?,
            };
            let Some(message) = message else {
                break;
            };
            self.handle_message(message).await?;
        }

        debug!(pattern = %self.task.pattern(), "subscription drained");
        tokio::select! {
            _ = shutdown.changed() => Ok(Flow::Stop),
            _ = tokio::time::sleep(self.settings.resubscribe_delay) => Ok(Flow::Continue),
        }
    }

    /// Process one delivered message. Returns the envelope that was
    /// published, if any.
    pub async fn handle_message(&self, message: Message) -> Result<Option<Envelope>, RunnerError> {
        let task = &self.task;
        if message.channel == task.result_channel() || message.channel == task.error_channel() {
            trace!(channel = %message.channel, "skipping own output");
            return Ok(None);
        }

        let raw = match envelope::decode(&message.data) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "dropping undecodable message");
                return Ok(None);
            }
        };
        let normalized = envelope::normalize(&raw);
        let args = envelope::merge_arguments(&raw, &normalized);
        let kind = normalized
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let payload = normalized.get("payload").cloned().unwrap_or_default();
        let request = Request::new(message.channel, kind, payload, args, self.dispatcher.clone());

        let outcome = task
            .invoke(request)
            .await
            .map_err(|source| RunnerError::Uncaught {
                pattern: task.pattern().to_string(),
                source,
            })?;

        let (channel, reply) = match outcome {
            Outcome::Completed(value) => {
                if !task.publishes_completion() {
                    debug!(pattern = %task.pattern(), "result ignored");
                    return Ok(None);
                }
                let channel = task.result_channel();
                (channel, Envelope::completed(channel, value))
            }
            Outcome::Failed(err) => {
                let channel = task.error_channel();
                (channel, Envelope::failed(channel, err.to_string()))
            }
        };
        self.dispatcher.publish(channel, &reply).await?;
        Ok(Some(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, HandlerError};
    use crate::impls::MemoryBroker;
    use crate::ports::{Subscriber, Subscription};
    use crate::typed::{CatchPolicy, FnHandler, Handler, Params, RegisterOptions, TaskRegistry};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> RunnerSettings {
        RunnerSettings {
            poll_interval: Duration::from_millis(5),
            resubscribe_delay: Duration::from_millis(10),
        }
    }

    fn greet() -> impl Handler + 'static {
        FnHandler::new("example", "my_task", |req: Request| async move {
            let name = req.arg("name").and_then(Value::as_str).unwrap_or("nobody");
            Ok(json!({ "message": format!("Hello, {name}.") }))
        })
        .with_params(Params::named(["name"]))
    }

    fn message(channel: &str, body: Value) -> Message {
        Message {
            pattern: channel.to_string(),
            channel: channel.to_string(),
            data: body.to_string(),
        }
    }

    async fn next_body(sub: &mut Box<dyn Subscription>) -> Value {
        let m = tokio::time::timeout(Duration::from_secs(1), sub.next_message())
            .await
            .expect("message expected")
            .unwrap()
            .unwrap();
        serde_json::from_str(&m.data).unwrap()
    }

    async fn nothing_on(sub: &mut Box<dyn Subscription>) -> bool {
        tokio::time::timeout(Duration::from_millis(50), sub.next_message())
            .await
            .is_err()
    }

    fn runner_for(broker: &MemoryBroker, register: impl FnOnce(&mut TaskRegistry) -> Arc<Task>) -> TaskRunner {
        let connection = broker.connection();
        let mut reg = TaskRegistry::new(Dispatcher::new(connection.clone()));
        let task = register(&mut reg);
        TaskRunner::new(task, connection, fast())
    }

    #[tokio::test]
    async fn completion_is_published_exactly_once() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            reg.register(greet(), RegisterOptions::new().pattern("p")).unwrap()
        });
        let mut completed = broker.psubscribe("p:on_completed").await.unwrap();
        let mut failed = broker.psubscribe("p:on_error").await.unwrap();

        runner
            .handle_message(message("p", json!({"type": "p", "payload": {"name": "James"}})))
            .await
            .unwrap();

        assert_eq!(
            next_body(&mut completed).await,
            json!({"type": "p:on_completed", "payload": {"message": "Hello, James."}})
        );
        assert!(nothing_on(&mut completed).await);
        assert!(nothing_on(&mut failed).await);
    }

    #[tokio::test]
    async fn bare_mapping_bodies_are_arguments() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            reg.register(greet(), RegisterOptions::new()).unwrap()
        });

        let reply = runner
            .handle_message(message("example:my_task", json!({"name": "James"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload, Some(json!({"message": "Hello, James."})));
    }

    #[tokio::test]
    async fn handler_failure_goes_to_the_error_channel_only() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            let failing = FnHandler::new("example", "fail", |_req: Request| async {
                Err::<Value, _>(HandlerError::new("E"))
            });
            reg.register(failing, RegisterOptions::new().pattern("p")).unwrap()
        });
        let mut completed = broker.psubscribe("p:on_completed").await.unwrap();
        let mut failed = broker.psubscribe("p:on_error").await.unwrap();

        runner
            .handle_message(message("p", json!({"type": "p", "payload": {}})))
            .await
            .unwrap();

        assert_eq!(next_body(&mut failed).await, json!({"type": "p:on_error", "error": "E"}));
        assert!(nothing_on(&mut completed).await);
    }

    #[tokio::test]
    async fn uncaught_failure_is_fatal() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            let failing = FnHandler::new("example", "fail", |_req: Request| async {
                Err::<Value, _>(HandlerError::permanent("E"))
            });
            let options = RegisterOptions::new()
                .pattern("p")
                .catch(CatchPolicy::Kinds(vec![ErrorKind::Transient]));
            reg.register(failing, options).unwrap()
        });

        let err = runner
            .handle_message(message("p", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Uncaught { pattern, .. } if pattern == "p"));
    }

    #[tokio::test]
    async fn wildcard_skips_its_own_result_channel() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            let echo = FnHandler::new("example", "audit", |req: Request| async move {
                Ok(json!(req.channel()))
            });
            reg.register(echo, RegisterOptions::new().pattern("*")).unwrap()
        });

        let own = runner
            .handle_message(message("*:on_completed", json!({"type": "*:on_completed"})))
            .await
            .unwrap();
        assert_eq!(own, None);

        let other = runner
            .handle_message(message("q:on_completed", json!({"payload": 1})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.kind, "*:on_completed");
        assert_eq!(other.payload, Some(json!("q:on_completed")));
    }

    #[tokio::test]
    async fn failing_wildcard_ignores_its_own_error_envelopes() {
        let broker = MemoryBroker::connected();
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = runner_for(&broker, |reg| {
            let calls = Arc::clone(&calls);
            let failing = FnHandler::new("example", "audit", move |_req: Request| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<Value, _>(HandlerError::new("E")) }
            });
            reg.register(failing, RegisterOptions::new().pattern("*")).unwrap()
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(shutdown_rx));
        broker.wait_for_subscribers(1).await;

        let dispatcher = Dispatcher::new(broker.connection());
        dispatcher.send("q", serde_json::Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // the invocation on `q` fails once; its `*:on_error` envelope is skipped
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wildcard_skips_its_own_error_channel() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            let failing = FnHandler::new("example", "audit", |_req: Request| async {
                Err::<Value, _>(HandlerError::new("E"))
            });
            reg.register(failing, RegisterOptions::new().pattern("*")).unwrap()
        });

        let own = runner
            .handle_message(message("*:on_error", json!({"type": "*:on_error", "error": "E"})))
            .await
            .unwrap();
        assert_eq!(own, None);
    }

    #[tokio::test]
    async fn ignore_result_suppresses_the_completion() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            reg.register(greet(), RegisterOptions::new().pattern("p").ignore_result(true))
                .unwrap()
        });
        let mut completed = broker.psubscribe("p:on_completed").await.unwrap();

        let published = runner
            .handle_message(message("p", json!({"name": "James"})))
            .await
            .unwrap();
        assert_eq!(published, None);
        assert!(nothing_on(&mut completed).await);
    }

    #[tokio::test]
    async fn undecodable_messages_are_skipped() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            reg.register(greet(), RegisterOptions::new().pattern("p")).unwrap()
        });
        let bad = Message {
            pattern: "p".into(),
            channel: "p".into(),
            data: "{not json".into(),
        };
        assert_eq!(runner.handle_message(bad).await.unwrap(), None);
    }

    #[tokio::test]
    async fn handlers_can_dispatch_follow_up_messages() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            let relay = FnHandler::new("example", "relay", |req: Request| async move {
                let mut args = serde_json::Map::new();
                args.insert("from".into(), json!(req.channel()));
                match req.dispatch("next", args).await {
                    Ok(()) => Ok(Value::Null),
                    Err(e) => Err(HandlerError::infrastructure(e.to_string())),
                }
            });
            reg.register(relay, RegisterOptions::new().pattern("p")).unwrap()
        });
        let mut next = broker.psubscribe("next").await.unwrap();

        runner.handle_message(message("p", json!({}))).await.unwrap();
        assert_eq!(
            next_body(&mut next).await,
            json!({"type": "next", "payload": {"from": "p"}})
        );
    }

    #[tokio::test]
    async fn runner_waits_for_connection_then_serves() {
        let broker = MemoryBroker::new();
        let runner = runner_for(&broker, |reg| {
            reg.register(greet(), RegisterOptions::new().pattern("p")).unwrap()
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.subscriber_count(), 0);

        broker.connect();
        broker.wait_for_subscribers(1).await;
        let dispatcher = Dispatcher::new(broker.connection());
        let mut args = serde_json::Map::new();
        args.insert("name".into(), json!("James"));
        let reply = dispatcher.call("p", args).await.unwrap();
        assert_eq!(reply, json!({"message": "Hello, James."}));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn runner_resubscribes_after_drain() {
        let broker = MemoryBroker::connected();
        let runner = runner_for(&broker, |reg| {
            reg.register(greet(), RegisterOptions::new().pattern("p")).unwrap()
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(shutdown_rx));

        broker.wait_for_subscribers(1).await;
        broker.disconnect();
        broker.connect();
        broker.wait_for_subscribers(1).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
