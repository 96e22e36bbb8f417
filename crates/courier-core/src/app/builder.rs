//! Courier - アプリケーションの構築とワイヤリング
//!
//! Connection・TaskRegistry・RunnerSettings をまとめて持つ明示的な
//! コンテキスト。グローバル状態は持たない。
//!
//! # 起動時検証（Fail-fast）
//! - `expect_patterns()` で期待される pattern を登録
//! - `start()` 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - 不足があれば `BuildError` を返す

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::Config;
use crate::domain::{DispatchError, RegistryError};
use crate::ports::Connection;
use crate::typed::{Handler, RegisterOptions, Task, TaskRegistry};

use super::dispatcher::{DispatchOptions, Dispatcher};
use super::group::RunnerGroup;
use super::runner::RunnerSettings;

/// Errors raised by `Courier::start`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing patterns: {0:?}. These tasks were expected but not registered.")]
    MissingPatterns(Vec<String>),
}

/// # 使用例
/// ```ignore
/// let mut courier = Courier::new(broker.connection());
/// let task = courier.register(handler, RegisterOptions::new())?;
/// let group = courier.start()?;
/// ```
pub struct Courier {
    connection: Connection,
    dispatcher: Dispatcher,
    registry: TaskRegistry,
    settings: RunnerSettings,
    expected: Vec<String>,
}

impl Courier {
    pub fn new(connection: Connection) -> Self {
        let dispatcher = Dispatcher::new(connection.clone());
        Self {
            registry: TaskRegistry::new(dispatcher.clone()),
            dispatcher,
            connection,
            settings: RunnerSettings::default(),
            expected: Vec::new(),
        }
    }

    /// `new` with the runner timings taken from `config`.
    pub fn from_config(connection: Connection, config: &Config) -> Self {
        Self::new(connection).with_settings(config.runner.settings())
    }

    pub fn with_settings(mut self, settings: RunnerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn expect_patterns(mut self, patterns: &[&str]) -> Self {
        self.expected = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn settings(&self) -> RunnerSettings {
        self.settings
    }

    pub fn register<H: Handler + 'static>(
        &mut self,
        handler: H,
        options: RegisterOptions,
    ) -> Result<Arc<Task>, RegistryError> {
        self.registry.register(handler, options)
    }

    pub fn on_completed<H: Handler + 'static>(
        &mut self,
        task: &Task,
        handler: H,
        options: RegisterOptions,
    ) -> Result<Arc<Task>, RegistryError> {
        self.registry.on_completed(task, handler, options)
    }

    pub fn unregister(&mut self, task: &Arc<Task>) -> bool {
        self.registry.unregister(task)
    }

    pub async fn dispatch(
        &self,
        pattern: &str,
        args: Map<String, Value>,
        options: DispatchOptions,
    ) -> Result<Option<Value>, DispatchError> {
        self.dispatcher.dispatch(pattern, args, options).await
    }

    /// Freeze the registry and spawn one runner per task.
    pub fn start(self) -> Result<RunnerGroup, BuildError> {
        let missing: Vec<String> = self
            .expected
            .iter()
            .filter(|p| !self.registry.tasks().iter().any(|t| t.pattern().as_str() == p.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingPatterns(missing));
        }
        Ok(RunnerGroup::spawn(
            self.registry.into_tasks(),
            self.connection,
            self.settings,
        ))
    }
}
