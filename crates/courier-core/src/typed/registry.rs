//! TaskRegistry - task の登録表
//!
//! # 設計
//! - 起動時に構築（mutable）、runner 起動後は不変
//! - 登録順を保持する `Vec`（同じ pattern の重複登録も許す）
//! - `Courier::start()` が registry を消費するので、起動後の登録・解除は
//!   型レベルでできない

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use super::guard::{CatchPolicy, ErrorWrapper};
use super::handler::{Handler, Params, Request};
use crate::app::{DispatchOptions, Dispatcher};
use crate::domain::{DispatchError, HandlerError, Outcome, Pattern, RegistryError};

/// Options for `TaskRegistry::register`.
///
/// ```ignore
/// registry.register(handler, RegisterOptions::new().pattern("MY_TASK"))?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub pattern: Option<String>,
    pub ignore_result: bool,
    pub catch: CatchPolicy,
}

impl RegisterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn ignore_result(mut self, ignore: bool) -> Self {
        self.ignore_result = ignore;
        self
    }

    pub fn catch(mut self, catch: CatchPolicy) -> Self {
        self.catch = catch;
        self
    }
}

/// A registered task. Immutable once created.
pub struct Task {
    pattern: Pattern,
    result_channel: String,
    error_channel: String,
    ignore_result: bool,
    wrapper: ErrorWrapper,
    dispatcher: Dispatcher,
}

impl Task {
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn name(&self) -> &str {
        self.wrapper.handler().name()
    }

    pub fn result_channel(&self) -> &str {
        &self.result_channel
    }

    pub fn error_channel(&self) -> &str {
        &self.error_channel
    }

    pub fn ignore_result(&self) -> bool {
        self.ignore_result
    }

    pub fn params(&self) -> &Params {
        self.wrapper.params()
    }

    /// Whether a successful result is published on the result channel.
    ///
    /// `ignore_result` only suppresses completions for non-wildcard tasks.
    pub fn publishes_completion(&self) -> bool {
        self.pattern.is_wildcard() || !self.ignore_result
    }

    /// Dispatch on this task's own pattern and wait for the completion.
    pub async fn dispatch(&self, args: Map<String, Value>) -> Result<Option<Value>, DispatchError> {
        self.dispatch_with(args, DispatchOptions::default()).await
    }

    pub async fn dispatch_with(
        &self,
        args: Map<String, Value>,
        options: DispatchOptions,
    ) -> Result<Option<Value>, DispatchError> {
        self.dispatcher
            .dispatch(self.pattern.as_str(), args, options)
            .await
    }

    /// Run the local handler directly; nothing touches the bus.
    pub async fn call(&self, args: Map<String, Value>) -> Result<Outcome, HandlerError> {
        let req = Request::new(
            self.pattern.as_str(),
            "",
            Value::Object(args.clone()),
            args,
            self.dispatcher.clone(),
        );
        self.invoke(req).await
    }

    pub(crate) async fn invoke(&self, req: Request) -> Result<Outcome, HandlerError> {
        self.wrapper.invoke(req).await
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("pattern", &self.pattern.as_str())
            .field("ignore_result", &self.ignore_result)
            .field("params", self.wrapper.params())
            .finish_non_exhaustive()
    }
}

/// Ordered table of registered tasks.
pub struct TaskRegistry {
    tasks: Vec<Arc<Task>>,
    dispatcher: Dispatcher,
}

impl TaskRegistry {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            tasks: Vec::new(),
            dispatcher,
        }
    }

    pub fn register<H: Handler + 'static>(
        &mut self,
        handler: H,
        options: RegisterOptions,
    ) -> Result<Arc<Task>, RegistryError> {
        self.register_arc(Arc::new(handler), options)
    }

    pub fn register_arc(
        &mut self,
        handler: Arc<dyn Handler>,
        options: RegisterOptions,
    ) -> Result<Arc<Task>, RegistryError> {
        let pattern = match options.pattern {
            Some(pattern) => Pattern::new(pattern)?,
            None => Pattern::for_handler(handler.module(), handler.name())?,
        };
        let task = Arc::new(Task {
            result_channel: pattern.result_channel(),
            error_channel: pattern.error_channel(),
            pattern,
            ignore_result: options.ignore_result,
            wrapper: ErrorWrapper::new(handler, options.catch),
            dispatcher: self.dispatcher.clone(),
        });
        info!(pattern = %task.pattern, ignore_result = task.ignore_result, "task registered");
        self.tasks.push(Arc::clone(&task));
        Ok(task)
    }

    /// Register `handler` to run on every completion envelope of `task`.
    ///
    /// Any pattern in `options` is replaced by `task`'s result channel.
    pub fn on_completed<H: Handler + 'static>(
        &mut self,
        task: &Task,
        handler: H,
        options: RegisterOptions,
    ) -> Result<Arc<Task>, RegistryError> {
        let options = options.pattern(task.result_channel());
        self.register(handler, options)
    }

    /// Remove `task`. Returns false if it was not registered here.
    pub fn unregister(&mut self, task: &Arc<Task>) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| !Arc::ptr_eq(t, task));
        self.tasks.len() != before
    }

    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub(crate) fn into_tasks(self) -> Vec<Arc<Task>> {
        self.tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryBroker;
    use crate::typed::FnHandler;
    use serde_json::json;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Dispatcher::new(MemoryBroker::connected().connection()))
    }

    fn greet() -> impl Handler + 'static {
        FnHandler::new("example", "my_task", |req: Request| async move {
            let name = req.arg("name").and_then(Value::as_str).unwrap_or("nobody");
            Ok(json!({ "message": format!("Hello, {name}.") }))
        })
        .with_params(Params::named(["name"]))
    }

    #[test]
    fn default_pattern_and_channels() {
        let mut reg = registry();
        let task = reg.register(greet(), RegisterOptions::new()).unwrap();

        assert_eq!(task.pattern().as_str(), "example:my_task");
        assert_eq!(task.result_channel(), "example:my_task:on_completed");
        assert_eq!(task.error_channel(), "example:my_task:on_error");
        assert_eq!(task.name(), "my_task");
    }

    #[test]
    fn explicit_pattern_wins() {
        let mut reg = registry();
        let task = reg
            .register(greet(), RegisterOptions::new().pattern("MY_TASK"))
            .unwrap();
        assert_eq!(task.pattern().as_str(), "MY_TASK");
        assert_eq!(task.result_channel(), "MY_TASK:on_completed");
    }

    #[test]
    fn duplicates_are_kept_in_order() {
        let mut reg = registry();
        let a = reg.register(greet(), RegisterOptions::new()).unwrap();
        let b = reg.register(greet(), RegisterOptions::new()).unwrap();

        assert_eq!(reg.len(), 2);
        assert!(Arc::ptr_eq(&reg.tasks()[0], &a));
        assert!(Arc::ptr_eq(&reg.tasks()[1], &b));
    }

    #[test]
    fn unregister_removes_only_that_task() {
        let mut reg = registry();
        let a = reg.register(greet(), RegisterOptions::new()).unwrap();
        let b = reg.register(greet(), RegisterOptions::new()).unwrap();

        assert!(reg.unregister(&a));
        assert!(!reg.unregister(&a));
        assert_eq!(reg.len(), 1);
        assert!(Arc::ptr_eq(&reg.tasks()[0], &b));
    }

    #[test]
    fn on_completed_listens_on_the_result_channel() {
        let mut reg = registry();
        let task = reg.register(greet(), RegisterOptions::new()).unwrap();
        let callback = reg
            .on_completed(&task, greet(), RegisterOptions::new().pattern("ignored"))
            .unwrap();
        assert_eq!(callback.pattern().as_str(), "example:my_task:on_completed");
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let mut reg = registry();
        let err = reg
            .register(greet(), RegisterOptions::new().pattern("bad["))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPattern { .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn ignore_result_only_applies_to_non_wildcard_tasks() {
        let mut reg = registry();
        let quiet = reg
            .register(greet(), RegisterOptions::new().ignore_result(true))
            .unwrap();
        let wildcard = reg
            .register(greet(), RegisterOptions::new().pattern("*").ignore_result(true))
            .unwrap();
        let loud = reg.register(greet(), RegisterOptions::new()).unwrap();

        assert!(!quiet.publishes_completion());
        assert!(wildcard.publishes_completion());
        assert!(loud.publishes_completion());
    }

    #[tokio::test]
    async fn call_runs_the_handler_locally() {
        let broker = MemoryBroker::connected();
        let mut reg = TaskRegistry::new(Dispatcher::new(broker.connection()));
        let task = reg.register(greet(), RegisterOptions::new()).unwrap();

        let mut args = Map::new();
        args.insert("name".into(), json!("James"));
        args.insert("unused".into(), json!(true));
        let outcome = task.call(args).await.unwrap();

        assert_eq!(outcome, Outcome::Completed(json!({"message": "Hello, James."})));
        assert_eq!(broker.subscriber_count(), 0);
    }
}
