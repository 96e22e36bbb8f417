//! Handler trait - task の実体
//!
//! # 二層構造
//! - **表層（Typed）**: `TaskArgs` + `TypedHandler<A>` - 引数を型で受け取る
//! - **内部（Dyn）**: `Handler` - object-safe, `Request` をそのまま受け取る
//!
//! `Typed<A, H>` が表層を内部へ type erasure する。
//!
//! # 引数の宣言
//! handler は受け付ける引数名を `Params` で宣言する。`Params::Any` なら
//! 全引数がそのまま渡り、`Params::Named` なら宣言外のキーは捨てられる。
//! 宣言は登録時に一度だけ読まれる。

use std::collections::BTreeSet;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::app::{DispatchOptions, Dispatcher};
use crate::domain::{DispatchError, HandlerError};

/// Argument names a handler accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Params {
    /// Catch-all: every argument passes through.
    #[default]
    Any,
    Named(BTreeSet<String>),
}

impl Params {
    pub fn named<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Params::Named(names.into_iter().map(Into::into).collect())
    }

    pub fn admits(&self, key: &str) -> bool {
        match self {
            Params::Any => true,
            Params::Named(names) => names.contains(key),
        }
    }

    pub fn filter(&self, mut args: Map<String, Value>) -> Map<String, Value> {
        if let Params::Named(names) = self {
            args.retain(|key, _| names.contains(key));
        }
        args
    }
}

/// One invocation as seen by a handler.
///
/// Fixed fields describe where the call came from; `args` is the open,
/// already-filtered argument map.
#[derive(Debug, Clone)]
pub struct Request {
    channel: String,
    kind: String,
    payload: Value,
    args: Map<String, Value>,
    dispatcher: Dispatcher,
}

impl Request {
    pub fn new(
        channel: impl Into<String>,
        kind: impl Into<String>,
        payload: Value,
        args: Map<String, Value>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            channel: channel.into(),
            kind: kind.into(),
            payload,
            args,
            dispatcher,
        }
    }

    /// Channel the invocation arrived on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The envelope's `type` field (empty when the sender omitted it).
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn args(&self) -> &Map<String, Value> {
        &self.args
    }

    pub fn arg(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Deserialize the argument map into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(Value::Object(self.args.clone()))?)
    }

    /// Publish `{type: name, payload: args}` on `name` without waiting.
    pub async fn dispatch(&self, name: &str, args: Map<String, Value>) -> Result<(), DispatchError> {
        self.dispatcher
            .dispatch(name, args, DispatchOptions::no_wait())
            .await
            .map(|_| ())
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn retain_args(mut self, params: &Params) -> Self {
        self.args = params.filter(self.args);
        self
    }
}

/// Object-safe handler.
///
/// # 使用例
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl Handler for Echo {
///     fn module(&self) -> &str { module_path!() }
///     fn name(&self) -> &str { "echo" }
///     async fn handle(&self, req: Request) -> Result<Value, HandlerError> {
///         Ok(req.payload().clone())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Owning module; first half of the default pattern.
    fn module(&self) -> &str;

    fn name(&self) -> &str;

    fn params(&self) -> Params {
        Params::Any
    }

    async fn handle(&self, req: Request) -> Result<Value, HandlerError>;
}

/// Handler built from an async closure.
pub struct FnHandler<F> {
    module: String,
    name: String,
    params: Params,
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    pub fn new(module: impl Into<String>, name: impl Into<String>, f: F) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            params: Params::Any,
            f,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn module(&self) -> &str {
        &self.module
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> Params {
        self.params.clone()
    }

    async fn handle(&self, req: Request) -> Result<Value, HandlerError> {
        (self.f)(req).await
    }
}

/// Typed handler arguments.
///
/// ```ignore
/// #[derive(Deserialize)]
/// struct Greet { name: String }
///
/// impl TaskArgs for Greet {
///     const PARAMS: Option<&'static [&'static str]> = Some(&["name"]);
/// }
/// ```
pub trait TaskArgs: DeserializeOwned + Send + 'static {
    /// Declared argument names; `None` accepts everything.
    const PARAMS: Option<&'static [&'static str]>;
}

#[async_trait]
pub trait TypedHandler<A: TaskArgs>: Send + Sync {
    type Output: Serialize + Send;

    async fn handle(&self, args: A, req: &Request) -> Result<Self::Output, HandlerError>;
}

/// Erases a `TypedHandler<A>` into a `Handler`.
pub struct Typed<A, H> {
    module: String,
    name: String,
    handler: H,
    _marker: PhantomData<fn() -> A>,
}

impl<A: TaskArgs, H: TypedHandler<A>> Typed<A, H> {
    pub fn new(module: impl Into<String>, name: impl Into<String>, handler: H) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<A: TaskArgs, H: TypedHandler<A>> Handler for Typed<A, H> {
    fn module(&self) -> &str {
        &self.module
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn params(&self) -> Params {
        match A::PARAMS {
            Some(names) => Params::named(names.iter().copied()),
            None => Params::Any,
        }
    }

    async fn handle(&self, req: Request) -> Result<Value, HandlerError> {
        let args: A = req.parse()?;
        let output = self.handler.handle(args, &req).await?;
        Ok(serde_json::to_value(output)?)
    }
}
