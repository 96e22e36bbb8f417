//! courier-core
//!
//! Pub/Sub の上で名前付き handler（task）を登録し、リモートから呼び出すための
//! dispatch プロトコルのコア。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（pattern, envelope, outcome, errors）
//! - **ports**: 抽象化レイヤー（Publisher, Subscriber, Subscription, Connection）
//! - **impls**: 実装（プロセス内の MemoryBroker、Redis pub/sub の RedisBus）
//! - **typed**: Handler trait, ErrorWrapper, TaskRegistry
//! - **app**: Dispatcher, TaskRunner, RunnerGroup, Courier
//! - **config**: JSON 設定ファイル + 環境変数の読み込み

pub mod domain;
pub mod ports;
pub mod impls;
pub mod typed;
pub mod app;
pub mod config;

pub use app::{BuildError, Courier, DispatchOptions, Dispatcher, ErrorWait, RunnerGroup, RunnerSettings};
pub use config::Config;
pub use domain::{Envelope, ErrorKind, HandlerError, Outcome, Pattern};
pub use impls::{MemoryBroker, RedisBus};
pub use ports::{Connection, Message, Publisher, ReadyFlag, Subscriber, Subscription};
pub use typed::{
    CatchPolicy, FnHandler, Handler, Params, RegisterOptions, Request, Task, TaskArgs,
    TaskRegistry, Typed, TypedHandler,
};
