//! App - アプリケーション層
//!
//! ports を組み合わせて dispatch プロトコルを実装する。
//!
//! # 主要コンポーネント
//! - **Courier**: 構築とワイヤリング（明示的なコンテキスト）
//! - **Dispatcher**: invocation の publish と完了の待ち受け
//! - **TaskRunner**: task ごとの常駐ループ
//! - **RunnerGroup**: runner 群の起動と graceful shutdown

pub mod builder;
pub mod dispatcher;
pub mod group;
pub mod runner;

pub use self::builder::{BuildError, Courier};
pub use self::dispatcher::{DispatchOptions, Dispatcher, ErrorWait};
pub use self::group::RunnerGroup;
pub use self::runner::{RunnerSettings, RunnerState, TaskRunner};
