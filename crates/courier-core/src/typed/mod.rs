//! Typed - task の登録と handler の API
//!
//! - `handler`: `Handler` trait（object-safe）と `Typed` による型付き表層
//! - `guard`: handler の失敗を `Outcome` に変換する `ErrorWrapper`
//! - `registry`: 登録表 `TaskRegistry` と登録済みハンドル `Task`

pub mod guard;
pub mod handler;
pub mod registry;

pub use self::guard::{CatchPolicy, ErrorWrapper};
pub use self::handler::{FnHandler, Handler, Params, Request, TaskArgs, Typed, TypedHandler};
pub use self::registry::{RegisterOptions, Task, TaskRegistry};
