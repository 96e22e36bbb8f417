//! Outcome: the discriminated result of one handler invocation.

use serde_json::Value;

use super::errors::HandlerError;

/// What the runner publishes is decided by matching on this, never by
/// inspecting the value itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Goes to `<pattern>:on_completed`.
    Completed(Value),

    /// A caught handler failure. Goes to `<pattern>:on_error`.
    Failed(HandlerError),
}
