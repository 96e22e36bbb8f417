//! Errors - エラー型と分類
//!
//! - `HandlerError`: handler の失敗。ErrorWrapper が値として捕捉する
//! - `BusError`: transport の失敗。runner にとっては致命的
//! - その他: registry / dispatch / runner 各層のエラー

use thiserror::Error;

/// ErrorKind は handler エラーの分類
///
/// `CatchPolicy` はこの分類で「値に変換するか、伝播させるか」を決める。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 一時的なエラー（リトライで直る可能性がある）
    Transient,
    /// 恒久的なエラー（入力不正など）
    Permanent,
    /// インフラエラー（下流サービスの障害など）
    Infrastructure,
}

/// A failure raised by a registered handler.
///
/// `Display` is the bare message: it is what ends up in the `error` field of
/// the error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Transient, message)
    }

    pub fn with_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Permanent, message)
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::with_kind(ErrorKind::Infrastructure, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Argument decoding failures are the caller's fault, so they are permanent.
impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::permanent(format!("invalid arguments: {e}"))
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus is not connected")]
    NotConnected,

    #[error("invalid subscription pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("failed to decode reply: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("remote handler failed: {0}")]
    Remote(String),

    #[error("reply subscription drained before a reply arrived")]
    NoReply,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("uncaught handler failure on '{pattern}': {source}")]
    Uncaught {
        pattern: String,
        #[source]
        source: HandlerError,
    },

    #[error("runner task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_displays_bare_message() {
        let err = HandlerError::permanent("boom");
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn json_errors_become_permanent_handler_errors() {
        let e = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err = HandlerError::from(e);
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.message().starts_with("invalid arguments"));
    }
}
