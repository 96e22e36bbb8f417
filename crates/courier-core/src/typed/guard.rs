//! ErrorWrapper - handler の失敗を値に変換する
//!
//! 1. 宣言されていない引数を落とす（`Params::Any` なら全部通す）
//! 2. handler を実行
//! 3. `CatchPolicy` に該当する失敗は `Outcome::Failed` として返す
//!
//! 該当しない失敗は `Err` のまま返り、runner にとって致命的になる。

use std::sync::Arc;

use super::handler::{Handler, Params, Request};
use crate::domain::{ErrorKind, HandlerError, Outcome};

/// Which handler failures are turned into `Outcome::Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CatchPolicy {
    #[default]
    All,
    Kinds(Vec<ErrorKind>),
    Nothing,
}

impl CatchPolicy {
    pub fn catches(&self, err: &HandlerError) -> bool {
        match self {
            CatchPolicy::All => true,
            CatchPolicy::Kinds(kinds) => kinds.contains(&err.kind()),
            CatchPolicy::Nothing => false,
        }
    }
}

pub struct ErrorWrapper {
    handler: Arc<dyn Handler>,
    params: Params,
    catch: CatchPolicy,
}

impl ErrorWrapper {
    /// Reads the handler's declared params once.
    pub fn new(handler: Arc<dyn Handler>, catch: CatchPolicy) -> Self {
        let params = handler.params();
        Self {
            handler,
            params,
            catch,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub async fn invoke(&self, req: Request) -> Result<Outcome, HandlerError> {
        let req = req.retain_args(&self.params);
        match self.handler.handle(req).await {
            Ok(value) => Ok(Outcome::Completed(value)),
            Err(err) if self.catch.catches(&err) => Ok(Outcome::Failed(err)),
            Err(err) => Err(err),
        }
    }
}
