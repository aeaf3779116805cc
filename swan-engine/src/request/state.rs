use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::error::CancelCause;

/// 请求生命周期状态
///
/// 只能单调前进：`Created → Executing → Finished`，
/// `Cancelled` 只能从 `Executing` 进入并最终到达 `Finished`。
/// 未开始就被取消的请求会先被推进到 `Executing`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Created,
    Executing,
    Cancelled,
    Finished,
}

impl RequestState {
    pub fn can_advance_to(self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Executing)
                | (Self::Executing, Self::Cancelled)
                | (Self::Executing, Self::Finished)
                | (Self::Cancelled, Self::Finished)
        )
    }

    pub fn is_finished(self) -> bool {
        self == Self::Finished
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Executing => "executing",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 协作式取消句柄，记录第一次取消的原因
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    cause: Arc<OnceLock<CancelCause>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取消请求；重复调用保留第一次的原因
    pub fn cancel(&self, cause: CancelCause) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cause(&self) -> CancelCause {
        self.cause.get().copied().unwrap_or(CancelCause::Caller)
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }
}
