use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// 传输层错误分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Tls,
    Read,
    Other,
}

impl TransportErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Timeout => "timeout",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 传输层返回的错误
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            TransportErrorKind::Timeout
        } else if error.is_connect() {
            TransportErrorKind::Connect
        } else if error.is_body() || error.is_decode() {
            TransportErrorKind::Read
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, error.to_string())
    }
}

/// 取消原因
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelCause {
    /// 调用方主动取消
    Caller,
    /// 队列的 cancel-all 失败策略触发
    FailurePolicy,
    /// 队列整体取消
    QueueCancelled,
    /// 队列被释放，请求再也不会被调度
    QueueDropped,
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Caller => "cancelled by caller",
            Self::FailurePolicy => "cancelled after a sibling request failed",
            Self::QueueCancelled => "queue cancelled all operations",
            Self::QueueDropped => "queue dropped",
        })
    }
}

/// 稳定的错误代码，便于日志与断言
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidUrl,
    EnvironmentNotSet,
    InvalidParams,
    ResponseInvalidImageData,
    CannotDeserialize,
    CannotConvertToString,
    NetworkError,
    NotSuccess,
    Cancelled,
    InvalidMockData,
    MiddlewareError,
    InvalidMultipartParams,
    InvalidFileUrl,
    DownloadedFileCannotBeSaved,
}

impl ErrorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::EnvironmentNotSet => "environment_not_set",
            Self::InvalidParams => "invalid_params",
            Self::ResponseInvalidImageData => "response_invalid_image_data",
            Self::CannotDeserialize => "cannot_deserialize",
            Self::CannotConvertToString => "cannot_convert_to_string",
            Self::NetworkError => "network_error",
            Self::NotSuccess => "not_success",
            Self::Cancelled => "cancelled",
            Self::InvalidMockData => "invalid_mock_data",
            Self::MiddlewareError => "middleware_error",
            Self::InvalidMultipartParams => "invalid_multipart_params",
            Self::InvalidFileUrl => "invalid_file_url",
            Self::DownloadedFileCannotBeSaved => "downloaded_file_cannot_be_saved",
        }
    }
}

/// 引擎错误
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("invalid url: {url}")]
    InvalidUrl { url: String },
    #[error("relative route used but no environment is current")]
    EnvironmentNotSet,
    #[error("invalid params: {reason}")]
    InvalidParams { reason: String },
    #[error("response body is not valid image data")]
    ResponseInvalidImageData,
    #[error("cannot deserialize response: {context}")]
    CannotDeserialize { context: String },
    #[error("response body is not valid utf-8")]
    CannotConvertToString,
    #[error("network error: {0}")]
    NetworkError(#[source] TransportError),
    #[error("request failed with status {status}")]
    NotSuccess { status: u16 },
    #[error("request cancelled: {0}")]
    Cancelled(CancelCause),
    #[error("mock data unavailable for reference `{reference}`")]
    InvalidMockData { reference: String },
    #[error("interceptor failed: {context}")]
    MiddlewareError { context: String },
    #[error("invalid multipart params: {reason}")]
    InvalidMultipartParams { reason: String },
    #[error("invalid download destination: {}", path.display())]
    InvalidFileUrl { path: PathBuf },
    #[error("downloaded file cannot be saved: {source}")]
    DownloadedFileCannotBeSaved {
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Self::EnvironmentNotSet => ErrorKind::EnvironmentNotSet,
            Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::ResponseInvalidImageData => ErrorKind::ResponseInvalidImageData,
            Self::CannotDeserialize { .. } => ErrorKind::CannotDeserialize,
            Self::CannotConvertToString => ErrorKind::CannotConvertToString,
            Self::NetworkError(_) => ErrorKind::NetworkError,
            Self::NotSuccess { .. } => ErrorKind::NotSuccess,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::InvalidMockData { .. } => ErrorKind::InvalidMockData,
            Self::MiddlewareError { .. } => ErrorKind::MiddlewareError,
            Self::InvalidMultipartParams { .. } => ErrorKind::InvalidMultipartParams,
            Self::InvalidFileUrl { .. } => ErrorKind::InvalidFileUrl,
            Self::DownloadedFileCannotBeSaved { .. } => ErrorKind::DownloadedFileCannotBeSaved,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// 在发起传输之前就能发现的错误，不进入拦截器链
    pub fn is_fail_fast(&self) -> bool {
        matches!(
            self,
            Self::InvalidUrl { .. }
                | Self::EnvironmentNotSet
                | Self::InvalidParams { .. }
                | Self::InvalidMultipartParams { .. }
                | Self::InvalidMockData { .. }
                | Self::InvalidFileUrl { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotSuccess { status } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn file_save(source: std::io::Error) -> Self {
        Self::DownloadedFileCannotBeSaved {
            source: Arc::new(source),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
