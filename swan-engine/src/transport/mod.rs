//! 传输层协作方：执行一个已完全解析的请求，产出响应或分类后的传输错误。

pub mod download;
mod reqwest_transport;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use url::Url;

use crate::codec::RequestBody;
use crate::error::TransportError;
use crate::response::Response;
use crate::types::http::HttpMethod;

pub use download::{DownloadTarget, Progress, ProgressCallback};
pub use reqwest_transport::ReqwestTransport;

/// 线上请求：URL、方法、头部与请求体都已确定
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub request_id: u64,
    pub method: HttpMethod,
    pub url: Url,
    /// 头部键统一为小写
    pub headers: BTreeMap<String, String>,
    pub body: RequestBody,
    pub timeout: Duration,
    pub pinned_certificates: Vec<String>,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// 流式响应，响应体按块产出
pub struct StreamingResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// 服务端声明的总长度（未知时为 `None`）
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl StreamingResponse {
    /// 由一次性读取的响应构造单块流
    pub fn from_response(response: Response) -> Self {
        let content_length = Some(response.body.len() as u64);
        let body = response.body;
        Self {
            status: response.status,
            headers: response.headers,
            content_length,
            body: stream::once(async move { Ok(body) }).boxed(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 把剩余的响应体读入内存
    pub async fn collect(self) -> Result<Response, TransportError> {
        let Self {
            status,
            headers,
            mut body,
            ..
        } = self;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(Response {
            status,
            headers,
            body: buffer.freeze(),
            file: None,
        })
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// 传输层接口
///
/// 取消是协作式的：调用方丢弃返回的 future 即表示取消。
/// 超时由实现方按 [`WireRequest::timeout`] 执行，并以
/// [`TransportErrorKind::Timeout`](crate::error::TransportErrorKind::Timeout) 报告。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 发送请求并读取完整响应体
    async fn send(&self, request: WireRequest) -> Result<Response, TransportError>;

    /// 发送请求并以流的形式读取响应体，用于下载
    async fn open_stream(&self, request: WireRequest) -> Result<StreamingResponse, TransportError> {
        let response = self.send(request).await?;
        Ok(StreamingResponse::from_response(response))
    }
}
