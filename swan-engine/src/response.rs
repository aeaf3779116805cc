use std::collections::BTreeMap;
use std::path::PathBuf;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{EngineError, EngineResult};

/// 响应：状态码、头部与请求独占的响应体
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// 头部键统一为小写
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    /// 下载请求落盘后的文件路径
    pub file: Option<PathBuf>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            file: None,
        }
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 反序列化 JSON 响应体
    pub fn json<T: DeserializeOwned>(&self) -> EngineResult<T> {
        serde_json::from_slice(&self.body).map_err(|e| EngineError::CannotDeserialize {
            context: format!("{} (status {})", e, self.status),
        })
    }

    /// 以 UTF-8 文本读取响应体
    pub fn text(&self) -> EngineResult<&str> {
        std::str::from_utf8(&self.body).map_err(|_| EngineError::CannotConvertToString)
    }

    /// 校验响应体是否为常见图片格式并返回原始字节
    pub fn image_bytes(&self) -> EngineResult<&Bytes> {
        const SIGNATURES: &[&[u8]] = &[
            b"\x89PNG\r\n\x1a\n",
            b"\xff\xd8\xff",
            b"GIF87a",
            b"GIF89a",
            b"BM",
        ];
        let body = &self.body[..];
        let is_webp = body.len() >= 12 && &body[..4] == b"RIFF" && &body[8..12] == b"WEBP";
        if is_webp || SIGNATURES.iter().any(|signature| body.starts_with(signature)) {
            Ok(&self.body)
        } else {
            Err(EngineError::ResponseInvalidImageData)
        }
    }
}
