use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};

use crate::codec::RequestBody;
use crate::error::{TransportError, TransportErrorKind};
use crate::response::Response;
use crate::transport::{StreamingResponse, Transport, WireRequest};

/// 基于 reqwest 的生产传输层
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// 创建传输层，开启 TLS 信息以支持证书锁定
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().tls_info(true).build()?;
        Ok(Self { client })
    }

    /// 使用调用方配置好的 reqwest 客户端
    ///
    /// 若需要证书锁定，客户端必须开启 `tls_info(true)`。
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: WireRequest) -> (reqwest::RequestBuilder, Vec<String>) {
        let mut builder = self
            .client
            .request(request.method.to_reqwest(), request.url)
            .timeout(request.timeout);

        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Bytes(bytes) => builder.body(bytes),
            RequestBody::Multipart(body) => {
                let length = body.content_length();
                builder
                    .header(reqwest::header::CONTENT_LENGTH, length)
                    .body(reqwest::Body::wrap_stream(body.into_stream()))
            }
        };

        (builder, request.pinned_certificates)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: WireRequest) -> Result<Response, TransportError> {
        let (builder, pins) = self.build(request);
        let response = builder.send().await?;
        verify_pins(&response, &pins)?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await?;

        Ok(Response {
            status,
            headers,
            body,
            file: None,
        })
    }

    async fn open_stream(&self, request: WireRequest) -> Result<StreamingResponse, TransportError> {
        let (builder, pins) = self.build(request);
        let response = builder.send().await?;
        verify_pins(&response, &pins)?;

        Ok(StreamingResponse {
            status: response.status().as_u16(),
            headers: collect_headers(response.headers()),
            content_length: response.content_length(),
            body: response.bytes_stream().map_err(TransportError::from).boxed(),
        })
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

/// 校验对端叶子证书的 SHA-256 是否在锁定列表中
fn verify_pins(response: &reqwest::Response, pins: &[String]) -> Result<(), TransportError> {
    if pins.is_empty() {
        return Ok(());
    }

    let certificate = response
        .extensions()
        .get::<reqwest::tls::TlsInfo>()
        .and_then(|info| info.peer_certificate());
    let Some(der) = certificate else {
        return Err(TransportError::new(
            TransportErrorKind::Tls,
            "certificate pinning requires a TLS connection with peer certificate info",
        ));
    };

    if certificate_matches(der, pins) {
        Ok(())
    } else {
        Err(TransportError::new(
            TransportErrorKind::Tls,
            "peer certificate does not match any pinned digest",
        ))
    }
}

fn certificate_matches(der: &[u8], pins: &[String]) -> bool {
    let digest = hex::encode(Sha256::digest(der));
    pins.iter()
        .any(|pin| pin.replace(':', "").eq_ignore_ascii_case(&digest))
}
