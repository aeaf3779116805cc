//! 请求参数的线上编码：URL 编码、JSON 与 multipart。

pub mod form;
pub mod json;
pub mod multipart;

use bytes::Bytes;

use crate::error::EngineResult;
use crate::types::http::{BodyType, HttpMethod};
use crate::types::params::Params;

pub use multipart::{MultipartBody, generate_boundary};

/// 发送给传输层的请求体
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    Multipart(MultipartBody),
}

impl RequestBody {
    pub fn content_length(&self) -> u64 {
        match self {
            RequestBody::Empty => 0,
            RequestBody::Bytes(bytes) => bytes.len() as u64,
            RequestBody::Multipart(body) => body.content_length(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content_length() == 0
    }
}

/// 编码结果：查询串、请求体与对应的 Content-Type
#[derive(Debug, Clone)]
pub struct EncodedParams {
    pub query: Option<String>,
    pub body: RequestBody,
    pub content_type: Option<String>,
}

/// 根据方法与请求体类型编码参数
///
/// GET / HEAD / DELETE 总是把参数编码进查询串；其余方法按 `body_type` 编码请求体。
/// multipart 使用调用方提供的 boundary，以保证同一请求的每次尝试一致。
pub fn encode(
    method: HttpMethod,
    body_type: BodyType,
    params: &Params,
    boundary: &str,
) -> EngineResult<EncodedParams> {
    if method.encodes_params_in_query() {
        let query = form::encode(params)?;
        return Ok(EncodedParams {
            query: (!query.is_empty()).then_some(query),
            body: RequestBody::Empty,
            content_type: None,
        });
    }

    let (body, content_type) = match body_type {
        BodyType::UrlEncoded => (
            RequestBody::Bytes(Bytes::from(form::encode(params)?)),
            BodyType::UrlEncoded.mime().to_string(),
        ),
        BodyType::Json => (
            RequestBody::Bytes(json::encode(params)?),
            BodyType::Json.mime().to_string(),
        ),
        BodyType::Multipart => {
            let body = MultipartBody::build(params, boundary)?;
            let content_type = body.content_type();
            (RequestBody::Multipart(body), content_type)
        }
    };

    Ok(EncodedParams {
        query: None,
        body,
        content_type: Some(content_type),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_uses_query_for_any_body_type() {
        let params = Params::new().with("page", 2);
        for body_type in [BodyType::UrlEncoded, BodyType::Json, BodyType::Multipart] {
            let encoded = encode(HttpMethod::Get, body_type, &params, "b").unwrap();
            assert_eq!(encoded.query.as_deref(), Some("page=2"));
            assert!(encoded.body.is_empty());
            assert!(encoded.content_type.is_none());
        }
    }

    #[test]
    fn test_post_body_types() {
        let params = Params::new().with("name", "swan");

        let form = encode(HttpMethod::Post, BodyType::UrlEncoded, &params, "b").unwrap();
        assert!(matches!(&form.body, RequestBody::Bytes(bytes) if &bytes[..] == b"name=swan"));
        assert_eq!(form.content_type.as_deref(), Some("application/x-www-form-urlencoded"));

        let json = encode(HttpMethod::Put, BodyType::Json, &params, "b").unwrap();
        assert!(matches!(&json.body, RequestBody::Bytes(bytes) if &bytes[..] == br#"{"name":"swan"}"#));

        let multipart = encode(HttpMethod::Post, BodyType::Multipart, &params, "b").unwrap();
        assert_eq!(
            multipart.content_type.as_deref(),
            Some("multipart/form-data; boundary=b")
        );
        assert!(multipart.query.is_none());
    }

    #[test]
    fn test_get_without_params_has_no_query() {
        let encoded = encode(HttpMethod::Get, BodyType::Json, &Params::new(), "b").unwrap();
        assert!(encoded.query.is_none());
    }
}
