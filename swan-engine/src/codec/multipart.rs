use std::io;
use std::path::PathBuf;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::error::{EngineError, EngineResult};
use crate::types::params::{ParamValue, Params, PartPayload};

const CRLF: &[u8] = b"\r\n";

/// 生成随机 boundary，每个请求只生成一次
pub fn generate_boundary() -> String {
    format!(
        "swan-boundary-{:016x}{:016x}",
        fastrand::u64(..),
        fastrand::u64(..)
    )
}

/// 单个已编码的分段：头部块 + 负载
#[derive(Debug, Clone)]
struct EncodedPart {
    header: Bytes,
    payload: PartPayload,
    payload_len: u64,
}

/// multipart/form-data 请求体
///
/// 构建时只计算各分段的长度，不把文件内容读入内存；
/// [`MultipartBody::content_length`] 按头部块、负载与分隔符逐项求和得到。
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<EncodedPart>,
}

impl MultipartBody {
    /// 把参数编码为 multipart 分段
    ///
    /// 标量参数成为文本字段，`Json` 参数以 `application/json` 文本字段发送，
    /// `Part` 参数按其文件名与内容类型发送。`Null`、JSON `null` 或无法读取的文件
    /// 返回 [`EngineError::InvalidMultipartParams`]。
    pub fn build(params: &Params, boundary: impl Into<String>) -> EngineResult<Self> {
        let boundary = boundary.into();
        let mut parts = Vec::with_capacity(params.len());

        for (name, value) in params.iter() {
            let part = match value {
                ParamValue::Null | ParamValue::Json(serde_json::Value::Null) => {
                    return Err(EngineError::InvalidMultipartParams {
                        reason: format!("`{}` has no value", name),
                    });
                }
                ParamValue::Part(part) => {
                    let payload_len = payload_len(&part.payload)?;
                    EncodedPart {
                        header: part_header(
                            &boundary,
                            name,
                            part.file_name.as_deref(),
                            part.content_type.as_deref(),
                        ),
                        payload: part.payload.clone(),
                        payload_len,
                    }
                }
                ParamValue::Json(json) if json.is_array() || json.is_object() => {
                    let text = Bytes::from(json.to_string());
                    EncodedPart {
                        header: part_header(&boundary, name, None, Some("application/json")),
                        payload_len: text.len() as u64,
                        payload: PartPayload::Bytes(text),
                    }
                }
                scalar => {
                    let text = Bytes::from(scalar.as_text().unwrap_or_default());
                    EncodedPart {
                        header: part_header(&boundary, name, None, None),
                        payload_len: text.len() as u64,
                        payload: PartPayload::Bytes(text),
                    }
                }
            };
            parts.push(part);
        }

        Ok(Self { boundary, parts })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// 请求体总长度，在开始发送前即可确定
    pub fn content_length(&self) -> u64 {
        let parts: u64 = self
            .parts
            .iter()
            .map(|part| part.header.len() as u64 + part.payload_len + CRLF.len() as u64)
            .sum();
        parts + self.closing().len() as u64
    }

    fn closing(&self) -> Bytes {
        Bytes::from(format!("--{}--\r\n", self.boundary))
    }

    /// 以块流的形式输出请求体，文件分段边读边发
    pub fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        let closing = self.closing();
        let parts = self.parts.into_iter().map(|part| {
            let header = stream::once(async move { Ok::<_, io::Error>(part.header) });
            let payload = match part.payload {
                PartPayload::Bytes(bytes) => stream::once(async move { Ok(bytes) }).boxed(),
                PartPayload::File(path) => file_stream(path, part.payload_len),
            };
            let trailer = stream::once(async { Ok(Bytes::from_static(CRLF)) });
            header.chain(payload).chain(trailer)
        });

        stream::iter(parts)
            .flatten()
            .chain(stream::once(async move { Ok(closing) }))
            .boxed()
    }

    /// 把整个请求体读入内存（仅用于小请求体与测试）
    pub async fn collect(self) -> io::Result<Bytes> {
        let capacity = usize::try_from(self.content_length()).unwrap_or_default();
        let chunks: Vec<Bytes> = self.into_stream().try_collect().await?;
        let mut body = Vec::with_capacity(capacity);
        for chunk in chunks {
            body.extend_from_slice(&chunk);
        }
        Ok(Bytes::from(body))
    }
}

fn payload_len(payload: &PartPayload) -> EngineResult<u64> {
    match payload {
        PartPayload::Bytes(bytes) => Ok(bytes.len() as u64),
        PartPayload::File(path) => std::fs::metadata(path)
            .ok()
            .filter(|metadata| metadata.is_file())
            .map(|metadata| metadata.len())
            .ok_or_else(|| EngineError::InvalidMultipartParams {
                reason: format!("`{}` is not a readable file", path.display()),
            }),
    }
}

fn file_stream(path: PathBuf, len: u64) -> BoxStream<'static, io::Result<Bytes>> {
    // 只读取构建时统计的长度，保证实际发送的字节数与声明的长度一致
    stream::once(async move { tokio::fs::File::open(path).await })
        .map_ok(move |file| ReaderStream::new(file.take(len)))
        .try_flatten()
        .boxed()
}

fn part_header(
    boundary: &str,
    name: &str,
    file_name: Option<&str>,
    content_type: Option<&str>,
) -> Bytes {
    let mut header = format!(
        "--{}\r\nContent-Disposition: form-data; name=\"{}\"",
        boundary,
        escape_quoted(name)
    );
    if let Some(file_name) = file_name {
        header.push_str(&format!("; filename=\"{}\"", escape_quoted(file_name)));
    }
    header.push_str("\r\n");
    if let Some(content_type) = content_type {
        header.push_str(&format!("Content-Type: {}\r\n", content_type));
    }
    header.push_str("\r\n");
    Bytes::from(header)
}

fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::params::MultipartPart;
    use std::io::Write;

    #[tokio::test]
    async fn test_content_length_matches_streamed_body() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let binary: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        file.write_all(&binary).unwrap();
        file.flush().unwrap();

        let params = Params::new()
            .with("title", "天鹅湖")
            .with("count", 3)
            .with(
                "avatar",
                MultipartPart::bytes(vec![0u8, 159, 146, 150]).with_file_name("a.bin"),
            )
            .with(
                "archive",
                MultipartPart::file(file.path()).with_content_type("application/octet-stream"),
            );

        let body = MultipartBody::build(&params, generate_boundary()).unwrap();
        let declared = body.content_length();
        let streamed = body.collect().await.unwrap();

        assert_eq!(declared, streamed.len() as u64);
    }

    #[tokio::test]
    async fn test_body_layout() {
        let params = Params::new()
            .with("name", "swan")
            .with(
                "photo",
                MultipartPart::bytes(&b"\x89PNG"[..])
                    .with_file_name("p.png")
                    .with_content_type("image/png"),
            );
        let body = MultipartBody::build(&params, "XYZ").unwrap();
        assert_eq!(body.content_type(), "multipart/form-data; boundary=XYZ");

        let bytes = body.collect().await.unwrap();
        let expected: &[u8] = b"--XYZ\r\n\
Content-Disposition: form-data; name=\"name\"\r\n\r\n\
swan\r\n\
--XYZ\r\n\
Content-Disposition: form-data; name=\"photo\"; filename=\"p.png\"\r\n\
Content-Type: image/png\r\n\r\n\
\x89PNG\r\n\
--XYZ--\r\n";
        assert_eq!(&bytes[..], expected);
    }

    #[test]
    fn test_null_and_missing_file_are_rejected() {
        let params = Params::new().with("empty", ParamValue::Null);
        assert!(matches!(
            MultipartBody::build(&params, "b"),
            Err(EngineError::InvalidMultipartParams { .. })
        ));

        let params = Params::new().with("empty", ParamValue::Json(serde_json::Value::Null));
        assert!(matches!(
            MultipartBody::build(&params, "b"),
            Err(EngineError::InvalidMultipartParams { .. })
        ));

        let params = Params::new().with("file", MultipartPart::file("/definitely/not/here.bin"));
        assert!(matches!(
            MultipartBody::build(&params, "b"),
            Err(EngineError::InvalidMultipartParams { .. })
        ));
    }

    #[test]
    fn test_boundary_is_random() {
        assert_ne!(generate_boundary(), generate_boundary());
        assert!(generate_boundary().starts_with("swan-boundary-"));
    }
}
