use serde::{Deserialize, Serialize};

/// HTTP 方法枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// 返回HTTP方法的字符串表示
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// 参数是否编码进查询字符串而不是请求体
    ///
    /// GET、HEAD 和 DELETE 不携带请求体，无论配置的请求体类型是什么。
    pub fn encodes_params_in_query(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head | HttpMethod::Delete)
    }

    /// 判断HTTP方法是否幂等
    pub fn is_idempotent(&self) -> bool {
        !matches!(self, HttpMethod::Post | HttpMethod::Patch)
    }

    /// 转换为 reqwest 的方法类型
    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求体编码类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    #[default]
    UrlEncoded,
    Json,
    Multipart,
}

impl BodyType {
    /// 对应的 Content-Type（multipart 的 boundary 由请求单独追加）
    pub fn mime(&self) -> &'static str {
        match self {
            BodyType::UrlEncoded => "application/x-www-form-urlencoded",
            BodyType::Json => "application/json",
            BodyType::Multipart => "multipart/form-data",
        }
    }
}
