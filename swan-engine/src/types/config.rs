use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::http::BodyType;

/// 默认超时时间（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// 缓存策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// 遵循协议默认的缓存语义
    #[default]
    UseProtocol,
    /// 忽略本地缓存，始终回源
    ReloadIgnoringCache,
    /// 有缓存用缓存（即使已过期），否则回源
    ReturnCacheElseLoad,
    /// 只使用缓存，不回源
    ReturnCacheDontLoad,
}

impl CachePolicy {
    /// 对应的 Cache-Control 请求头取值
    pub fn cache_control(&self) -> Option<&'static str> {
        match self {
            CachePolicy::UseProtocol => None,
            CachePolicy::ReloadIgnoringCache => Some("no-cache"),
            CachePolicy::ReturnCacheElseLoad => Some("max-stale"),
            CachePolicy::ReturnCacheDontLoad => Some("only-if-cached"),
        }
    }
}

/// 传输配置
///
/// 每个字段都可以单独缺省。多层配置通过 [`Configuration::override_with`]
/// 按字段右偏合并：上层设置了某个字段就取上层的值，否则保留下层的值。
///
/// `headers` 是映射类型，按键右偏合并，键统一为小写。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub cache_policy: Option<CachePolicy>,
    /// 超时时间，序列化形式为秒
    #[serde(with = "timeout_seconds")]
    pub timeout: Option<Duration>,
    pub body_type: Option<BodyType>,
    #[serde(deserialize_with = "lowercase_keys")]
    pub headers: BTreeMap<String, String>,
    pub verbose: Option<bool>,
    /// 证书锁定：叶子证书 DER 的 SHA-256（十六进制）
    pub pinned_certificates: Option<Vec<String>>,
}

impl Configuration {
    /// 内置的最低优先级默认配置
    pub fn make_default() -> Self {
        Self {
            cache_policy: Some(CachePolicy::UseProtocol),
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            body_type: Some(BodyType::UrlEncoded),
            headers: BTreeMap::new(),
            verbose: Some(false),
            pinned_certificates: None,
        }
    }

    /// 以 `overlay` 覆盖当前配置，返回新的配置
    ///
    /// 合并满足结合律，因此多层配置可以按优先级从低到高依次折叠。
    pub fn override_with(&self, overlay: &Configuration) -> Configuration {
        let mut headers = self.headers.clone();
        headers.extend(
            overlay
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        Configuration {
            cache_policy: overlay.cache_policy.or(self.cache_policy),
            timeout: overlay.timeout.or(self.timeout),
            body_type: overlay.body_type.or(self.body_type),
            headers,
            verbose: overlay.verbose.or(self.verbose),
            pinned_certificates: overlay
                .pinned_certificates
                .clone()
                .or_else(|| self.pinned_certificates.clone()),
        }
    }

    /// 按优先级从低到高折叠多层配置
    pub fn layered<'a, I>(layers: I) -> Configuration
    where
        I: IntoIterator<Item = &'a Configuration>,
    {
        layers
            .into_iter()
            .fold(Configuration::default(), |acc, layer| acc.override_with(layer))
    }

    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_body_type(mut self, body_type: BodyType) -> Self {
        self.body_type = Some(body_type);
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn with_pinned_certificates<I, S>(mut self, digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pinned_certificates = Some(digests.into_iter().map(Into::into).collect());
        self
    }

    pub fn effective_timeout(&self) -> Duration {
        self.timeout
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn effective_body_type(&self) -> BodyType {
        self.body_type.unwrap_or_default()
    }

    pub fn effective_cache_policy(&self) -> CachePolicy {
        self.cache_policy.unwrap_or_default()
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}

fn lowercase_keys<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value))
        .collect())
}

mod timeout_seconds {
    use super::*;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value.map(|timeout| timeout.as_secs_f64()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<f64>::deserialize(deserializer)? {
            None => Ok(None),
            Some(secs) => Duration::try_from_secs_f64(secs).map(Some).map_err(|e| {
                serde::de::Error::custom(format!(
                    "timeout must be a representable non-negative number of seconds, got {}: {}",
                    secs, e
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Configuration> {
        vec![
            Configuration::default(),
            Configuration::make_default(),
            Configuration::default()
                .with_timeout(Duration::from_secs(5))
                .with_header("X-Env", "staging"),
            Configuration::default()
                .with_body_type(BodyType::Json)
                .with_verbose(true)
                .with_header("x-env", "prod")
                .with_header("Authorization", "Bearer a"),
            Configuration::default()
                .with_cache_policy(CachePolicy::ReloadIgnoringCache)
                .with_pinned_certificates(["ab12"]),
            Configuration::default().with_body_type(BodyType::Multipart),
        ]
    }

    #[test]
    fn test_override_is_right_biased() {
        let base = Configuration::make_default();
        let overlay = Configuration::default()
            .with_timeout(Duration::from_secs(3))
            .with_body_type(BodyType::Json);

        let merged = base.override_with(&overlay);
        assert_eq!(merged.timeout, Some(Duration::from_secs(3)));
        assert_eq!(merged.body_type, Some(BodyType::Json));
        // 未设置的字段保留下层的值
        assert_eq!(merged.verbose, Some(false));
        assert_eq!(merged.cache_policy, Some(CachePolicy::UseProtocol));
    }

    #[test]
    fn test_override_headers_per_key() {
        let base = Configuration::default()
            .with_header("X-Env", "staging")
            .with_header("Accept", "text/plain");
        let overlay = Configuration::default().with_header("x-env", "prod");

        let merged = base.override_with(&overlay);
        assert_eq!(merged.headers.get("x-env").map(String::as_str), Some("prod"));
        assert_eq!(merged.headers.get("accept").map(String::as_str), Some("text/plain"));
    }

    #[test]
    fn test_override_is_associative() {
        let configs = samples();
        for a in &configs {
            for b in &configs {
                for c in &configs {
                    let left = a.override_with(b).override_with(c);
                    let right = a.override_with(&b.override_with(c));
                    assert_eq!(left, right);
                }
            }
        }
    }

    #[test]
    fn test_layered_priority() {
        let builtin = Configuration::make_default();
        let environment = Configuration::default().with_timeout(Duration::from_secs(30));
        let router = Configuration::default().with_header("x-router", "1");
        let route = Configuration::default().with_body_type(BodyType::Json);
        let request = Configuration::default().with_timeout(Duration::from_secs(2));

        let merged = Configuration::layered([&builtin, &environment, &router, &route, &request]);
        assert_eq!(merged.timeout, Some(Duration::from_secs(2)));
        assert_eq!(merged.body_type, Some(BodyType::Json));
        assert_eq!(merged.headers.len(), 1);
        assert!(!merged.is_verbose());
    }

    #[test]
    fn test_deserialize_configuration() {
        let json = r#"{
            "timeout": 2.5,
            "body_type": "json",
            "headers": {"X-Token": "abc"},
            "cache_policy": "return_cache_else_load"
        }"#;
        let config: Configuration = serde_json::from_str(json).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_millis(2500)));
        assert_eq!(config.body_type, Some(BodyType::Json));
        assert_eq!(config.headers.get("x-token").map(String::as_str), Some("abc"));
        assert_eq!(config.effective_cache_policy().cache_control(), Some("max-stale"));
        assert!(config.verbose.is_none());
    }

    #[test]
    fn test_deserialize_rejects_negative_timeout() {
        let result = serde_json::from_str::<Configuration>(r#"{"timeout": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_rejects_overflowing_timeout() {
        let result = serde_json::from_str::<Configuration>(r#"{"timeout": 1e30}"#);
        assert!(result.is_err());

        let parsed = serde_json::from_str::<Configuration>(r#"{"timeout": 2.5}"#).unwrap();
        assert_eq!(parsed.timeout, Some(Duration::from_millis(2500)));
    }
}
