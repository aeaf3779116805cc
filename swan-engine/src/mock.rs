//! 模拟响应：用预置的负载替代真实传输，结果走与真实响应相同的分类与拦截流程。

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{EngineError, EngineResult};
use crate::response::Response;

/// 模拟数据引用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockReference {
    pub name: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
}

impl MockReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: 200,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }
}

/// 模拟数据来源
pub trait MockSource: Send + Sync {
    fn load(&self, reference: &str) -> Option<Bytes>;
}

/// 内存中的模拟数据表
#[derive(Debug, Clone, Default)]
pub struct MockRegistry {
    entries: HashMap<String, Bytes>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        self.insert(reference, payload);
        self
    }

    pub fn insert(&mut self, reference: impl Into<String>, payload: impl Into<Bytes>) {
        self.entries.insert(reference.into(), payload.into());
    }
}

impl MockSource for MockRegistry {
    fn load(&self, reference: &str) -> Option<Bytes> {
        self.entries.get(reference).cloned()
    }
}

/// 从目录读取模拟数据，引用名即相对路径；找不到时再尝试追加 `.json`
#[derive(Debug, Clone)]
pub struct DirectoryMockSource {
    root: PathBuf,
}

impl DirectoryMockSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let relative = Path::new(reference.trim_start_matches('/'));
        // 只允许目录内的普通路径
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return None;
        }
        let path = self.root.join(relative);
        if path.is_file() {
            return Some(path);
        }
        let with_extension = self.root.join(format!("{}.json", relative.display()));
        with_extension.is_file().then_some(with_extension)
    }
}

impl MockSource for DirectoryMockSource {
    fn load(&self, reference: &str) -> Option<Bytes> {
        let path = self.resolve(reference)?;
        match std::fs::read(&path) {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                log::warn!("Failed to read mock file {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// 模拟引擎
///
/// 请求携带 [`MockReference`] 时，或引擎被设置为强制模拟时生效。
#[derive(Clone, Default)]
pub struct MockEngine {
    source: Option<Arc<dyn MockSource>>,
    forced: bool,
    delay: Option<(Duration, Duration)>,
}

impl MockEngine {
    pub fn new(source: impl MockSource + 'static) -> Self {
        Self {
            source: Some(Arc::new(source)),
            forced: false,
            delay: None,
        }
    }

    /// 对所有请求强制使用模拟数据，没有引用的请求以路径作为引用名
    pub fn forced(mut self, forced: bool) -> Self {
        self.forced = forced;
        self
    }

    /// 模拟网络延迟，每个请求在区间内随机抽取一次
    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.delay = Some(if min <= max { (min, max) } else { (max, min) });
        self
    }

    pub fn is_forced(&self) -> bool {
        self.forced
    }

    pub(crate) fn applies(&self, reference: Option<&MockReference>) -> bool {
        reference.is_some() || self.forced
    }

    pub(crate) fn draw_delay(&self) -> Option<Duration> {
        let (min, max) = self.delay?;
        let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        Some(Duration::from_millis(fastrand::u64(min_ms..=max_ms)))
    }

    /// 按引用加载负载，构造与真实传输相同形态的响应
    pub fn respond(&self, reference: &MockReference) -> EngineResult<Response> {
        let payload = self
            .source
            .as_ref()
            .and_then(|source| source.load(&reference.name))
            .ok_or_else(|| EngineError::InvalidMockData {
                reference: reference.name.clone(),
            })?;

        Ok(Response {
            status: reference.status,
            headers: reference.headers.clone(),
            body: payload,
            file: None,
        })
    }
}

impl std::fmt::Debug for MockEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEngine")
            .field("has_source", &self.source.is_some())
            .field("forced", &self.forced)
            .field("delay", &self.delay)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_respond() {
        let engine = MockEngine::new(MockRegistry::new().with("user", r#"{"id":1}"#));

        let response = engine
            .respond(&MockReference::new("user").with_header("Content-Type", "application/json"))
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], br#"{"id":1}"#);
        assert_eq!(response.header("content-type"), Some("application/json"));

        let failure = engine.respond(&MockReference::new("user").with_status(503)).unwrap();
        assert_eq!(failure.status, 503);
    }

    #[test]
    fn test_missing_reference() {
        let engine = MockEngine::new(MockRegistry::new());
        let result = engine.respond(&MockReference::new("nope"));
        assert!(matches!(
            result,
            Err(EngineError::InvalidMockData { reference }) if reference == "nope"
        ));

        let empty = MockEngine::default();
        assert!(empty.respond(&MockReference::new("x")).is_err());
        assert!(!empty.applies(None));
        assert!(empty.clone().forced(true).applies(None));
    }

    #[test]
    fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("users")).unwrap();
        std::fs::write(dir.path().join("users/1.json"), b"{\"id\":1}").unwrap();

        let source = DirectoryMockSource::new(dir.path());
        assert_eq!(source.load("users/1.json").as_deref(), Some(&b"{\"id\":1}"[..]));
        assert_eq!(source.load("/users/1").as_deref(), Some(&b"{\"id\":1}"[..]));
        assert!(source.load("../etc/passwd").is_none());
        assert!(source.load("users/2").is_none());
    }

    #[test]
    fn test_delay_within_range() {
        let engine = MockEngine::default()
            .with_delay(Duration::from_millis(30), Duration::from_millis(10));
        for _ in 0..20 {
            let delay = engine.draw_delay().unwrap();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(30));
        }
        assert!(MockEngine::default().draw_delay().is_none());
    }
}
