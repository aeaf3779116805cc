use std::sync::{Arc, PoisonError, RwLock};

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};
use crate::types::config::Configuration;

/// 命名的 HTTP 端点根：scheme/host/port/路径后缀，外加该环境的默认配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub path_suffix: String,
    #[serde(default)]
    pub configuration: Configuration,
}

fn default_scheme() -> String {
    "https".to_string()
}

impl Environment {
    pub fn new(name: impl Into<String>, scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: scheme.into(),
            host: host.into(),
            port: None,
            path_suffix: String::new(),
            configuration: Configuration::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_path_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.path_suffix = suffix.into();
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = configuration;
        self
    }

    /// 渲染基础 URL，例如 `https://api.example.com:8443/v2`
    pub fn base_url(&self) -> String {
        let mut url = format!("{}://{}", self.scheme, self.host);
        if let Some(port) = self.port {
            url.push_str(&format!(":{}", port));
        }
        let suffix = self.path_suffix.trim_matches('/');
        if !suffix.is_empty() {
            url.push('/');
            url.push_str(suffix);
        }
        url
    }

    /// 将相对路径拼接到基础 URL 上
    pub fn join(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url()
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }
}

/// 当前环境上下文
///
/// 显式构造、可注入，替代进程级全局状态，测试之间互不干扰。
#[derive(Debug, Default)]
pub struct EnvironmentContext {
    current: RwLock<Option<Arc<Environment>>>,
}

impl EnvironmentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current(environment: Environment) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(environment))),
        }
    }

    /// 指定当前环境，返回之前的环境
    pub fn set_current(&self, environment: Arc<Environment>) -> Option<Arc<Environment>> {
        log::info!("Switching current environment to `{}`", environment.name);
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(environment)
    }

    pub fn clear(&self) -> Option<Arc<Environment>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn current(&self) -> Option<Arc<Environment>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn current_or_fail(&self) -> EngineResult<Arc<Environment>> {
        self.current().ok_or(EngineError::EnvironmentNotSet)
    }
}

/// 多环境配置文件
///
/// ```json
/// {
///   "current": "staging",
///   "environments": [
///     {"name": "staging", "host": "staging.example.com", "path_suffix": "v1"},
///     {"name": "prod", "host": "api.example.com", "configuration": {"timeout": 10}}
///   ]
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct EnvironmentSet {
    #[serde(default)]
    pub current: Option<String>,
    pub environments: Vec<Environment>,
}

impl EnvironmentSet {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let set: EnvironmentSet = serde_json::from_str(json)?;
        if let Some(current) = &set.current {
            if set.get(current).is_none() {
                anyhow::bail!("current environment `{}` is not defined", current);
            }
        }
        Ok(set)
    }

    pub fn from_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    pub fn get(&self, name: &str) -> Option<&Environment> {
        self.environments.iter().find(|env| env.name == name)
    }

    /// 构造上下文，并按配置指定当前环境
    pub fn into_context(self) -> EnvironmentContext {
        let context = EnvironmentContext::new();
        if let Some(name) = &self.current {
            if let Some(environment) = self.get(name) {
                context.set_current(Arc::new(environment.clone()));
            }
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_base_url_rendering() {
        let env = Environment::new("dev", "http", "localhost")
            .with_port(8080)
            .with_path_suffix("/api/v1/");
        assert_eq!(env.base_url(), "http://localhost:8080/api/v1");
        assert_eq!(env.join("/users/1"), "http://localhost:8080/api/v1/users/1");

        let bare = Environment::new("prod", "https", "example.com");
        assert_eq!(bare.join("ping"), "https://example.com/ping");
        assert_eq!(bare.join(""), "https://example.com");
    }

    #[test]
    fn test_current_or_fail() {
        let context = EnvironmentContext::new();
        assert!(matches!(context.current_or_fail(), Err(EngineError::EnvironmentNotSet)));

        context.set_current(Arc::new(Environment::new("dev", "http", "localhost")));
        assert_eq!(context.current_or_fail().unwrap().name, "dev");

        context.clear();
        assert!(context.current().is_none());
    }

    #[test]
    fn test_environment_set_from_json() {
        let json = r#"{
            "current": "prod",
            "environments": [
                {"name": "staging", "host": "staging.example.com", "path_suffix": "v1"},
                {"name": "prod", "host": "api.example.com", "port": 8443,
                 "configuration": {"timeout": 10, "headers": {"X-Env": "prod"}}}
            ]
        }"#;
        let set = EnvironmentSet::from_json(json).unwrap();
        assert_eq!(set.environments.len(), 2);
        assert_eq!(set.get("staging").unwrap().scheme, "https");

        let context = set.into_context();
        let current = context.current_or_fail().unwrap();
        assert_eq!(current.base_url(), "https://api.example.com:8443");
        assert_eq!(current.configuration.timeout, Some(Duration::from_secs(10)));
        assert_eq!(
            current.configuration.headers.get("x-env").map(String::as_str),
            Some("prod")
        );
    }

    #[test]
    fn test_environment_set_rejects_unknown_current() {
        let json = r#"{"current": "qa", "environments": [{"name": "dev", "host": "localhost"}]}"#;
        assert!(EnvironmentSet::from_json(json).is_err());
    }
}
