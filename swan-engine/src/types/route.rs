use std::collections::BTreeMap;

use crate::mock::MockReference;
use crate::types::config::Configuration;
use crate::types::environment::Environment;
use crate::types::http::HttpMethod;
use crate::types::params::{ParamValue, Params};

/// 一次端点调用的纯描述
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub method: HttpMethod,
    /// 相对路径，或以 `http://` / `https://` 开头的绝对地址
    pub path: String,
    pub params: Params,
    pub headers: BTreeMap<String, String>,
    pub mock: Option<MockReference>,
    pub configuration: Option<Configuration>,
}

impl Route {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: Params::new(),
            headers: BTreeMap::new(),
            mock: None,
            configuration: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn mock(mut self, reference: MockReference) -> Self {
        self.mock = Some(reference);
        self
    }

    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// 绝对地址不依赖任何环境
    pub fn is_absolute(&self) -> bool {
        is_absolute_path(&self.path)
    }
}

pub(crate) fn is_absolute_path(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// 路由解析接口
///
/// 调用方通常用一个枚举实现它，每个变体对应一个端点：
///
/// ```
/// use swan_engine::{Environment, Route, RouteResolver};
///
/// enum UserApi {
///     Profile(u32),
///     Rename { id: u32, name: String },
/// }
///
/// impl RouteResolver for UserApi {
///     fn resolve(&self, _environment: Option<&Environment>) -> Route {
///         match self {
///             UserApi::Profile(id) => Route::get(format!("/users/{}", id)),
///             UserApi::Rename { id, name } => Route::put(format!("/users/{}", id))
///                 .param("name", name.as_str()),
///         }
///     }
/// }
/// ```
pub trait RouteResolver {
    /// 纯函数：相同的路由值总是产生相同的 [`Route`]
    fn resolve(&self, environment: Option<&Environment>) -> Route;
}

impl RouteResolver for Route {
    fn resolve(&self, _environment: Option<&Environment>) -> Route {
        self.clone()
    }
}
