//! 请求：一次逻辑调用从构造到完成的全部状态。
//!
//! 构造请求不做任何 I/O；URL、头部与请求体在每次尝试开始时才解析，
//! 因此拦截器在重试前对请求的修改（切换环境、刷新头部）会体现在下一次尝试上。

mod state;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use url::Url;

use crate::codec::{self, form};
use crate::error::{EngineError, EngineResult};
use crate::interceptor::Interceptor;
use crate::mock::MockReference;
use crate::response::Response;
use crate::transport::{DownloadTarget, WireRequest};
use crate::types::config::Configuration;
use crate::types::environment::{Environment, EnvironmentContext};
use crate::types::http::HttpMethod;
use crate::types::params::{ParamValue, Params};
use crate::types::route::{Route, RouteResolver, is_absolute_path};

pub use state::{CancelHandle, RequestState};

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// 一次逻辑 HTTP 调用
pub struct Request {
    id: u64,
    method: HttpMethod,
    path: String,
    params: Params,
    route_headers: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    environment: Option<Arc<Environment>>,
    mock: Option<MockReference>,
    router_configuration: Option<Configuration>,
    route_configuration: Option<Configuration>,
    request_configuration: Option<Configuration>,
    /// 合并后的配置缓存，环境或配置层变化时失效
    configuration: Option<Configuration>,
    url: Option<Url>,
    state: RequestState,
    retry_count: u32,
    started_at: Option<Instant>,
    duration: Option<Duration>,
    boundary: String,
    mock_delay: Option<Option<Duration>>,
    download: Option<DownloadTarget>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    cancel: CancelHandle,
}

impl Request {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            id: NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            method,
            path: path.into(),
            params: Params::new(),
            route_headers: BTreeMap::new(),
            headers: BTreeMap::new(),
            environment: None,
            mock: None,
            router_configuration: None,
            route_configuration: None,
            request_configuration: None,
            configuration: None,
            url: None,
            state: RequestState::Created,
            retry_count: 0,
            started_at: None,
            duration: None,
            boundary: codec::generate_boundary(),
            mock_delay: None,
            download: None,
            interceptors: Vec::new(),
            cancel: CancelHandle::new(),
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

    /// 由路由描述构造请求，路由的头部与配置作为“路由层”
    pub fn from_route(route: Route) -> Self {
        let Route {
            method,
            path,
            params,
            headers,
            mock,
            configuration,
        } = route;

        let mut request = Self::new(method, path);
        request.params = params;
        request.route_headers = headers;
        request.mock = mock;
        request.route_configuration = configuration;
        request
    }

    /// 调用路由解析器，并把所用环境绑定到请求上
    pub fn resolve<R>(resolver: &R, environment: Option<Arc<Environment>>) -> Self
    where
        R: RouteResolver + ?Sized,
    {
        let route = resolver.resolve(environment.as_deref());
        let mut request = Self::from_route(route);
        request.environment = environment;
        request
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key, value);
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    /// 请求级头部，优先级最高
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// 请求级配置覆盖，优先级最高
    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.set_configuration(configuration);
        self
    }

    pub fn environment(mut self, environment: Arc<Environment>) -> Self {
        self.set_environment(environment);
        self
    }

    pub fn mock(mut self, reference: MockReference) -> Self {
        self.mock = Some(reference);
        self
    }

    /// 追加请求自己的拦截器，排在会话默认拦截器之后
    pub fn interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// 把响应体直接写入文件
    pub fn download_to(self, destination: impl Into<PathBuf>) -> Self {
        self.download(DownloadTarget::new(destination))
    }

    /// 带进度回调的下载
    pub fn download(mut self, target: DownloadTarget) -> Self {
        self.download = Some(target);
        self
    }

    pub(crate) fn with_router_layer(
        mut self,
        configuration: Option<Configuration>,
        interceptors: &[Arc<dyn Interceptor>],
    ) -> Self {
        self.router_configuration = configuration;
        self.configuration = None;
        let mut chain = interceptors.to_vec();
        chain.append(&mut self.interceptors);
        self.interceptors = chain;
        self
    }

    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    /// 切换环境，合并后的配置会在下一次尝试时重新计算
    pub fn set_environment(&mut self, environment: Arc<Environment>) {
        self.environment = Some(environment);
        self.configuration = None;
    }

    pub fn set_configuration(&mut self, configuration: Configuration) {
        self.request_configuration = Some(configuration);
        self.configuration = None;
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params_ref(&self) -> &Params {
        &self.params
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn current_environment(&self) -> Option<&Arc<Environment>> {
        self.environment.as_ref()
    }

    pub fn mock_reference(&self) -> Option<&MockReference> {
        self.mock.as_ref()
    }

    pub fn download_target(&self) -> Option<&DownloadTarget> {
        self.download.as_ref()
    }

    /// 最近一次尝试解析出的 URL
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// 最近一次尝试使用的合并配置
    pub fn merged_configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// 从第一次尝试开始到完成的耗时
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 取消句柄，可在请求交给队列或会话之后使用
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub(crate) fn interceptors(&self) -> &[Arc<dyn Interceptor>] {
        &self.interceptors
    }

    pub(crate) fn boundary(&self) -> &str {
        &self.boundary
    }

    /// 模拟延迟在请求的整个生命周期内只抽取一次
    pub(crate) fn mock_delay_with<F>(&mut self, draw: F) -> Option<Duration>
    where
        F: FnOnce() -> Option<Duration>,
    {
        *self.mock_delay.get_or_insert_with(draw)
    }

    fn advance(&mut self, next: RequestState) -> bool {
        if self.state.can_advance_to(next) {
            log::trace!("Request #{} {} -> {}", self.id, self.state, next);
            self.state = next;
            true
        } else {
            log::debug!(
                "Request #{} ignored transition {} -> {}",
                self.id,
                self.state,
                next
            );
            false
        }
    }

    /// 开始一次尝试；耗时从第一次尝试算起
    pub(crate) fn begin_attempt(&mut self) {
        if self.state == RequestState::Created {
            self.advance(RequestState::Executing);
        }
        self.started_at.get_or_insert_with(Instant::now);
    }

    pub(crate) fn record_retry(&mut self) {
        self.retry_count += 1;
    }

    /// 未开始的请求先推进到 `Executing`，保证状态机的簿记一致
    pub(crate) fn mark_cancelled(&mut self) {
        if self.state == RequestState::Created {
            self.advance(RequestState::Executing);
        }
        self.advance(RequestState::Cancelled);
    }

    pub(crate) fn finish(mut self, outcome: Outcome) -> Completion {
        if outcome.is_cancelled() {
            self.mark_cancelled();
        } else if self.state == RequestState::Created {
            self.advance(RequestState::Executing);
        }
        self.advance(RequestState::Finished);
        self.duration = self.started_at.map(|started| started.elapsed());

        match &outcome {
            Outcome::Success(response) => log::info!(
                "Request #{} finished: {} {} -> {} in {:?}",
                self.id,
                self.method,
                self.path,
                response.status,
                self.duration.unwrap_or_default()
            ),
            Outcome::Failure { error, .. } if error.is_cancelled() => {
                log::info!("Request #{} {}", self.id, error)
            }
            Outcome::Failure { error, .. } => log::warn!(
                "Request #{} failed: {} {} [{}] {}",
                self.id,
                self.method,
                self.path,
                error.kind().as_str(),
                error
            ),
        }

        Completion {
            request: self,
            outcome,
        }
    }

    /// 解析本次尝试的线上请求
    ///
    /// 相对路径在未绑定环境时从上下文取当前环境；配置按
    /// 内置默认 < 环境 < 路由器 < 路由 < 请求 的顺序合并；
    /// 头部按 合并配置 < 路由 < 请求 的顺序覆盖。
    pub(crate) fn prepare(
        &mut self,
        builtin: &Configuration,
        context: &EnvironmentContext,
    ) -> EngineResult<WireRequest> {
        let absolute = is_absolute_path(&self.path);
        if !absolute && self.environment.is_none() {
            self.environment = Some(context.current_or_fail()?);
            self.configuration = None;
        }

        if let Some(target) = &self.download {
            target.validate()?;
        }

        let configuration = match &self.configuration {
            Some(configuration) => configuration.clone(),
            None => {
                let merged = self.merge_layers(builtin);
                self.configuration = Some(merged.clone());
                merged
            }
        };

        let mut url = self.resolve_url(absolute)?;
        let encoded = codec::encode(
            self.method,
            configuration.effective_body_type(),
            &self.params,
            &self.boundary,
        )?;
        if let Some(query) = &encoded.query {
            form::append_query(&mut url, query);
        }

        let mut headers = configuration.headers.clone();
        headers.extend(self.route_headers.clone());
        headers.extend(self.headers.clone());
        // 请求体与其 Content-Type 必须一致（multipart 的 boundary）
        if let Some(content_type) = encoded.content_type {
            headers.insert("content-type".to_string(), content_type);
        }
        if let Some(directive) = configuration.effective_cache_policy().cache_control() {
            headers
                .entry("cache-control".to_string())
                .or_insert_with(|| directive.to_string());
        }

        self.url = Some(url.clone());

        Ok(WireRequest {
            request_id: self.id,
            method: self.method,
            url,
            headers,
            body: encoded.body,
            timeout: configuration.effective_timeout(),
            pinned_certificates: configuration.pinned_certificates.clone().unwrap_or_default(),
        })
    }

    fn merge_layers(&self, builtin: &Configuration) -> Configuration {
        let layers = [
            Some(builtin),
            self.environment.as_deref().map(|env| &env.configuration),
            self.router_configuration.as_ref(),
            self.route_configuration.as_ref(),
            self.request_configuration.as_ref(),
        ];
        Configuration::layered(layers.into_iter().flatten())
    }

    fn resolve_url(&self, absolute: bool) -> EngineResult<Url> {
        let raw = if absolute {
            self.path.clone()
        } else {
            match &self.environment {
                Some(environment) => environment.join(&self.path),
                None => return Err(EngineError::EnvironmentNotSet),
            }
        };
        Url::parse(&raw).map_err(|_| EngineError::InvalidUrl { url: raw })
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("path", &self.path)
            .field("state", &self.state)
            .field("retry_count", &self.retry_count)
            .field(
                "environment",
                &self.environment.as_ref().map(|env| env.name.as_str()),
            )
            .field("mock", &self.mock)
            .field("download", &self.download)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}

/// 一次尝试的终态结果
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Response),
    /// 失败；非 2xx 响应同时保留响应本身
    Failure {
        error: EngineError,
        response: Option<Response>,
    },
}

impl Outcome {
    pub fn failure(error: EngineError) -> Self {
        Self::Failure {
            error,
            response: None,
        }
    }

    /// 按状态码区分成功与失败
    pub fn classify(response: Response) -> Self {
        if response.is_success() {
            Self::Success(response)
        } else {
            Self::Failure {
                error: EngineError::NotSuccess {
                    status: response.status,
                },
                response: Some(response),
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_cancelled(&self) -> bool {
        self.error().is_some_and(EngineError::is_cancelled)
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Success(response) => Some(response),
            Self::Failure { response, .. } => response.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&EngineError> {
        match self {
            Self::Success(_) => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status)
    }

    pub fn into_result(self) -> EngineResult<Response> {
        match self {
            Self::Success(response) => Ok(response),
            Self::Failure { error, .. } => Err(error),
        }
    }
}

/// 请求完成：已到达 `Finished` 的请求与它的最终结果
#[derive(Debug)]
pub struct Completion {
    pub request: Request,
    pub outcome: Outcome,
}

impl Completion {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn response(&self) -> Option<&Response> {
        self.outcome.response()
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.outcome.error()
    }

    pub fn into_result(self) -> EngineResult<Response> {
        self.outcome.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RequestBody;
    use crate::error::CancelCause;
    use crate::types::config::CachePolicy;
    use crate::types::http::BodyType;
    use std::time::Duration;

    fn staging() -> Arc<Environment> {
        Arc::new(
            Environment::new("staging", "https", "staging.example.com")
                .with_path_suffix("v1")
                .with_configuration(
                    Configuration::default()
                        .with_timeout(Duration::from_secs(20))
                        .with_header("x-layer", "environment")
                        .with_header("x-env", "staging"),
                ),
        )
    }

    #[test]
    fn test_construction_is_inert() {
        let request = Request::get("/users").param("page", 2);
        assert_eq!(request.state(), RequestState::Created);
        assert_eq!(request.retry_count(), 0);
        assert!(request.url().is_none());
        assert!(request.started_at().is_none());
        assert!(request.merged_configuration().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Request::get("/a");
        let b = Request::get("/b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_prepare_relative_requires_environment() {
        let mut request = Request::get("/users");
        let result = request.prepare(&Configuration::make_default(), &EnvironmentContext::new());
        assert!(matches!(result, Err(EngineError::EnvironmentNotSet)));
    }

    #[test]
    fn test_prepare_absolute_ignores_environment() {
        let mut request = Request::get("https://other.example.com/ping").param("q", "a b");
        let wire = request
            .prepare(&Configuration::make_default(), &EnvironmentContext::new())
            .unwrap();
        assert_eq!(wire.url.as_str(), "https://other.example.com/ping?q=a+b");
        assert!(matches!(wire.body, RequestBody::Empty));
        assert_eq!(wire.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_prepare_invalid_url() {
        let mut request = Request::get("https://exa mple.com/");
        let result = request.prepare(&Configuration::make_default(), &EnvironmentContext::new());
        assert!(matches!(result, Err(EngineError::InvalidUrl { .. })));
    }

    #[test]
    fn test_layered_configuration_and_header_precedence() {
        let route = Route::post("/login")
            .param("user", "swan")
            .header("x-layer", "route")
            .header("x-route", "yes")
            .configuration(Configuration::default().with_body_type(BodyType::Json));

        let mut request = Request::resolve(&route, Some(staging()))
            .with_router_layer(
                Some(
                    Configuration::default()
                        .with_timeout(Duration::from_secs(5))
                        .with_header("x-layer", "router"),
                ),
                &[],
            )
            .header("X-Layer", "request")
            .configuration(Configuration::default().with_cache_policy(CachePolicy::ReloadIgnoringCache));

        let builtin = Configuration::make_default().with_header("x-layer", "builtin");
        let wire = request.prepare(&builtin, &EnvironmentContext::new()).unwrap();

        assert_eq!(wire.url.as_str(), "https://staging.example.com/v1/login");
        assert_eq!(wire.timeout, Duration::from_secs(5));
        assert_eq!(wire.header("x-layer"), Some("request"));
        assert_eq!(wire.header("x-env"), Some("staging"));
        assert_eq!(wire.header("x-route"), Some("yes"));
        assert_eq!(wire.header("content-type"), Some("application/json"));
        assert_eq!(wire.header("cache-control"), Some("no-cache"));
        match &wire.body {
            RequestBody::Bytes(bytes) => assert_eq!(&bytes[..], br#"{"user":"swan"}"#),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_environment_swap_remerges_configuration() {
        let mut request = Request::get("/status");
        let context = EnvironmentContext::with_current((*staging()).clone());
        let builtin = Configuration::make_default();

        let first = request.prepare(&builtin, &context).unwrap();
        assert_eq!(first.timeout, Duration::from_secs(20));

        request.set_environment(Arc::new(Environment::new("prod", "https", "api.example.com")));
        let second = request.prepare(&builtin, &context).unwrap();
        assert_eq!(second.url.as_str(), "https://api.example.com/status");
        assert_eq!(second.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_multipart_boundary_stable_across_attempts() {
        let mut request = Request::post("https://upload.example.com/files")
            .configuration(Configuration::default().with_body_type(BodyType::Multipart))
            .param("title", "report");
        let builtin = Configuration::make_default();
        let context = EnvironmentContext::new();

        let first = request.prepare(&builtin, &context).unwrap();
        let second = request.prepare(&builtin, &context).unwrap();
        assert_eq!(first.header("content-type"), second.header("content-type"));
        assert!(first.header("content-type").unwrap().contains(request.boundary()));
    }

    #[test]
    fn test_invalid_download_destination_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = Request::get("https://cdn.example.com/file").download_to(dir.path());
        let result = request.prepare(&Configuration::make_default(), &EnvironmentContext::new());
        assert!(matches!(result, Err(EngineError::InvalidFileUrl { .. })));
    }

    #[test]
    fn test_cancel_before_start_advances_through_executing() {
        let request = Request::get("/never");
        request.cancel_handle().cancel(CancelCause::Caller);

        let completion = request.finish(Outcome::failure(EngineError::Cancelled(CancelCause::Caller)));
        assert_eq!(completion.request.state(), RequestState::Finished);
        assert!(completion.outcome.is_cancelled());
        assert!(completion.request.duration().is_none());
    }

    #[test]
    fn test_started_at_is_kept_across_attempts() {
        let mut request = Request::get("/retry");
        request.begin_attempt();
        let first = request.started_at().unwrap();
        assert_eq!(request.state(), RequestState::Executing);

        request.record_retry();
        std::thread::sleep(Duration::from_millis(5));
        request.begin_attempt();
        assert_eq!(request.started_at(), Some(first));
        assert_eq!(request.state(), RequestState::Executing);

        let completion = request.finish(Outcome::classify(Response::new(200, "")));
        assert!(completion.request.duration().unwrap() >= Duration::from_millis(5));
    }

    #[test]
    fn test_outcome_classification() {
        let ok = Outcome::classify(Response::new(204, ""));
        assert!(ok.is_success());

        let failed = Outcome::classify(Response::new(503, "busy"));
        assert_eq!(failed.status(), Some(503));
        assert!(matches!(failed.error(), Some(EngineError::NotSuccess { status: 503 })));
        assert!(!failed.is_cancelled());
    }

    #[test]
    fn test_mock_delay_drawn_once() {
        let mut request = Request::get("/m");
        let first = request.mock_delay_with(|| Some(Duration::from_millis(7)));
        let second = request.mock_delay_with(|| Some(Duration::from_millis(99)));
        assert_eq!(first, second);
    }
}
