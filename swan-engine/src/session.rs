//! 会话：显式构造的执行上下文，持有传输层、当前环境、内置默认配置、
//! 默认拦截器链与模拟引擎。测试可以为每个用例构造独立的会话。

use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::interceptor::{Interceptor, InterceptorChain, Verdict};
use crate::mock::{MockEngine, MockReference};
use crate::queue::QueueBuilder;
use crate::queue::hooks::AttemptObserver;
use crate::request::{Completion, Outcome, Request};
use crate::response::Response;
use crate::router::Router;
use crate::transport::{ReqwestTransport, StreamingResponse, Transport};
use crate::types::config::Configuration;
use crate::types::environment::{Environment, EnvironmentContext, EnvironmentSet};
use crate::types::route::RouteResolver;

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    environments: Arc<EnvironmentContext>,
    defaults: Configuration,
    interceptors: InterceptorChain,
    mock: MockEngine,
}

/// 会话构建器
pub struct SessionBuilder {
    transport: Option<Arc<dyn Transport>>,
    environments: Option<Arc<EnvironmentContext>>,
    defaults: Configuration,
    interceptors: InterceptorChain,
    mock: MockEngine,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            transport: None,
            environments: None,
            defaults: Configuration::make_default(),
            interceptors: InterceptorChain::new(),
            mock: MockEngine::default(),
        }
    }
}

impl SessionBuilder {
    pub fn transport<T>(mut self, transport: T) -> Self
    where
        T: Transport + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 设置当前环境
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environments = Some(Arc::new(EnvironmentContext::with_current(environment)));
        self
    }

    /// 从多环境配置加载当前环境
    pub fn environments(mut self, environments: EnvironmentSet) -> Self {
        self.environments = Some(Arc::new(environments.into_context()));
        self
    }

    /// 与其他会话共享环境上下文
    pub fn environment_context(mut self, context: Arc<EnvironmentContext>) -> Self {
        self.environments = Some(context);
        self
    }

    /// 覆盖内置默认配置中的部分字段
    pub fn default_configuration(mut self, configuration: Configuration) -> Self {
        self.defaults = Configuration::make_default().override_with(&configuration);
        self
    }

    /// 追加会话级拦截器，所有请求都会经过
    pub fn interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn mock_engine(mut self, mock: MockEngine) -> Self {
        self.mock = mock;
        self
    }

    /// 构建会话；未指定传输层时使用 [`ReqwestTransport`]
    pub fn build(self) -> EngineResult<Session> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new().map_err(EngineError::NetworkError)?),
        };

        Ok(Session {
            inner: Arc::new(SessionInner {
                transport,
                environments: self.environments.unwrap_or_default(),
                defaults: self.defaults,
                interceptors: self.interceptors,
                mock: self.mock,
            }),
        })
    }
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// 使用默认 reqwest 传输层的会话
    pub fn new() -> EngineResult<Self> {
        Self::builder().build()
    }

    pub fn environments(&self) -> &Arc<EnvironmentContext> {
        &self.inner.environments
    }

    pub fn set_environment(&self, environment: Environment) -> Option<Arc<Environment>> {
        self.inner.environments.set_current(Arc::new(environment))
    }

    pub fn default_configuration(&self) -> &Configuration {
        &self.inner.defaults
    }

    pub fn mock_engine(&self) -> &MockEngine {
        &self.inner.mock
    }

    /// 用当前环境解析路由并构造请求
    pub fn request<R>(&self, route: &R) -> Request
    where
        R: RouteResolver + ?Sized,
    {
        Request::resolve(route, self.inner.environments.current())
    }

    /// 绑定本会话环境上下文的路由器
    pub fn router(&self) -> Router {
        Router::new().with_context(Arc::clone(&self.inner.environments))
    }

    /// 创建一个由本会话执行请求的队列
    pub fn queue(&self) -> QueueBuilder {
        QueueBuilder::new(self.clone())
    }

    /// 不经过队列直接执行请求
    pub async fn execute(&self, request: Request) -> Completion {
        self.drive(request, &()).await
    }

    /// 执行请求直到完成：尝试、遍历拦截器链、按需等待后重试
    pub(crate) async fn drive(&self, mut request: Request, observer: &dyn AttemptObserver) -> Completion {
        let cancel = request.cancel_handle();
        if cancel.is_cancelled() {
            return Self::finish_unstarted(request, observer);
        }

        loop {
            observer.before_attempt(&request);
            request.begin_attempt();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Outcome::failure(EngineError::Cancelled(cancel.cause())),
                outcome = self.attempt(&mut request) => outcome,
            };

            // 取消与请求前就能发现的错误不进入拦截器链
            let skip_chain = outcome.is_cancelled()
                || outcome.error().is_some_and(EngineError::is_fail_fast);
            let verdict = if skip_chain {
                Verdict::Continue
            } else {
                self.inner.interceptors.walk(&outcome, &mut request).await
            };

            let delay = match verdict {
                Verdict::Continue => {
                    observer.after_attempt(&request, &outcome);
                    return request.finish(outcome);
                }
                Verdict::Fail(error) => {
                    let outcome = Outcome::Failure {
                        error,
                        response: outcome.response().cloned(),
                    };
                    observer.after_attempt(&request, &outcome);
                    return request.finish(outcome);
                }
                Verdict::Retry(delay) => {
                    observer.after_attempt(&request, &outcome);
                    delay
                }
            };

            request.record_retry();
            log::info!(
                "Request #{} retry {} scheduled in {:?}",
                request.id(),
                request.retry_count(),
                delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let outcome = Outcome::failure(EngineError::Cancelled(cancel.cause()));
                    return request.finish(outcome);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// 从未执行就被取消的请求：推进状态、通知观察者并完成
    pub(crate) fn finish_unstarted(mut request: Request, observer: &dyn AttemptObserver) -> Completion {
        let outcome = Outcome::failure(EngineError::Cancelled(request.cancel_handle().cause()));
        request.mark_cancelled();
        observer.after_attempt(&request, &outcome);
        request.finish(outcome)
    }

    async fn attempt(&self, request: &mut Request) -> Outcome {
        match self.perform(request).await {
            Ok(response) => Outcome::classify(response),
            Err(error) => Outcome::failure(error),
        }
    }

    async fn perform(&self, request: &mut Request) -> EngineResult<Response> {
        let wire = request.prepare(&self.inner.defaults, &self.inner.environments)?;
        let verbose = request
            .merged_configuration()
            .is_some_and(Configuration::is_verbose);

        log::info!(
            "Request #{} started: {} {} (attempt {})",
            wire.request_id,
            wire.method,
            wire.url,
            request.retry_count() + 1
        );
        if verbose {
            log::info!(
                "Request #{} headers {:?}, body {} bytes, timeout {:?}",
                wire.request_id,
                wire.headers,
                wire.body.content_length(),
                wire.timeout
            );
        }

        let mock = &self.inner.mock;
        let download = request.download_target().cloned();
        let response = if mock.applies(request.mock_reference()) {
            let reference = request
                .mock_reference()
                .cloned()
                .unwrap_or_else(|| MockReference::new(request.path()));
            if let Some(delay) = request.mock_delay_with(|| mock.draw_delay()) {
                tokio::time::sleep(delay).await;
            }
            log::debug!("Request #{} served from mock `{}`", wire.request_id, reference.name);
            let response = mock.respond(&reference)?;
            match download {
                Some(target) if response.is_success() => {
                    target
                        .receive(StreamingResponse::from_response(response))
                        .await?
                }
                _ => response,
            }
        } else if let Some(target) = download {
            let stream = self
                .inner
                .transport
                .open_stream(wire)
                .await
                .map_err(EngineError::NetworkError)?;
            if stream.is_success() {
                target.receive(stream).await?
            } else {
                stream.collect().await.map_err(EngineError::NetworkError)?
            }
        } else {
            self.inner
                .transport
                .send(wire)
                .await
                .map_err(EngineError::NetworkError)?
        };

        if verbose {
            log::info!(
                "Request #{} response {} headers {:?}, body {} bytes",
                request.id(),
                response.status,
                response.headers,
                response.body.len()
            );
        }
        Ok(response)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field(
                "environment",
                &self.inner.environments.current().map(|env| env.name.clone()),
            )
            .field("defaults", &self.inner.defaults)
            .field("interceptors", &self.inner.interceptors)
            .field("mock", &self.inner.mock)
            .finish_non_exhaustive()
    }
}
