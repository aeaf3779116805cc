use std::sync::Arc;

use crate::interceptor::Interceptor;
use crate::request::Request;
use crate::types::config::Configuration;
use crate::types::environment::{Environment, EnvironmentContext};
use crate::types::route::RouteResolver;

/// 一组端点共用的环境、配置覆盖与拦截器
///
/// 路由器的配置位于环境默认配置之上、单个路由配置之下；
/// 它的拦截器排在请求自己的拦截器之前。
#[derive(Clone, Default)]
pub struct Router {
    environment: Option<Arc<Environment>>,
    context: Option<Arc<EnvironmentContext>>,
    configuration: Option<Configuration>,
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// 固定使用某个环境，不跟随当前环境变化
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    pub fn with_context(mut self, context: Arc<EnvironmentContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// 固定环境优先，否则取上下文中的当前环境
    pub fn environment(&self) -> Option<Arc<Environment>> {
        self.environment
            .clone()
            .or_else(|| self.context.as_ref().and_then(|context| context.current()))
    }

    /// 解析路由值并构造请求
    pub fn request<R>(&self, route: &R) -> Request
    where
        R: RouteResolver + ?Sized,
    {
        Request::resolve(route, self.environment())
            .with_router_layer(self.configuration.clone(), &self.interceptors)
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field(
                "environment",
                &self.environment.as_ref().map(|env| env.name.as_str()),
            )
            .field("configuration", &self.configuration)
            .field("interceptors", &self.interceptors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::NoOpInterceptor;
    use crate::types::route::Route;
    use std::time::Duration;

    enum Api {
        Search(&'static str),
        Health,
    }

    impl RouteResolver for Api {
        fn resolve(&self, environment: Option<&Environment>) -> Route {
            match self {
                Api::Search(term) => Route::get("/search").param("q", *term),
                // 健康检查总是打到固定地址
                Api::Health => match environment {
                    Some(env) if env.name == "prod" => Route::get("https://status.example.com/health"),
                    _ => Route::get("/health"),
                },
            }
        }
    }

    #[test]
    fn test_router_binds_environment_and_layers() {
        let router = Router::new()
            .with_environment(Environment::new("prod", "https", "api.example.com"))
            .with_configuration(Configuration::default().with_timeout(Duration::from_secs(3)))
            .with_interceptor(NoOpInterceptor);

        let search = router.request(&Api::Search("rust"));
        assert_eq!(search.current_environment().unwrap().name, "prod");
        assert_eq!(search.params_ref().len(), 1);
        assert_eq!(search.interceptors().len(), 1);

        let health = router.request(&Api::Health);
        assert_eq!(health.path(), "https://status.example.com/health");
    }

    #[test]
    fn test_router_follows_context() {
        let context = Arc::new(EnvironmentContext::new());
        let router = Router::new().with_context(context.clone());
        assert!(router.environment().is_none());

        context.set_current(Arc::new(Environment::new("dev", "http", "localhost")));
        assert_eq!(router.request(&Api::Health).current_environment().unwrap().name, "dev");
    }
}
