use std::sync::Arc;
use std::time::Duration;

use crate::error::EngineError;
use crate::interceptor::{Decision, Interceptor};
use crate::request::{Outcome, Request};

/// 有序的拦截器序列
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

/// 拦截器链遍历的结论
#[derive(Debug)]
pub enum Verdict {
    /// 链走完，结果原样交给调用方
    Continue,
    /// 某个拦截器要求重试
    Retry(Duration),
    /// 某个拦截器出错，请求以该错误结束
    Fail(EngineError),
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.push(Arc::new(interceptor));
        self
    }

    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// 依次遍历会话默认拦截器与请求自己的拦截器
    ///
    /// 第一个 `Retry` 立即结束遍历，其余拦截器本次不再被调用。
    pub async fn walk(&self, outcome: &Outcome, request: &mut Request) -> Verdict {
        let interceptors: Vec<Arc<dyn Interceptor>> = self
            .interceptors
            .iter()
            .chain(request.interceptors())
            .cloned()
            .collect();

        for (index, interceptor) in interceptors.iter().enumerate() {
            match interceptor.intercept(outcome, request).await {
                Ok(Decision::Continue) => continue,
                Ok(Decision::Retry(delay)) => {
                    log::debug!(
                        "Request #{} interceptor {} asked for retry after {:?}",
                        request.id(),
                        index,
                        delay
                    );
                    return Verdict::Retry(delay);
                }
                Err(e) => {
                    log::warn!("Request #{} interceptor {} failed: {:#}", request.id(), index, e);
                    return Verdict::Fail(EngineError::MiddlewareError {
                        context: format!("{:#}", e),
                    });
                }
            }
        }

        Verdict::Continue
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}
