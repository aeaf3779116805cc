use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::interceptor::{Decision, Interceptor};
use crate::request::{Outcome, Request};
use crate::types::environment::Environment;
use crate::types::retry::RetryPolicy;

/// 按 [`RetryPolicy`] 重试网络错误与可重试状态码（408/429/5xx）
///
/// `max_attempts` 是总尝试次数，`max_attempts = L + 1` 时最多重试 `L` 次。
#[derive(Debug, Clone)]
pub struct RetryInterceptor {
    policy: RetryPolicy,
}

impl RetryInterceptor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// 从紧凑字符串构造，例如 `"exponential(3, 100ms)"`
    pub fn parse(config: &str) -> anyhow::Result<Self> {
        let policy = RetryPolicy::parse(config).map_err(anyhow::Error::msg)?;
        Ok(Self::new(policy))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn is_retryable(&self, error: &EngineError) -> bool {
        match error {
            EngineError::NetworkError(_) => true,
            EngineError::NotSuccess { status } => self.policy.should_retry_status(*status),
            _ => false,
        }
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    async fn intercept(&self, outcome: &Outcome, request: &mut Request) -> anyhow::Result<Decision> {
        let Some(error) = outcome.error() else {
            return Ok(Decision::Continue);
        };

        if !self.is_retryable(error)
            || !self.policy.permits_method(request.method())
            || !self.policy.has_attempts_left(request.retry_count())
        {
            return Ok(Decision::Continue);
        }

        let delay = self.policy.calculate_delay(request.retry_count() + 1);
        log::warn!(
            "Request #{} failed with {}, retrying attempt {}/{} after {:?}",
            request.id(),
            error,
            request.retry_count() + 2,
            self.policy.max_attempts,
            delay
        );
        Ok(Decision::Retry(delay))
    }
}

/// 网络错误时切换到下一个环境并立即重试，直到环境列表用完
#[derive(Debug, Clone)]
pub struct FailoverInterceptor {
    environments: Vec<Arc<Environment>>,
}

impl FailoverInterceptor {
    pub fn new<I>(environments: I) -> Self
    where
        I: IntoIterator<Item = Environment>,
    {
        Self {
            environments: environments.into_iter().map(Arc::new).collect(),
        }
    }

    fn next_after(&self, current: Option<&Arc<Environment>>) -> Option<Arc<Environment>> {
        let position = current.and_then(|current| {
            self.environments
                .iter()
                .position(|candidate| candidate.name == current.name)
        });
        let next = match position {
            Some(index) => index + 1,
            None => 0,
        };
        self.environments.get(next).cloned()
    }
}

#[async_trait]
impl Interceptor for FailoverInterceptor {
    async fn intercept(&self, outcome: &Outcome, request: &mut Request) -> anyhow::Result<Decision> {
        if !matches!(outcome.error(), Some(EngineError::NetworkError(_))) {
            return Ok(Decision::Continue);
        }
        if crate::types::route::is_absolute_path(request.path()) {
            return Ok(Decision::Continue);
        }

        match self.next_after(request.current_environment()) {
            Some(next) => {
                log::warn!(
                    "Request #{} failing over to environment `{}`",
                    request.id(),
                    next.name
                );
                request.set_environment(next);
                Ok(Decision::retry_now())
            }
            None => Ok(Decision::Continue),
        }
    }
}
