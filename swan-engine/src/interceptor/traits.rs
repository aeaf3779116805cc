use std::time::Duration;

use async_trait::async_trait;

use crate::request::{Outcome, Request};

/// 拦截器对一次尝试结果的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 结果原样交给下一个拦截器
    Continue,
    /// 停止遍历，等待给定时长后重新执行该请求
    Retry(Duration),
}

impl Decision {
    pub fn retry_now() -> Self {
        Decision::Retry(Duration::ZERO)
    }
}

/// Swan 拦截器接口
///
/// 每次执行过的尝试（包括成功）都会按顺序经过拦截器链。
/// 拦截器可以在返回 [`Decision::Retry`] 之前修改请求，例如切换环境或刷新头部，
/// 修改在下一次尝试中生效。
///
/// 链本身不限制重试次数，拦截器应自行比较 [`Request::retry_count`]。
/// 返回 `Err` 会终止拦截器链，请求以 `MiddlewareError` 失败。
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// 处理一次尝试的结果
    ///
    /// # 参数
    /// - `outcome`: 本次尝试的结果（成功响应或分类后的错误）
    /// - `request`: 可变的请求，`retry_count` 为已经发生的重试次数
    async fn intercept(&self, outcome: &Outcome, request: &mut Request) -> anyhow::Result<Decision>;
}

/// 空拦截器，总是放行
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpInterceptor;

#[async_trait]
impl Interceptor for NoOpInterceptor {
    async fn intercept(&self, _outcome: &Outcome, _request: &mut Request) -> anyhow::Result<Decision> {
        Ok(Decision::Continue)
    }
}
