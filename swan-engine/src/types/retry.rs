use std::time::Duration;

use serde::Deserialize;

use crate::types::http::HttpMethod;

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次请求）
    pub max_attempts: u32,
    /// 基础延迟时间（毫秒）
    pub base_delay_ms: u64,
    /// 最大延迟时间（毫秒）
    pub max_delay_ms: u64,
    /// 指数底数
    pub exponential_base: f64,
    /// 随机抖动比例 (0.0-1.0)
    pub jitter_ratio: f64,
    /// 仅对幂等方法重试
    pub idempotent_only: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 30000, // 30秒
            exponential_base: 2.0,
            jitter_ratio: 0.1,
            idempotent_only: true,
        }
    }
}

impl RetryPolicy {
    /// 创建指数重试策略
    pub fn exponential(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            ..Default::default()
        }
    }

    /// 创建固定延迟重试策略
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            exponential_base: 1.0,
            jitter_ratio: 0.0,
            idempotent_only: true,
        }
    }

    pub fn allow_non_idempotent(mut self) -> Self {
        self.idempotent_only = false;
        self
    }

    /// 计算第 `attempt` 次重试前的延迟时间
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        // 指数退避: base_delay * exponential_base^(attempt-1)
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let exponential_delay = self.base_delay_ms as f64 * self.exponential_base.powi(exponent);

        // 应用最大延迟限制
        let capped_delay = exponential_delay.min(self.max_delay_ms as f64);

        // 添加随机抖动
        let jitter = if self.jitter_ratio > 0.0 {
            let max_jitter = capped_delay * self.jitter_ratio;
            fastrand::f64() * max_jitter
        } else {
            0.0
        };

        Duration::from_millis((capped_delay + jitter) as u64)
    }

    /// 判断HTTP状态码是否应该重试
    pub fn should_retry_status(&self, status: u16) -> bool {
        match status {
            // 5xx 服务器错误 - 应该重试
            500..=599 => true,
            // 429 限流 - 应该重试
            429 => true,
            // 408 请求超时 - 应该重试
            408 => true,
            // 其他状态码不重试
            _ => false,
        }
    }

    /// 已经重试 `retry_count` 次之后是否还允许再试一次
    pub fn has_attempts_left(&self, retry_count: u32) -> bool {
        retry_count.saturating_add(1) < self.max_attempts
    }

    /// 该方法在当前策略下是否允许重试
    pub fn permits_method(&self, method: HttpMethod) -> bool {
        !self.idempotent_only || method.is_idempotent()
    }

    /// 从字符串解析重试策略
    ///
    /// 支持格式:
    /// - "exponential(max_attempts=3, base_delay=100ms)"
    /// - "fixed(max_attempts=5, delay=200ms)"
    /// - "exponential(3, 100ms)" // 简化格式
    pub fn parse(config: &str) -> Result<Self, String> {
        let config = config.trim();

        if let Some(params) = config
            .strip_prefix("exponential(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Self::parse_exponential_config(params)
        } else if let Some(params) = config
            .strip_prefix("fixed(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            Self::parse_fixed_config(params)
        } else {
            Err(format!("Unsupported retry config format: {}", config))
        }
    }

    fn parse_exponential_config(params: &str) -> Result<RetryPolicy, String> {
        let mut policy = RetryPolicy::default();
        let mut positional = 0;

        for param in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = param.split_once('=') else {
                // 简化格式：exponential(3, 100ms)
                match positional {
                    0 => {
                        policy.max_attempts = param
                            .parse()
                            .map_err(|_| format!("Invalid max_attempts: {}", param))?;
                    }
                    1 => policy.base_delay_ms = Self::parse_duration(param)?,
                    _ => return Err(format!("Unexpected positional parameter: {}", param)),
                }
                positional += 1;
                continue;
            };

            let (key, value) = (key.trim(), value.trim());
            match key {
                "max_attempts" => {
                    policy.max_attempts = value
                        .parse()
                        .map_err(|_| format!("Invalid max_attempts: {}", value))?;
                }
                "base_delay" => {
                    policy.base_delay_ms = Self::parse_duration(value)?;
                }
                "max_delay" => {
                    policy.max_delay_ms = Self::parse_duration(value)?;
                }
                "exponential_base" => {
                    policy.exponential_base = value
                        .parse()
                        .map_err(|_| format!("Invalid exponential_base: {}", value))?;
                }
                "jitter_ratio" => {
                    policy.jitter_ratio = value
                        .parse()
                        .map_err(|_| format!("Invalid jitter_ratio: {}", value))?;
                }
                "idempotent_only" => {
                    policy.idempotent_only = value
                        .parse()
                        .map_err(|_| format!("Invalid idempotent_only: {}", value))?;
                }
                _ => return Err(format!("Unknown parameter: {}", key)),
            }
        }

        Ok(policy)
    }

    fn parse_fixed_config(params: &str) -> Result<RetryPolicy, String> {
        let mut policy = RetryPolicy::fixed(RetryPolicy::default().max_attempts, 0);

        for (key, value) in Self::key_values(params)? {
            match key {
                "max_attempts" => {
                    policy.max_attempts = value
                        .parse()
                        .map_err(|_| format!("Invalid max_attempts: {}", value))?;
                }
                "delay" => {
                    let delay = Self::parse_duration(value)?;
                    policy.base_delay_ms = delay;
                    policy.max_delay_ms = delay;
                }
                "idempotent_only" => {
                    policy.idempotent_only = value
                        .parse()
                        .map_err(|_| format!("Invalid idempotent_only: {}", value))?;
                }
                _ => return Err(format!("Unknown parameter: {}", key)),
            }
        }

        Ok(policy)
    }

    fn key_values(params: &str) -> Result<Vec<(&str, &str)>, String> {
        params
            .split(',')
            .map(str::trim)
            .filter(|param| !param.is_empty())
            .map(|param| {
                param
                    .split_once('=')
                    .map(|(key, value)| (key.trim(), value.trim()))
                    .ok_or_else(|| format!("Expected key=value, got: {}", param))
            })
            .collect()
    }

    fn parse_duration(duration_str: &str) -> Result<u64, String> {
        let duration_str = duration_str.trim();

        if let Some(millis) = duration_str.strip_suffix("ms") {
            millis
                .parse()
                .map_err(|_| format!("Invalid milliseconds: {}", duration_str))
        } else if let Some(seconds) = duration_str.strip_suffix('s') {
            let seconds: u64 = seconds
                .parse()
                .map_err(|_| format!("Invalid seconds: {}", duration_str))?;
            Ok(seconds * 1000)
        } else {
            // 默认按毫秒处理
            duration_str.parse().map_err(|_| {
                format!(
                    "Invalid duration (expected ms or s suffix): {}",
                    duration_str
                )
            })
        }
    }
}

impl TryFrom<String> for RetryPolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RetryPolicy::parse(&value)
    }
}

impl std::str::FromStr for RetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetryPolicy::parse(s)
    }
}


// 引入详细测试模块
#[cfg(test)]
#[path = "retry_test.rs"]
mod comprehensive_retry_tests;
