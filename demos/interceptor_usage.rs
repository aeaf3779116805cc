use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use swan_engine::{
    Decision, EngineError, Environment, FailoverInterceptor, Interceptor, Outcome, Request,
    RetryInterceptor, Session,
};

/// 401 时刷新令牌并立即重试一次
struct TokenRefreshInterceptor {
    generation: AtomicU32,
}

impl TokenRefreshInterceptor {
    fn new() -> Self {
        Self {
            generation: AtomicU32::new(1),
        }
    }
}

#[async_trait]
impl Interceptor for TokenRefreshInterceptor {
    async fn intercept(&self, outcome: &Outcome, request: &mut Request) -> anyhow::Result<Decision> {
        if !matches!(outcome.error(), Some(EngineError::NotSuccess { status: 401 })) {
            return Ok(Decision::Continue);
        }
        if request.retry_count() > 0 {
            anyhow::bail!("token refresh did not help for request #{}", request.id());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        println!("🔑 刷新令牌，第 {} 代", generation);
        request.set_header("Authorization", format!("Bearer token-{}", generation));
        Ok(Decision::retry_now())
    }
}

/// 打印每次尝试的结果
struct LoggingInterceptor;

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(&self, outcome: &Outcome, request: &mut Request) -> anyhow::Result<Decision> {
        println!(
            "📋 #{} 第 {} 次尝试: status={:?} error={:?}",
            request.id(),
            request.retry_count() + 1,
            outcome.status(),
            outcome.error().map(|e| e.kind())
        );
        Ok(Decision::Continue)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("=== 拦截器示例 ===\n");

    let session = Session::builder()
        .environment(Environment::new("httpbin", "https", "httpbin.org"))
        .interceptor(LoggingInterceptor)
        .interceptor(RetryInterceptor::parse("exponential(3, 200ms)")?)
        .build()?;

    // 1. 会话级重试
    println!("1. 示例: 503 按指数退避重试");
    let completion = session.execute(Request::get("/status/503")).await;
    println!(
        "结果: {:?}，重试次数: {}\n",
        completion.error(),
        completion.request.retry_count()
    );

    // 2. 请求级拦截器
    println!("2. 示例: 401 刷新令牌");
    let request = Request::get("/status/401")
        .header("Authorization", "Bearer token-1")
        .interceptor(TokenRefreshInterceptor::new());
    let completion = session.execute(request).await;
    match completion.error() {
        Some(EngineError::MiddlewareError { context }) => println!("❌ 拦截器放弃: {}\n", context),
        other => println!("结果: {:?}\n", other),
    }

    // 3. 环境故障转移
    println!("3. 示例: 网络错误时切换环境");
    let backup = Environment::new("httpbin", "https", "httpbin.org");
    let broken = Environment::new("broken", "http", "127.0.0.1").with_port(9);
    let session = Session::builder()
        .environment(broken.clone())
        .interceptor(FailoverInterceptor::new([broken, backup]))
        .build()?;
    let completion = session.execute(Request::get("/get").param("from", "failover")).await;
    let served_by = completion
        .request
        .current_environment()
        .map(|env| env.name.clone());
    if completion.is_success() {
        println!("✅ 由环境 {:?} 完成", served_by);
    } else {
        println!("❌ 所有环境都失败: {:?}", completion.error());
    }

    println!("\n🎉 示例完成");
    Ok(())
}
