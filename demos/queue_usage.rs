use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use swan_engine::{
    Configuration, Environment, FailureMode, QueueHooks, Request, RetryInterceptor, Session,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("=== 队列调度示例 ===\n");

    let session = Session::builder()
        .environment(Environment::new("httpbin", "https", "httpbin.org"))
        .default_configuration(Configuration::default().with_timeout(Duration::from_secs(15)))
        .interceptor(RetryInterceptor::parse("fixed(max_attempts=2, delay=300ms)")?)
        .build()?;

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let hooks = QueueHooks::new()
        .before_all(|| println!("▶️ 队列开始处理"))
        .before_each(move |request| {
            counter.fetch_add(1, Ordering::SeqCst);
            println!("  → #{} {} {}", request.id(), request.method().as_str(), request.path());
        })
        .after_each(|request, outcome| {
            println!("  ← #{} status={:?}", request.id(), outcome.status());
        })
        .after_all(|with_error| {
            if with_error {
                println!("⏹️ 队列排空，存在失败的请求");
            } else {
                println!("⏹️ 队列排空，全部成功");
            }
        });

    // 1. 有界并发
    println!("1. 示例: 6 个延迟请求，最多同时运行 3 个");
    let queue = session.queue().max_concurrent(3).hooks(hooks.clone()).build();
    let handles: Vec<_> = (0..6)
        .map(|i| queue.add_operation(Request::get("/delay/1").param("index", i)))
        .collect();
    println!(
        "运行中: {}，等待中: {}",
        queue.running_count(),
        queue.pending_count()
    );
    for handle in handles {
        let completion = handle.await?;
        println!(
            "✅ #{} 用时 {:?}",
            completion.request.id(),
            completion.request.duration().unwrap_or_default()
        );
    }
    println!("共发起 {} 次尝试\n", attempts.load(Ordering::SeqCst));

    // 2. 单个取消
    println!("2. 示例: 取消仍在等待的请求");
    let queue = session.queue().max_concurrent(1).hooks(hooks.clone()).build();
    let first = queue.add_operation(Request::get("/delay/1"));
    let second = queue.add_operation(Request::get("/delay/1"));
    second.cancel();
    println!("第一个: 成功={}", first.await?.is_success());
    println!("第二个: {:?}\n", second.await?.error());

    // 3. 失败即全部取消
    println!("3. 示例: CancelAll");
    let queue = session
        .queue()
        .max_concurrent(2)
        .failure_mode(FailureMode::CancelAll)
        .hooks(hooks)
        .build();
    let handles = vec![
        queue.add_operation(Request::get("/status/404")),
        queue.add_operation(Request::get("/delay/2")),
        queue.add_operation(Request::get("/delay/2")),
    ];
    for handle in handles {
        let completion = handle.await?;
        println!("#{}: {:?}", completion.request.id(), completion.error());
    }

    println!("\n🎉 示例完成");
    Ok(())
}
