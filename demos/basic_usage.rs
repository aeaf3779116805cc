use serde::{Deserialize, Serialize};
use swan_engine::{
    Configuration, Environment, FailureMode, HttpMethod, Request, Route, RouteResolver, Session,
};
use std::time::Duration;

/// 用户数据结构
#[derive(Debug, Serialize, Deserialize)]
struct User {
    id: u32,
    name: String,
    email: String,
}

/// JSONPlaceholder 的端点
enum UserApi {
    List,
    Profile(u32),
    Create { name: String, email: String },
    Remove(u32),
}

impl RouteResolver for UserApi {
    fn resolve(&self, _environment: Option<&Environment>) -> Route {
        match self {
            UserApi::List => Route::get("/users"),
            UserApi::Profile(id) => Route::get(format!("/users/{}", id)),
            UserApi::Create { name, email } => Route::post("/users")
                .param("name", name.as_str())
                .param("email", email.as_str()),
            UserApi::Remove(id) => Route::new(HttpMethod::Delete, format!("/users/{}", id)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("=== Swan Engine 基础示例 ===\n");

    let environment = Environment::new("placeholder", "https", "jsonplaceholder.typicode.com")
        .with_configuration(Configuration::default().with_timeout(Duration::from_secs(10)));
    let session = Session::builder().environment(environment).build()?;

    // 1. 单个请求
    println!("1. 示例: 获取单个用户");
    let completion = session.execute(session.request(&UserApi::Profile(1))).await;
    match completion.into_result() {
        Ok(response) => {
            let user: User = response.json()?;
            println!("✅ 获取用户成功: #{} {} <{}>", user.id, user.name, user.email);
        }
        Err(e) => println!("❌ 获取用户失败: {}", e),
    }

    // 2. 队列批量执行
    println!("\n2. 示例: 队列批量获取 (max_concurrent = 2)");
    let queue = session.queue().max_concurrent(2).build();
    let handles: Vec<_> = (1..=5)
        .map(|id| queue.add_operation(session.request(&UserApi::Profile(id))))
        .collect();
    for handle in handles {
        let completion = handle.await?;
        let request = &completion.request;
        match completion.response() {
            Some(response) if completion.is_success() => println!(
                "✅ #{} {} -> {} ({:?})",
                request.id(),
                request.path(),
                response.status,
                request.duration().unwrap_or_default()
            ),
            _ => println!("❌ #{} 失败: {:?}", request.id(), completion.error()),
        }
    }

    // 3. 创建与删除
    println!("\n3. 示例: 创建并删除用户");
    let create = UserApi::Create {
        name: "Swan".to_string(),
        email: "swan@example.com".to_string(),
    };
    let completion = session.execute(session.request(&create)).await;
    println!("创建结果状态码: {:?}", completion.response().map(|r| r.status));

    let completion = session.execute(session.request(&UserApi::Remove(1))).await;
    println!("删除结果状态码: {:?}", completion.response().map(|r| r.status));

    // 4. 失败策略
    println!("\n4. 示例: CancelAll 失败策略");
    let strict = session
        .queue()
        .max_concurrent(1)
        .failure_mode(FailureMode::CancelAll)
        .build();
    let missing = strict.add_operation(Request::get("/users/0/not-found"));
    let following = strict.add_operation(session.request(&UserApi::List));
    println!("第一个请求: {:?}", missing.await?.error());
    println!("后续请求: {:?}", following.await?.error());

    println!("\n🎉 示例完成");
    Ok(())
}
