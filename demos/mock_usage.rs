use serde::Deserialize;
use std::time::Duration;
use swan_engine::{
    EngineError, Environment, MockEngine, MockReference, MockRegistry, Request, Route,
    RouteResolver, Session,
};

#[derive(Debug, Deserialize)]
struct Profile {
    id: u32,
    nickname: String,
}

enum AccountApi {
    Profile(u32),
    Banned,
}

impl RouteResolver for AccountApi {
    fn resolve(&self, _environment: Option<&Environment>) -> Route {
        match self {
            AccountApi::Profile(id) => Route::get(format!("/accounts/{}", id))
                .mock(MockReference::new("profile").with_header("x-mock", "true")),
            AccountApi::Banned => Route::get("/accounts/banned")
                .mock(MockReference::new("banned").with_status(403)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("=== Mock 示例（无需网络） ===\n");

    let registry = MockRegistry::new()
        .with("profile", r#"{"id": 7, "nickname": "swan"}"#)
        .with("banned", r#"{"reason": "suspended"}"#)
        .with("/health", "ok");

    let session = Session::builder()
        .environment(Environment::new("offline", "https", "api.invalid"))
        .mock_engine(
            MockEngine::new(registry).with_delay(Duration::from_millis(20), Duration::from_millis(80)),
        )
        .build()?;

    // 1. 路由自带 mock 引用
    println!("1. 示例: 带 mock 引用的路由");
    let completion = session.execute(session.request(&AccountApi::Profile(7))).await;
    let response = completion.into_result()?;
    let profile: Profile = response.json()?;
    println!(
        "✅ 账户 {} 的昵称是 {}，x-mock={:?}",
        profile.id,
        profile.nickname,
        response.header("x-mock")
    );

    // 2. mock 状态码同样参与分类
    println!("\n2. 示例: mock 返回 403");
    let completion = session.execute(session.request(&AccountApi::Banned)).await;
    if let Some(EngineError::NotSuccess { status }) = completion.error() {
        let body = completion.response().and_then(|r| r.text().ok()).unwrap_or_default();
        println!("❌ 状态码 {}，响应体: {}", status, body);
    }

    // 3. 强制 mock：没有引用时按路径查找
    println!("\n3. 示例: 强制 mock 模式");
    let forced = Session::builder()
        .environment(Environment::new("offline", "https", "api.invalid"))
        .mock_engine(MockEngine::new(MockRegistry::new().with("/health", "ok")).forced(true))
        .build()?;
    let completion = forced.execute(Request::get("/health")).await;
    println!("健康检查: {:?}", completion.response().map(|r| r.text().ok().map(str::to_owned)));

    let completion = forced.execute(Request::get("/unknown")).await;
    println!("未登记的路径: {:?}", completion.error());

    println!("\n🎉 示例完成");
    Ok(())
}
