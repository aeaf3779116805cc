use std::time::Duration;
use swan_engine::{Configuration, DownloadTarget, Environment, Request, Session};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    println!("=== 下载示例 ===\n");

    let session = Session::builder()
        .environment(
            Environment::new("httpbin", "https", "httpbin.org")
                .with_configuration(Configuration::default().with_timeout(Duration::from_secs(30))),
        )
        .build()?;

    let destination = std::env::temp_dir().join("swan-engine-demo.bin");

    // 1. 带进度的下载
    println!("1. 示例: 下载 256 KiB 到 {}", destination.display());
    let target = DownloadTarget::new(&destination).with_progress(|progress| {
        if progress.is_complete() {
            println!("  进度: 100% ({} 字节)", progress.bytes_received);
        } else if progress.bytes_total > 0 {
            println!("  进度: {:.0}%", progress.fraction * 100.0);
        }
    });
    let completion = session.execute(Request::get("/bytes/262144").download(target)).await;
    match completion.into_result() {
        Ok(response) => println!("✅ 已保存到 {:?}", response.file),
        Err(e) => println!("❌ 下载失败: {}", e),
    }

    // 2. 失败的下载不会留下文件
    println!("\n2. 示例: 下载 404");
    let missing = std::env::temp_dir().join("swan-engine-missing.bin");
    let completion = session.execute(Request::get("/status/404").download_to(&missing)).await;
    println!("错误: {:?}，文件存在: {}", completion.error(), missing.exists());

    // 3. 目标目录不存在时不会发起连接
    println!("\n3. 示例: 非法的落盘路径");
    let completion = session
        .execute(Request::get("/bytes/16").download_to("/definitely/not/here/file.bin"))
        .await;
    println!("错误: {:?}", completion.error());

    let _ = std::fs::remove_file(&destination);
    println!("\n🎉 示例完成");
    Ok(())
}
