use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};
use swan_engine::{
    BodyType, Configuration, DownloadTarget, EngineError, MultipartPart, Progress, Request, Session,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 原始 TCP 响应器：记录收到的请求，对每个连接返回固定响应
struct RawServer {
    addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RawServer {
    async fn start(status: u16, body: Vec<u8>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind raw server");
        let addr = listener.local_addr().expect("read raw address");
        let accepted = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let (accepted_clone, received_clone) = (accepted.clone(), received.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted_clone.fetch_add(1, Ordering::SeqCst);
                let body = body.clone();
                let received = received_clone.clone();
                tokio::spawn(async move {
                    serve(stream, status, body, received).await;
                });
            }
        });

        Self {
            addr,
            accepted,
            received,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn accepted_count(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve(mut stream: TcpStream, status: u16, body: Vec<u8>, received: Arc<Mutex<Vec<Vec<u8>>>>) {
    let request = read_request(&mut stream).await;
    received.lock().unwrap().push(request);

    let head = format!(
        "HTTP/1.1 {} Test\r\ncontent-type: application/octet-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        status,
        body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&body).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 16 * 1024];
    loop {
        if let Some(end) = find_header_end(&buffer) {
            let length = parse_content_length(&buffer[..end]);
            if buffer.len() >= end + 4 + length {
                return buffer;
            }
        }
        let read = stream.read(&mut chunk).await.unwrap_or(0);
        if read == 0 {
            return buffer;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn parse_content_length(raw_headers: &[u8]) -> usize {
    String::from_utf8_lossy(raw_headers)
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

fn payload(len: usize) -> Vec<u8> {
    let mut rng = fastrand::Rng::with_seed(7);
    (0..len).map(|_| rng.u8(..)).collect()
}

#[tokio::test]
async fn download_streams_to_file_with_final_progress() {
    let body = payload(300 * 1024);
    let server = RawServer::start(200, body.clone()).await;
    let session = Session::new().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("payload.bin");
    let progress: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = progress.clone();

    let request = Request::get(server.url("/payload.bin")).download(
        DownloadTarget::new(&destination).with_progress(move |p| sink.lock().unwrap().push(p)),
    );
    let completion = session.execute(request).await;

    let response = completion.into_result().unwrap();
    assert_eq!(response.file.as_deref(), Some(destination.as_path()));

    let written = std::fs::read(&destination).unwrap();
    assert_eq!(hex::encode(Sha256::digest(&written)), hex::encode(Sha256::digest(&body)));

    let progress = progress.lock().unwrap();
    let last = progress.last().unwrap();
    assert_eq!(last.bytes_received, body.len() as u64);
    assert_eq!(last.bytes_total, body.len() as u64);
    assert_eq!(last.fraction, 1.0);
    assert!(progress.windows(2).all(|pair| pair[0].bytes_received <= pair[1].bytes_received));

    // 目录里只剩目标文件
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn invalid_destination_fails_before_any_connection() {
    let server = RawServer::start(200, b"unused".to_vec()).await;
    let session = Session::new().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let completion = session
        .execute(Request::get(server.url("/file")).download_to(dir.path().join("missing/dir/file")))
        .await;
    assert!(matches!(completion.error(), Some(EngineError::InvalidFileUrl { .. })));

    let completion = session
        .execute(Request::get(server.url("/file")).download_to(dir.path()))
        .await;
    assert!(matches!(completion.error(), Some(EngineError::InvalidFileUrl { .. })));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.accepted_count(), 0);
}

#[tokio::test]
async fn failed_download_leaves_no_file() {
    let server = RawServer::start(404, b"not here".to_vec()).await;
    let session = Session::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("file.bin");

    let completion = session
        .execute(Request::get(server.url("/missing")).download_to(&destination))
        .await;

    assert!(matches!(completion.error(), Some(EngineError::NotSuccess { status: 404 })));
    assert_eq!(completion.response().unwrap().text().unwrap(), "not here");
    assert!(!destination.exists());
}

#[tokio::test]
async fn multipart_declared_length_matches_bytes_on_the_wire() {
    let server = RawServer::start(200, b"stored".to_vec()).await;
    let session = Session::new().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let attachment = dir.path().join("report.bin");
    std::fs::write(&attachment, payload(100 * 1024)).unwrap();

    let request = Request::post(server.url("/upload"))
        .configuration(Configuration::default().with_body_type(BodyType::Multipart))
        .param("title", "quarterly")
        .param("report", MultipartPart::file(&attachment).with_content_type("application/octet-stream"));
    let completion = session.execute(request).await;
    assert!(completion.is_success());

    let received = server.received.lock().unwrap();
    let raw = &received[0];
    let end = find_header_end(raw).unwrap();
    let declared = parse_content_length(&raw[..end]);
    let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();

    assert!(head.contains("content-type: multipart/form-data; boundary="));
    assert_eq!(raw.len() - (end + 4), declared);
    assert!(declared > 100 * 1024);
}

#[tokio::test]
async fn get_params_travel_in_query_string() {
    let server = RawServer::start(200, b"{}".to_vec()).await;
    let session = Session::new().unwrap();

    let completion = session
        .execute(
            Request::get(server.url("/search"))
                .param("q", "swan engine")
                .param("page", 2),
        )
        .await;
    assert!(completion.is_success());

    let received = server.received.lock().unwrap();
    let request_line = String::from_utf8_lossy(&received[0]).lines().next().unwrap().to_string();
    assert_eq!(request_line, "GET /search?q=swan+engine&page=2 HTTP/1.1");
}
