use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::error::{EngineError, EngineResult};
use crate::response::Response;
use crate::transport::StreamingResponse;

/// 下载进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub bytes_received: u64,
    /// 总长度；服务端未声明时在下载过程中为 0，结束时等于已接收字节数
    pub bytes_total: u64,
    /// 完成比例 0.0 ~ 1.0
    pub fraction: f64,
}

impl Progress {
    fn new(bytes_received: u64, bytes_total: Option<u64>) -> Self {
        match bytes_total {
            Some(total) if total > 0 => Self {
                bytes_received,
                bytes_total: total,
                fraction: (bytes_received as f64 / total as f64).min(1.0),
            },
            _ => Self {
                bytes_received,
                bytes_total: 0,
                fraction: 0.0,
            },
        }
    }

    fn complete(bytes_received: u64) -> Self {
        Self {
            bytes_received,
            bytes_total: bytes_received,
            fraction: 1.0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }
}

pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// 下载目标：落盘路径与可选的进度回调
#[derive(Clone)]
pub struct DownloadTarget {
    pub destination: PathBuf,
    pub progress: Option<ProgressCallback>,
}

impl DownloadTarget {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            progress: None,
        }
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    fn report(&self, progress: Progress) {
        if let Some(callback) = &self.progress {
            callback(progress);
        }
    }

    /// 在请求发出前校验落盘路径
    ///
    /// 路径为空、指向目录，或父目录不存在时返回 [`EngineError::InvalidFileUrl`]。
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = || EngineError::InvalidFileUrl {
            path: self.destination.clone(),
        };

        if self.destination.as_os_str().is_empty() || self.destination.is_dir() {
            return Err(invalid());
        }
        if self.destination.file_name().is_none() {
            return Err(invalid());
        }
        if !self.parent_dir().is_dir() {
            return Err(invalid());
        }
        Ok(())
    }

    fn parent_dir(&self) -> &Path {
        match self.destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// 接收响应流并原子地落盘
    ///
    /// 数据先写入同目录下的临时文件，全部写完后再替换目标文件；
    /// 任何失败都会删除临时文件，不留下残缺的目标文件。
    pub(crate) async fn receive(&self, response: StreamingResponse) -> EngineResult<Response> {
        let StreamingResponse {
            status,
            headers,
            content_length,
            mut body,
        } = response;

        let temp = tempfile::Builder::new()
            .prefix(".swan-download-")
            .tempfile_in(self.parent_dir())
            .map_err(EngineError::file_save)?;
        let (file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut received: u64 = 0;
        let mut reported_complete = false;
        while let Some(chunk) = body.next().await {
            let chunk: Bytes = chunk.map_err(EngineError::NetworkError)?;
            file.write_all(&chunk).await.map_err(EngineError::file_save)?;
            received += chunk.len() as u64;

            let progress = Progress::new(received, content_length);
            reported_complete = content_length == Some(received) && received > 0;
            self.report(progress);
        }

        file.flush().await.map_err(EngineError::file_save)?;
        file.sync_all().await.map_err(EngineError::file_save)?;
        drop(file);

        if !reported_complete {
            self.report(Progress::complete(received));
        }

        temp_path
            .persist(&self.destination)
            .map_err(|e| EngineError::file_save(e.error))?;

        log::debug!(
            "Downloaded {} bytes to {}",
            received,
            self.destination.display()
        );

        Ok(Response {
            status,
            headers,
            body: Bytes::new(),
            file: Some(self.destination.clone()),
        })
    }
}

impl std::fmt::Debug for DownloadTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadTarget")
            .field("destination", &self.destination)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TransportError, TransportErrorKind};
    use futures_util::stream;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn chunked(chunks: Vec<Result<Bytes, TransportError>>, content_length: Option<u64>) -> StreamingResponse {
        StreamingResponse {
            status: 200,
            headers: BTreeMap::new(),
            content_length,
            body: stream::iter(chunks).boxed(),
        }
    }

    #[test]
    fn test_validate_destination() {
        let dir = tempfile::tempdir().unwrap();

        assert!(DownloadTarget::new("").validate().is_err());
        assert!(DownloadTarget::new(dir.path()).validate().is_err());
        assert!(DownloadTarget::new(dir.path().join("missing/file.bin")).validate().is_err());
        assert!(DownloadTarget::new(dir.path().join("file.bin")).validate().is_ok());
    }

    #[tokio::test]
    async fn test_receive_reports_progress_without_declared_length() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.bin");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let target = DownloadTarget::new(&destination)
            .with_progress(move |progress| sink.lock().unwrap().push(progress));

        let response = chunked(
            vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"swan"))],
            None,
        );
        let result = target.receive(response).await.unwrap();

        assert_eq!(result.file.as_deref(), Some(destination.as_path()));
        assert_eq!(std::fs::read(&destination).unwrap(), b"hello swan");

        let seen = seen.lock().unwrap();
        let last = seen.last().unwrap();
        assert_eq!(last.bytes_received, 10);
        assert_eq!(last.bytes_total, 10);
        assert_eq!(last.fraction, 1.0);
    }

    #[tokio::test]
    async fn test_failed_stream_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("out.bin");
        std::fs::write(&destination, b"previous").unwrap();

        let response = chunked(
            vec![
                Ok(Bytes::from_static(b"partial")),
                Err(TransportError::new(TransportErrorKind::Read, "connection reset")),
            ],
            Some(100),
        );
        let result = DownloadTarget::new(&destination).receive(response).await;

        assert!(matches!(result, Err(EngineError::NetworkError(_))));
        // 原文件保持不变，临时文件已清理
        assert_eq!(std::fs::read(&destination).unwrap(), b"previous");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
