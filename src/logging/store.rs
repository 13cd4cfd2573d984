use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::config::RemoteLogConfig;
use crate::error::{AppError, Result};

/// Where execution logs and cost records live.
///
/// `append` returns once the text is on disk (local) or queued for a
/// background writer (remote). Queued writes that later fail are reported
/// through `tracing` and never reach the caller.
#[async_trait]
pub trait LogStore: Send + Sync {
    fn append(&self, key: &str, text: &str) -> Result<()>;

    /// Remote stores cannot answer this cheaply and always return `true`.
    fn exists(&self, key: &str) -> bool;

    async fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the whole object.
    async fn write(&self, key: &str, content: &str) -> Result<()>;

    /// Wait, at most `timeout`, for queued writes to land.
    async fn flush(&self, timeout: Duration);
}

/// Append-only files under one directory.
#[derive(Debug, Clone)]
pub struct LocalLogStore {
    dir: PathBuf,
}

impl LocalLogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl LogStore for LocalLogStore {
    fn append(&self, key: &str, text: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(key))?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }

    fn exists(&self, key: &str) -> bool {
        self.path(key).exists()
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, content: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path(key);
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) {}
}

enum LogOp {
    Append {
        key: String,
        text: String,
    },
    Write {
        key: String,
        content: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Read {
        key: String,
        reply: oneshot::Sender<Result<Option<String>>>,
    },
    Flush(oneshot::Sender<()>),
}

/// Object-store backed logs (`PUT`/`GET {base_url}/{prefix}/{key}`).
///
/// A single background task owns the HTTP client and an in-memory copy of
/// every object it has touched, so appends for one key are applied in order.
/// Appends that cannot be uploaded are written to the local fallback store
/// instead.
pub struct RemoteLogStore {
    tx: mpsc::UnboundedSender<LogOp>,
    failed: Arc<AtomicU64>,
}

impl RemoteLogStore {
    pub fn new(config: &RemoteLogConfig, fallback: LocalLogStore) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(AppError::Config(
                "logging.remote.base_url is required when remote logging is enabled".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let failed = Arc::new(AtomicU64::new(0));
        let (tx, rx) = mpsc::unbounded_channel();

        let writer = RemoteWriter {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            prefix: config.prefix.trim_matches('/').to_string(),
            token: config.token.clone(),
            objects: HashMap::new(),
            fallback,
            failed: Arc::clone(&failed),
        };
        tokio::spawn(writer.run(rx));

        Ok(Self { tx, failed })
    }

    /// Appends that could not be uploaded since startup.
    pub fn failed_writes(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn send(&self, op: LogOp) -> Result<()> {
        self.tx
            .send(op)
            .map_err(|_| AppError::Store("remote log writer has stopped".to_string()))
    }
}

#[async_trait]
impl LogStore for RemoteLogStore {
    fn append(&self, key: &str, text: &str) -> Result<()> {
        self.send(LogOp::Append {
            key: key.to_string(),
            text: text.to_string(),
        })
    }

    fn exists(&self, _key: &str) -> bool {
        true
    }

    async fn read(&self, key: &str) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(LogOp::Read {
            key: key.to_string(),
            reply,
        })?;
        rx.await
            .map_err(|_| AppError::Store("remote log writer dropped a read".to_string()))?
    }

    async fn write(&self, key: &str, content: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(LogOp::Write {
            key: key.to_string(),
            content: content.to_string(),
            reply,
        })?;
        rx.await
            .map_err(|_| AppError::Store("remote log writer dropped a write".to_string()))?
    }

    async fn flush(&self, timeout: Duration) {
        let (reply, rx) = oneshot::channel();
        if self.send(LogOp::Flush(reply)).is_err() {
            return;
        }
        if tokio::time::timeout(timeout, rx).await.is_err() {
            tracing::warn!(timeout_secs = timeout.as_secs(), "Timed out flushing remote logs");
        }
    }
}

struct RemoteWriter {
    client: reqwest::Client,
    base_url: String,
    prefix: String,
    token: Option<String>,
    objects: HashMap<String, String>,
    fallback: LocalLogStore,
    failed: Arc<AtomicU64>,
}

impl RemoteWriter {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<LogOp>) {
        while let Some(op) = rx.recv().await {
            match op {
                LogOp::Append { key, text } => {
                    if let Err(e) = self.append(&key, &text).await {
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(key = %key, error = %e, "Remote log write failed, writing locally");
                        if let Err(e) = self.fallback.append(&key, &text) {
                            tracing::warn!(key = %key, error = %e, "Local log fallback failed");
                        }
                    }
                }
                LogOp::Write { key, content, reply } => {
                    let result = self.put(&key, &content).await;
                    if result.is_ok() {
                        self.objects.insert(key, content);
                    }
                    let _ = reply.send(result);
                }
                LogOp::Read { key, reply } => {
                    let result = match self.objects.get(&key) {
                        Some(content) => Ok(Some(content.clone())),
                        None => self.get(&key).await,
                    };
                    let _ = reply.send(result);
                }
                LogOp::Flush(reply) => {
                    let _ = reply.send(());
                }
            }
        }
    }

    fn url(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            format!("{}/{key}", self.base_url)
        } else {
            format!("{}/{}/{key}", self.base_url, self.prefix)
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn append(&mut self, key: &str, text: &str) -> Result<()> {
        let mut content = match self.objects.get(key) {
            Some(content) => content.clone(),
            None => self.get(key).await?.unwrap_or_default(),
        };
        content.push_str(text);
        self.put(key, &content).await?;
        self.objects.insert(key.to_string(), content);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self.authorize(self.client.get(self.url(key))).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status()?;
        Ok(Some(response.text().await?))
    }

    async fn put(&self, key: &str, content: &str) -> Result<()> {
        self.authorize(self.client.put(self.url(key)))
            .header(reqwest::header::CONTENT_TYPE, content_type(key))
            .body(content.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn content_type(key: &str) -> &'static str {
    if key.ends_with(".json") {
        "application/json"
    } else {
        "text/markdown; charset=utf-8"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalLogStore::new(dir.path().join("logs"));

        assert!(!store.exists("issue-1.md"));
        store.append("issue-1.md", "one\n").unwrap();
        store.append("issue-1.md", "two\n").unwrap();
        assert!(store.exists("issue-1.md"));
        assert_eq!(store.read("issue-1.md").await.unwrap().as_deref(), Some("one\ntwo\n"));
        assert_eq!(store.read("issue-2.md").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_local_write_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalLogStore::new(dir.path());

        store.write("issue-1.costs.json", "{}").await.unwrap();
        store.write("issue-1.costs.json", "[]").await.unwrap();
        assert_eq!(store.read("issue-1.costs.json").await.unwrap().as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let config = RemoteLogConfig {
            enabled: true,
            // Nothing listens on the discard port.
            base_url: "http://127.0.0.1:9".to_string(),
            token: None,
            prefix: "agent-logs".to_string(),
        };
        let remote = RemoteLogStore::new(&config, LocalLogStore::new(dir.path())).unwrap();

        assert!(remote.exists("issue-7.md"));
        remote.append("issue-7.md", "entry\n").unwrap();
        remote.flush(Duration::from_secs(30)).await;

        assert_eq!(remote.failed_writes(), 1);
        let local = std::fs::read_to_string(dir.path().join("issue-7.md")).unwrap();
        assert_eq!(local, "entry\n");
    }

    #[test]
    fn test_remote_requires_base_url() {
        let config = RemoteLogConfig {
            enabled: true,
            base_url: String::new(),
            token: None,
            prefix: String::new(),
        };
        assert!(RemoteLogStore::new(&config, LocalLogStore::new("logs")).is_err());
    }
}
