//! Where model assets come from

use crate::error::LoadError;
use async_trait::async_trait;
use std::path::PathBuf;

/// Fetches named model assets relative to some base location
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, LoadError>;

    /// Human readable location of an asset, used in logs
    fn locate(&self, name: &str) -> String;
}

/// Assets stored in a local directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AssetSource for DirectorySource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, LoadError> {
        let path = self.root.join(name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| LoadError::fetch(path.display().to_string(), e))
    }

    fn locate(&self, name: &str) -> String {
        self.root.join(name).display().to_string()
    }
}

/// Assets served under an HTTP base URL
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpSource {
    base_url: String,
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            client,
        }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl AssetSource for HttpSource {
    async fn fetch(&self, name: &str) -> Result<Vec<u8>, LoadError> {
        let url = self.locate(name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LoadError::fetch(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::fetch(&url, format!("HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LoadError::fetch(&url, e))?;
        Ok(bytes.to_vec())
    }

    fn locate(&self, name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_source_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("metadata.json"), b"{}").unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.fetch("metadata.json").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn missing_file_is_a_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(dir.path());

        match source.fetch("model.tflite").await {
            Err(LoadError::Fetch { asset, .. }) => assert!(asset.ends_with("model.tflite")),
            other => panic!("Expected fetch error, got {other:?}"),
        }
    }

    #[cfg(feature = "http")]
    #[test]
    fn http_source_joins_paths() {
        let source = HttpSource::new("https://cdn.example.com/model/");
        assert_eq!(
            source.locate("metadata.json"),
            "https://cdn.example.com/model/metadata.json"
        );

        let bare = HttpSource::new("https://cdn.example.com/model");
        assert_eq!(
            bare.locate("model.tflite"),
            "https://cdn.example.com/model/model.tflite"
        );
    }

    /// Answer a single HTTP request with a canned response
    #[cfg(feature = "http")]
    async fn serve_once(status_line: &'static str, body: &'static [u8]) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {status_line}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}/model")
    }

    #[cfg(feature = "http")]
    #[tokio::test]
    async fn http_error_status_is_a_fetch_error() {
        let base_url = serve_once("404 Not Found", b"").await;
        let source = HttpSource::new(base_url.as_str());

        match source.fetch("model.tflite").await {
            Err(LoadError::Fetch { asset, message }) => {
                assert_eq!(asset, format!("{base_url}/model.tflite"));
                assert!(message.contains("404"), "unexpected message: {message}");
            }
            other => panic!("Expected fetch error, got {other:?}"),
        }
    }

    #[cfg(feature = "http")]
    #[tokio::test]
    async fn http_source_returns_body() {
        let base_url = serve_once("200 OK", b"{\"labels\":[]}").await;
        let source = HttpSource::new(base_url);

        let body = source.fetch("metadata.json").await.unwrap();
        assert_eq!(body, b"{\"labels\":[]}");
    }
}
