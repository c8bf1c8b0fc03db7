//! KV store client speaking the Consul-style HTTP API.
//!
//! # Responsibilities
//! - `GET {address}/v1/kv/{key}?raw` for the hash and archive keys
//! - Send the ACL token when configured
//! - Map transport failures, timeouts and HTTP statuses onto `StoreError`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::config::StoreConfig;
use crate::store::{ConfigStore, StoreError};

const TOKEN_HEADER: &str = "X-Consul-Token";

/// HTTP-backed configuration store.
#[derive(Clone)]
pub struct HttpConfigStore {
    client: reqwest::Client,
    address: Url,
    token: Option<String>,
    hash_key: String,
    blob_key: String,
}

impl HttpConfigStore {
    /// Create a new client from the store configuration.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .no_proxy()
            .build()
            .map_err(|e| StoreError::Unavailable(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            address: config.address.clone(),
            token: config.token.clone(),
            hash_key: config.hash_key.clone(),
            blob_key: config.blob_key.clone(),
        })
    }

    /// URL for reading a raw key value.
    pub fn key_url(&self, key: &str) -> Result<Url, StoreError> {
        let mut url = self
            .address
            .join(&format!("v1/kv/{}", key.trim_start_matches('/')))
            .map_err(|e| StoreError::Unavailable(format!("invalid key URL for {}: {}", key, e)))?;
        url.set_query(Some("raw"));
        Ok(url)
    }

    async fn read_key(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.key_url(key)?;
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }

        let response = request.send().await.map_err(|e| describe(key, e))?;

        match response.status() {
            status if status.is_success() => {
                let body = response.bytes().await.map_err(|e| describe(key, e))?;
                Ok(body.to_vec())
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.to_string())),
            status => Err(StoreError::Unavailable(format!(
                "reading {} returned HTTP {}",
                key, status
            ))),
        }
    }
}

fn describe(key: &str, error: reqwest::Error) -> StoreError {
    if error.is_timeout() {
        StoreError::Unavailable(format!("reading {} timed out", key))
    } else {
        StoreError::Unavailable(format!("reading {} failed: {}", key, error))
    }
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    async fn get_hash(&self) -> Result<String, StoreError> {
        let raw = self.read_key(&self.hash_key).await?;
        let hash = String::from_utf8(raw).map_err(|_| {
            StoreError::Unavailable(format!("{} does not hold UTF-8 text", self.hash_key))
        })?;
        Ok(hash.trim().to_string())
    }

    async fn get_blob(&self) -> Result<Vec<u8>, StoreError> {
        self.read_key(&self.blob_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// One-shot HTTP responder; returns the address it listens on.
    async fn serve_once(status_line: &'static str, body: &'static [u8]) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status_line,
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            }
        });
        addr
    }

    fn store_for(addr: SocketAddr) -> HttpConfigStore {
        let config = StoreConfig {
            address: Url::parse(&format!("http://{}/", addr)).unwrap(),
            timeout_secs: 2,
            ..StoreConfig::default()
        };
        HttpConfigStore::new(&config).unwrap()
    }

    #[test]
    fn test_key_url() {
        let store = HttpConfigStore::new(&StoreConfig::default()).unwrap();
        let url = store.key_url("config/hash").unwrap();
        assert_eq!(url.as_str(), "http://127.0.0.1:8500/v1/kv/config/hash?raw");
    }

    #[tokio::test]
    async fn test_get_hash_trims_value() {
        let addr = serve_once("200 OK", b"abc123\n").await;
        let store = store_for(addr);
        assert_eq!(store.get_hash().await.unwrap(), "abc123");
    }

    #[tokio::test]
    async fn test_missing_key() {
        let addr = serve_once("404 Not Found", b"").await;
        let store = store_for(addr);
        assert!(matches!(store.get_blob().await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let addr = serve_once("500 Internal Server Error", b"boom").await;
        let store = store_for(addr);
        assert!(matches!(store.get_hash().await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = store_for(addr);
        assert!(matches!(store.get_hash().await, Err(StoreError::Unavailable(_))));
    }
}
