//! Host HTTP access
//!
//! Repository manifests, plugin sources and side files are downloaded
//! through the `HttpFetch` trait so the store and resolver can be driven by a
//! fake in tests. The same configured `reqwest::Client` backs the sandbox's
//! fetch helpers.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::core::config::{NetworkConfig, PluginConfig};
use crate::core::error::{FolioError, Result};

/// Text download capability
#[async_trait]
pub trait HttpFetch: Send + Sync {
    /// GET `url` and return the body as text
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// `reqwest`-backed implementation
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(network: &NetworkConfig, plugins: &PluginConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(network, &plugins.user_agent)?,
        })
    }

    /// The underlying client, shared with the sandbox
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl HttpFetch for HttpClient {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!(url = %url, "Fetching text");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FolioError::NetworkError(format!("{} returned {}", url, status)));
        }
        Ok(response.text().await?)
    }
}

/// Build the shared client with the configured timeouts and user agent
pub fn build_client(network: &NetworkConfig, user_agent: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(network.request_timeout))
        .connect_timeout(Duration::from_secs(network.connect_timeout))
        .user_agent(user_agent)
        .build()
        .map_err(|e| FolioError::InitializationError(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory `HttpFetch` serving canned bodies per URL
    #[derive(Default)]
    pub struct FakeHttp {
        bodies: Mutex<HashMap<String, std::result::Result<String, String>>>,
        requests: AtomicUsize,
    }

    impl FakeHttp {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn serve(&self, url: &str, body: &str) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), Ok(body.to_string()));
        }

        pub fn fail(&self, url: &str, message: &str) {
            self.bodies
                .lock()
                .unwrap()
                .insert(url.to_string(), Err(message.to_string()));
        }

        pub fn request_count(&self) -> usize {
            self.requests.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpFetch for FakeHttp {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            match self.bodies.lock().unwrap().get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(message)) => Err(FolioError::NetworkError(message.clone())),
                None => Err(FolioError::NetworkError(format!("{} returned 404 Not Found", url))),
            }
        }
    }
}
