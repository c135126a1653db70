/*!
 * Upstream access over HTTP and link status probing
 */

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use lumen_core_resilience::{
    ConnectionFactory, DataSource, FetchRequest, RawResponse, ResilienceError,
};

use crate::config::{ApiConfig, ConnectionSettings};
use crate::error::{LumenError, Result};

/// Builds the single HTTP client the connection manager owns
pub struct HttpConnector {
    timeout: Duration,
    user_agent: String,
}

impl HttpConnector {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            timeout: api.request_timeout(),
            user_agent: api.user_agent.clone(),
        }
    }
}

#[async_trait]
impl ConnectionFactory<reqwest::Client> for HttpConnector {
    async fn create(&self) -> std::result::Result<reqwest::Client, ResilienceError> {
        debug!("Building HTTP client");
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| ResilienceError::ConnectionSetup(error_chain(&e)))
    }
}

/// Issues requests relative to the configured base URL
pub struct HttpDataSource {
    base: reqwest::Url,
    api_key: Option<String>,
    key_param: String,
    timeout: Duration,
}

impl HttpDataSource {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let base = reqwest::Url::parse(&api.base_url)
            .map_err(|e| LumenError::Config(format!("api.base_url: {}", e)))?;
        let api_key = api.api_key();
        if api_key.is_none() {
            warn!(env = %api.api_key_env, "No API key set, requests are sent unauthenticated");
        }
        Ok(Self {
            base,
            api_key,
            key_param: api.api_key_param.clone(),
            timeout: api.request_timeout(),
        })
    }

    fn url(&self, request: &FetchRequest) -> std::result::Result<reqwest::Url, ResilienceError> {
        let mut url = self.base.join(&request.endpoint).map_err(|e| {
            ResilienceError::Logic(format!("bad endpoint '{}': {}", request.endpoint, e))
        })?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in &request.params {
                query.append_pair(key, value);
            }
            if let Some(key) = &self.api_key {
                query.append_pair(&self.key_param, key);
            }
        }
        Ok(url)
    }

    fn transport_error(&self, err: reqwest::Error) -> ResilienceError {
        if err.is_timeout() {
            return ResilienceError::Timeout(self.timeout);
        }
        ResilienceError::from_transport_message(error_chain(&err))
    }
}

#[async_trait]
impl DataSource<reqwest::Client> for HttpDataSource {
    async fn request(
        &self,
        conn: &reqwest::Client,
        request: &FetchRequest,
    ) -> std::result::Result<RawResponse, ResilienceError> {
        let url = self.url(request)?;
        let response = conn
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        // Reading the body to the end hands the stream back to the client
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;
        Ok(RawResponse::new(status, body))
    }
}

/// Display of an error and all its sources, so wedged-stack markers buried
/// in an io::Error are visible to classification
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Reports whether the network link is usable
#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_connected(&self) -> bool;
}

/// Link that is always considered up
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysConnected;

#[async_trait]
impl Connectivity for AlwaysConnected {
    async fn is_connected(&self) -> bool {
        true
    }
}

/// TCP reachability probe, re-run at most once per cooldown
pub struct TcpConnectivity {
    address: String,
    cooldown: Duration,
    timeout: Duration,
    last: Mutex<Option<(Instant, bool)>>,
}

impl TcpConnectivity {
    pub fn new(address: impl Into<String>, cooldown: Duration) -> Self {
        Self {
            address: address.into(),
            cooldown,
            timeout: Duration::from_secs(5),
            last: Mutex::new(None),
        }
    }

    fn cached(&self) -> Option<bool> {
        let last = self.last.lock().ok()?;
        (*last).and_then(|(at, up)| (at.elapsed() < self.cooldown).then_some(up))
    }

    fn remember(&self, up: bool) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some((Instant::now(), up));
        }
    }
}

#[async_trait]
impl Connectivity for TcpConnectivity {
    async fn is_connected(&self) -> bool {
        if let Some(up) = self.cached() {
            return up;
        }

        let up = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await,
            Ok(Ok(_))
        );
        if up {
            debug!(address = %self.address, "Link probe succeeded");
        } else {
            warn!(address = %self.address, "Link probe failed");
        }
        self.remember(up);
        up
    }
}

/// Connectivity collaborator for the configured settings
pub fn connectivity_for(settings: &ConnectionSettings) -> Arc<dyn Connectivity> {
    match &settings.probe_address {
        Some(address) => {
            info!(%address, "Probing link before each iteration");
            Arc::new(TcpConnectivity::new(
                address.clone(),
                Duration::from_secs(settings.reconnect_cooldown_secs),
            ))
        }
        None => Arc::new(AlwaysConnected),
    }
}
