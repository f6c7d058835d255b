use crate::config::BackendConfig;
use crate::error::BackendError::{CaCertificateError, UnexpectedStatus};
use crate::error::BackendResult;
use crate::timer_stats::StatsMap;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Certificate;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, trace};
use url::Url;

pub const USER_AGENT: &str = "StatsdCirconusBackend/1";

/// Where a computed flush ends up.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn send(
        &self,
        stats: &StatsMap,
    ) -> BackendResult<()>;
}

/// PUTs the stats map as JSON to a Circonus HTTP trap.
#[derive(Debug, Clone)]
pub struct TrapClient {
    client: reqwest::Client,
    url: Url,
    debug: bool,
}

impl TrapClient {
    pub fn new(
        url: Url,
        ca_cert_path: Option<&Path>,
        debug: bool,
        timeout: Duration,
    ) -> BackendResult<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .user_agent(USER_AGENT)
            .timeout(timeout);
        if let Some(path) = ca_cert_path {
            let pem = std::fs::read(path)
                .map_err(|e| CaCertificateError(path.display().to_string(), e.to_string()))?;
            let certificate = Certificate::from_pem(&pem)
                .map_err(|e| CaCertificateError(path.display().to_string(), e.to_string()))?;
            builder = builder.add_root_certificate(certificate);
            info!("trusting CA certificate {}", path.display());
        }
        let client = builder.build()?;
        Ok(Self { client, url, debug })
    }

    /// `None` when no trap url is configured.
    pub fn from_config(config: &BackendConfig) -> BackendResult<Option<Self>> {
        match &config.circonus_http_trap_url {
            Some(url) => {
                let ca_cert_path = config.ca_cert_path();
                // a flush must finish before the next one starts
                let client = Self::new(
                    url.clone(),
                    ca_cert_path.as_deref(),
                    config.debug,
                    config.flush_interval(),
                )?;
                Ok(Some(client))
            }
            None => Ok(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the HTTP status on success, an error for any non 2xx response.
    pub async fn put_stats(
        &self,
        stats: &StatsMap,
    ) -> BackendResult<u16> {
        let payload = serde_json::to_vec(stats)?;
        if self.debug {
            info!(
                "Circonus trap host: {:?} port: {} path: {}",
                self.url.host_str(),
                self.url.port_or_known_default().unwrap_or(443),
                self.url.path()
            );
            info!("Circonus request body: {}", String::from_utf8_lossy(&payload));
        } else {
            debug!("sending {} stats ({} bytes) to circonus", stats.len(), payload.len());
        }

        let response = self
            .client
            .put(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if self.debug {
            info!("Circonus response status: {}", status);
            info!("Circonus response headers: {:?}", response.headers());
        }
        let body = response.text().await?;
        if self.debug {
            info!("Circonus response body: {}", body);
        } else {
            trace!("Circonus response body: {}", body);
        }

        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(UnexpectedStatus {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl StatsSink for TrapClient {
    async fn send(
        &self,
        stats: &StatsMap,
    ) -> BackendResult<()> {
        self.put_stats(stats).await.map(|_| ())
    }
}
