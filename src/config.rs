use crate::error::BackendError::ConfigError;
use crate::error::BackendResult;
use crate::timer_stats::PercentileThresholds;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

pub const DEFAULT_CA_CERT_PATH: &str = "/usr/local/share/ca-certificates/circonus_CA.crt";
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_PERCENT_THRESHOLD: f64 = 90.0;

/// Backend settings, read from the daemon's JSON config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Flushes are computed but not sent when this is missing.
    #[serde(default)]
    pub circonus_http_trap_url: Option<Url>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
    #[serde(default = "default_percent_threshold")]
    pub percent_threshold: Vec<f64>,
    #[serde(default)]
    pub circonus_ca_cert_path: Option<PathBuf>,
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

fn default_flush_interval() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}

fn default_percent_threshold() -> Vec<f64> {
    vec![DEFAULT_PERCENT_THRESHOLD]
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            circonus_http_trap_url: None,
            debug: false,
            flush_interval: DEFAULT_FLUSH_INTERVAL_MS,
            percent_threshold: default_percent_threshold(),
            circonus_ca_cert_path: None,
            prometheus_addr: None,
        }
    }
}

/// Values given on the command line; each one that is set wins over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub trap_url: Option<Url>,
    pub debug: bool,
    pub ca_cert_path: Option<PathBuf>,
    pub percent_threshold: Option<Vec<f64>>,
    pub prometheus_addr: Option<SocketAddr>,
}

impl BackendConfig {
    pub fn from_json(json: &str) -> BackendResult<Self> {
        let config = serde_json::from_str::<BackendConfig>(json)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> BackendResult<Self> {
        let path = path.as_ref();
        info!("loading config from {}", path.display());
        let contents = tokio::fs::read_to_string(path).await?;
        Self::from_json(&contents)
    }

    /// Load `path` when given, otherwise start from defaults, then apply `overrides`.
    pub async fn load(
        path: Option<&Path>,
        overrides: ConfigOverrides,
    ) -> BackendResult<Self> {
        let config = match path {
            Some(path) => Self::from_file(path).await?,
            None => Self::default(),
        };
        let config = config.with_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn with_overrides(
        mut self,
        overrides: ConfigOverrides,
    ) -> Self {
        if let Some(url) = overrides.trap_url {
            self.circonus_http_trap_url = Some(url);
        }
        if overrides.debug {
            self.debug = true;
        }
        if let Some(path) = overrides.ca_cert_path {
            self.circonus_ca_cert_path = Some(path);
        }
        if let Some(pcts) = overrides.percent_threshold {
            self.percent_threshold = pcts;
        }
        if let Some(addr) = overrides.prometheus_addr {
            self.prometheus_addr = Some(addr);
        }
        self
    }

    pub fn validate(&self) -> BackendResult<()> {
        if let Some(url) = &self.circonus_http_trap_url {
            if !matches!(url.scheme(), "https" | "http") {
                return Err(ConfigError(format!(
                    "circonusHttpTrapUrl must be an http(s) url, got scheme '{}'",
                    url.scheme()
                )));
            }
            if url.host_str().is_none() {
                return Err(ConfigError(format!(
                    "circonusHttpTrapUrl has no host: {}",
                    url
                )));
            }
        }
        if self.flush_interval == 0 {
            return Err(ConfigError("flushInterval must be positive".to_string()));
        }
        self.thresholds()?;
        Ok(())
    }

    pub fn thresholds(&self) -> BackendResult<PercentileThresholds> {
        PercentileThresholds::from_percentiles(&self.percent_threshold)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval)
    }

    /// The explicit CA path, or the well-known default when that file exists.
    pub fn ca_cert_path(&self) -> Option<PathBuf> {
        match &self.circonus_ca_cert_path {
            Some(path) => Some(path.clone()),
            None => {
                let default = PathBuf::from(DEFAULT_CA_CERT_PATH);
                default.exists().then_some(default)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BackendConfig::from_json("{}").unwrap();
        assert!(config.circonus_http_trap_url.is_none());
        assert!(!config.debug);
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.percent_threshold, vec![90.0]);
        assert_eq!(config.thresholds().unwrap().len(), 1);
    }

    #[test]
    fn test_daemon_style_keys() {
        let config = BackendConfig::from_json(
            r#"{"circonusHttpTrapUrl": "https://trap.example.com:8443/module/httptrap/abc/secret",
                "debug": true,
                "flushInterval": 5000,
                "percentThreshold": [90, 99],
                "circonusCaCertPath": "/tmp/ca.crt",
                "prometheusAddr": "127.0.0.1:9102"}"#,
        )
        .unwrap();

        let url = config.circonus_http_trap_url.as_ref().unwrap();
        assert_eq!(url.host_str(), Some("trap.example.com"));
        assert_eq!(url.port(), Some(8443));
        assert!(config.debug);
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.percent_threshold, vec![90.0, 99.0]);
        assert_eq!(config.ca_cert_path(), Some(PathBuf::from("/tmp/ca.crt")));
        assert_eq!(
            config.prometheus_addr,
            Some("127.0.0.1:9102".parse().unwrap())
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(
            BackendConfig::from_json(r#"{"circonusHttpTrapUrl": "ftp://example.com/x"}"#).is_err()
        );
        assert!(BackendConfig::from_json(r#"{"circonusHttpTrapUrl": "not a url"}"#).is_err());
        assert!(BackendConfig::from_json(r#"{"percentThreshold": [0]}"#).is_err());
        assert!(BackendConfig::from_json(r#"{"percentThreshold": [101]}"#).is_err());
        assert!(BackendConfig::from_json(r#"{"flushInterval": 0}"#).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let config = BackendConfig::default().with_overrides(ConfigOverrides {
            trap_url: Some(Url::parse("https://override.example.com/trap").unwrap()),
            debug: true,
            ca_cert_path: None,
            percent_threshold: Some(vec![50.0, 95.0]),
            prometheus_addr: None,
        });

        assert_eq!(
            config.circonus_http_trap_url.unwrap().as_str(),
            "https://override.example.com/trap"
        );
        assert!(config.debug);
        assert_eq!(config.percent_threshold, vec![50.0, 95.0]);
    }

    #[tokio::test]
    async fn test_load_from_file_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"flushInterval": 2000, "percentThreshold": [75]}"#)
            .await
            .unwrap();

        let config = BackendConfig::load(
            Some(&path),
            ConfigOverrides {
                percent_threshold: Some(vec![101.0]),
                ..Default::default()
            },
        )
        .await;
        assert!(config.is_err());

        let config = BackendConfig::load(Some(&path), ConfigOverrides::default())
            .await
            .unwrap();
        assert_eq!(config.flush_interval, 2000);
        assert_eq!(config.percent_threshold, vec![75.0]);
    }
}
