//! Remote read-only storage fetched over HTTP.
//!
//! Change notification polls the URL on a fixed interval and fires when the
//! body differs from the previous successful fetch. Every request, load or
//! poll, is bounded by the storage timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::storage::{required, runtime_handle, NotifyFn, Params, Storage, StorageError};

const DEFAULT_INTERVAL_SECS: u64 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// A configuration source served by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpStorage {
    url: Url,
    name: String,
    interval: Duration,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpStorage {
    pub fn new(url: Url, interval: Duration) -> Self {
        let name = url
            .path_segments()
            .and_then(|mut s| s.next_back())
            .filter(|s| !s.is_empty())
            .map(|s| s.split('.').next().unwrap_or(s).to_string())
            .or_else(|| url.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        Self {
            url,
            name,
            interval,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            client: reqwest::Client::new(),
        }
    }

    /// Bound every request to `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from `{url, interval_secs?, timeout_secs?}` parameters.
    pub fn from_params(params: &Params) -> Result<Self, String> {
        let url = Url::parse(required(params, "url")?).map_err(|e| format!("invalid url: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!("unsupported url scheme `{}`", url.scheme()));
        }
        let interval = positive_secs(params, "interval_secs", DEFAULT_INTERVAL_SECS)?;
        let timeout = positive_secs(params, "timeout_secs", DEFAULT_TIMEOUT_SECS)?;
        Ok(Self::new(url, interval).with_timeout(timeout))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch(
        client: &reqwest::Client,
        url: &Url,
        timeout: Duration,
    ) -> Result<Vec<u8>, StorageError> {
        let request = async {
            let res = client.get(url.clone()).send().await?;
            if res.status() == StatusCode::NOT_FOUND {
                return Err(StorageError::NotFound(url.to_string()));
            }
            let body = res.error_for_status()?.bytes().await?;
            Ok::<_, StorageError>(body.to_vec())
        };
        match tokio::time::timeout(timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                location: url.to_string(),
                after: timeout,
            }),
        }
    }
}

fn positive_secs(params: &Params, key: &str, default: u64) -> Result<Duration, String> {
    let secs = match params.get(key) {
        Some(v) => v
            .parse::<u64>()
            .map_err(|e| format!("invalid {} `{}`: {}", key, v, e))?,
        None => default,
    };
    if secs == 0 {
        return Err(format!("{} must be positive", key));
    }
    Ok(Duration::from_secs(secs))
}

#[async_trait]
impl Storage for HttpStorage {
    async fn load(&self) -> Result<Vec<u8>, StorageError> {
        Self::fetch(&self.client, &self.url, self.timeout).await
    }

    async fn save(&self, _data: &[u8]) -> Result<(), StorageError> {
        Err(StorageError::ReadOnly(self.url.to_string()))
    }

    fn register_notify(
        &self,
        cancel: CancellationToken,
        callback: NotifyFn,
    ) -> Result<(), StorageError> {
        let handle = runtime_handle()?;
        let client = self.client.clone();
        let url = self.url.clone();
        let name = self.name.clone();
        let period = self.interval;
        let timeout = self.timeout;

        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            let mut last: Option<Vec<u8>> = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match Self::fetch(&client, &url, timeout).await {
                            Ok(body) => {
                                let changed = last.as_ref().is_some_and(|prev| *prev != body);
                                last = Some(body);
                                if changed {
                                    tracing::info!(source = %name, "Remote config change detected");
                                    callback(&name);
                                }
                            }
                            Err(e) => {
                                tracing::warn!(url = %url, error = %e, "Remote config poll failed");
                            }
                        }
                    }
                }
            }
            tracing::debug!(url = %url, "Remote poller stopped");
        });
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
