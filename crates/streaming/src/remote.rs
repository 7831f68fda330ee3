use std::time::Duration;

use catalog::Incinerator;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::LoadError;
use crate::protocol::{ViewportRequest, ViewportResponse, clustered_for_zoom};
use crate::source::{BoxFuture, IncineratorSource};

/// Same-origin proxy route in front of the external API.
pub const REMOTE_PROXY_PATH: &str = "/api/remote-incinerators";

#[derive(Debug, Clone)]
pub struct RemoteSourceConfig {
    /// Origin serving [`REMOTE_PROXY_PATH`], e.g. `http://127.0.0.1:3001`.
    pub base_url: String,
    pub request_timeout: Duration,
    pub connection_timeout: Duration,
}

impl RemoteSourceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(12),
            connection_timeout: Duration::from_secs(8),
        }
    }
}

/// Parses a proxy payload into valid records.
///
/// The top-level value must be an array. Entries that do not decode, or whose
/// location is missing or non-finite, are dropped.
pub fn parse_payload(bytes: &[u8]) -> Result<Vec<Incinerator>, LoadError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| LoadError::InvalidPayload(format!("response is not JSON: {e}")))?;
    let Value::Array(items) = value else {
        return Err(LoadError::InvalidPayload(
            "expected a JSON array of incinerators".to_string(),
        ));
    };

    let total = items.len();
    let valid: Vec<Incinerator> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<Incinerator>(item) {
            Ok(inc) if inc.has_valid_location() => Some(inc),
            Ok(inc) => {
                debug!(id = %inc.id, "dropping record with non-finite location");
                None
            }
            Err(e) => {
                debug!("dropping undecodable record: {e}");
                None
            }
        })
        .collect();

    if valid.len() != total {
        warn!(
            dropped = total - valid.len(),
            total, "remote payload contained invalid records"
        );
    }
    Ok(valid)
}

/// Applies the bounds filter the remote API cannot do itself.
pub fn viewport_from_list(list: Vec<Incinerator>, request: &ViewportRequest) -> ViewportResponse {
    let incinerators: Vec<Incinerator> = list
        .into_iter()
        .filter(|inc| request.bounds.contains(inc.location))
        .collect();
    ViewportResponse {
        total_count: incinerators.len(),
        incinerators,
        clustered: clustered_for_zoom(request.zoom),
    }
}

/// Client for the external incinerator API, reached through the proxy.
pub struct RemoteSource {
    config: RemoteSourceConfig,
    client: reqwest::Client,
}

impl RemoteSource {
    pub fn new(config: RemoteSourceConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: RemoteSourceConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &RemoteSourceConfig {
        &self.config
    }

    fn endpoint(&self, zoom: Option<f64>) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        match zoom {
            Some(z) => format!("{base}{REMOTE_PROXY_PATH}?zoom={z}"),
            None => format!("{base}{REMOTE_PROXY_PATH}"),
        }
    }

    /// Every valid record the API returns for `zoom`.
    ///
    /// The proxy drops site geometry below its own detail threshold.
    pub async fn fetch_all(&self, zoom: Option<f64>) -> Result<Vec<Incinerator>, LoadError> {
        let url = self.endpoint(zoom);
        let timeout = self.config.request_timeout;

        let resp = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| LoadError::from_reqwest(e, timeout))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LoadError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| LoadError::from_reqwest(e, timeout))?;
        let list = parse_payload(&bytes)?;
        debug!(url = %url, count = list.len(), "remote fetch complete");
        Ok(list)
    }

    pub async fn fetch_by_viewport(
        &self,
        request: &ViewportRequest,
    ) -> Result<ViewportResponse, LoadError> {
        let list = self.fetch_all(Some(request.zoom)).await?;
        Ok(viewport_from_list(list, request))
    }

    async fn probe(&self) -> Result<(), LoadError> {
        let timeout = self.config.connection_timeout;
        let resp = self
            .client
            .get(self.endpoint(None))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| LoadError::from_reqwest(e, timeout))?;
        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(LoadError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("unknown").to_string(),
            })
        }
    }

    /// `true` only for a 2xx answer within the connection timeout.
    pub async fn test_connection(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(e) => {
                warn!("remote connection test failed: {e}");
                false
            }
        }
    }
}

impl IncineratorSource for RemoteSource {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn fetch_viewport(
        &self,
        request: &ViewportRequest,
    ) -> BoxFuture<'_, Result<ViewportResponse, LoadError>> {
        let request = *request;
        Box::pin(async move { self.fetch_by_viewport(&request).await })
    }

    fn check_connection(&self) -> BoxFuture<'_, Result<(), LoadError>> {
        Box::pin(self.probe())
    }
}
