use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Flat record returned by the IP geolocation provider. Every field is
/// optional; enrichment never carries guarantees.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct GeoInfo {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub loc: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub postal: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

/// Best-effort IP geolocation. Implementations must return `None` on any
/// failure; a slow or broken lookup never fails the caller.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo>;
}

/// ipinfo.io client. Constructed only when an API token is configured.
pub struct IpinfoClient {
    http: reqwest::Client,
    token: String,
}

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

impl IpinfoClient {
    pub fn new(token: String) -> Option<Self> {
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|err| tracing::warn!(error = %err, "failed to build geolocation client"))
            .ok()?;
        Some(Self { http, token })
    }
}

#[async_trait]
impl GeoLookup for IpinfoClient {
    async fn lookup(&self, ip: &str) -> Option<GeoInfo> {
        let url = format!("https://ipinfo.io/{ip}/json");
        let response = self
            .http
            .get(&url)
            .query(&[("token", self.token.as_str())])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<GeoInfo>().await {
                Ok(info) => Some(info),
                Err(err) => {
                    tracing::debug!(ip, error = %err, "geolocation payload unreadable");
                    None
                }
            },
            Ok(resp) => {
                tracing::debug!(ip, status = %resp.status(), "geolocation lookup rejected");
                None
            }
            Err(err) => {
                tracing::debug!(ip, error = %err, "geolocation lookup failed");
                None
            }
        }
    }
}

/// Used when no API token is configured; lookups always come back empty.
pub struct DisabledGeoLookup;

#[async_trait]
impl GeoLookup for DisabledGeoLookup {
    async fn lookup(&self, _ip: &str) -> Option<GeoInfo> {
        None
    }
}

/// Pick the lookup implementation from `IPINFO_TOKEN`.
pub fn from_env() -> Arc<dyn GeoLookup> {
    match std::env::var("IPINFO_TOKEN") {
        Ok(token) if !token.is_empty() => match IpinfoClient::new(token) {
            Some(client) => Arc::new(client),
            None => Arc::new(DisabledGeoLookup),
        },
        _ => {
            tracing::debug!("IPINFO_TOKEN not set; session geolocation disabled");
            Arc::new(DisabledGeoLookup)
        }
    }
}
