//! Remote rule sources

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;

use crate::config::LoaderConfig;
use crate::error::FetchError;

/// Where fresh rule documents come from.
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Version of the document the source currently serves.
    async fn fetch_remote_version(&self) -> Result<i64, FetchError>;

    /// The full rule document.
    async fn fetch_document(&self) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionMarker {
    bugs_version: i64,
}

/// Parse a `{"bugsVersion": N}` marker.
pub fn parse_version_marker(body: &[u8]) -> Result<i64, FetchError> {
    serde_json::from_slice::<VersionMarker>(body)
        .map(|marker| marker.bugs_version)
        .map_err(|e| FetchError::InvalidMarker(e.to_string()))
}

// =============================================================================
// HTTP
// =============================================================================

pub struct HttpRuleSource {
    client: Client,
    version_url: String,
    list_url: String,
    timeout: Duration,
}

impl HttpRuleSource {
    pub fn new(config: &LoaderConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.fetch_timeout())
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            version_url: config.version_url.clone(),
            list_url: config.list_url.clone(),
            timeout: config.fetch_timeout(),
        })
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.request_error(url, e))?;
        Ok(body.to_vec())
    }

    fn request_error(&self, url: &str, source: reqwest::Error) -> FetchError {
        if source.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Http {
                url: url.to_string(),
                source,
            }
        }
    }
}

#[async_trait]
impl RuleSource for HttpRuleSource {
    async fn fetch_remote_version(&self) -> Result<i64, FetchError> {
        let body = self.get(&self.version_url).await?;
        parse_version_marker(&body)
    }

    async fn fetch_document(&self) -> Result<Vec<u8>, FetchError> {
        self.get(&self.list_url).await
    }
}
