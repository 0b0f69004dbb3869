//! HTTP client for the remote activity feed.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use pacer_common::retry::CallError;
use pacer_core::ActivityFeed;
use pacer_domain::config::FeedConfig;
use pacer_domain::{ActivitySummary, PacerError, Result};

/// How much of an error body we keep for diagnostics.
const ERROR_BODY_LIMIT: usize = 512;

/// Paginated activity feed over HTTP.
///
/// One `fetch_page` call is one physical request; admission control and
/// retry are the caller's concern. Responses are decoded leniently: a
/// record the summary model cannot represent is skipped with a warning
/// rather than failing the whole page.
#[derive(Clone)]
pub struct FeedClient {
    http: Client,
    base_url: String,
}

impl FeedClient {
    pub fn new(config: &FeedConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| PacerError::Config(format!("http client construction: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    #[cfg(test)]
    fn with_base_url(base_url: &str, timeout: Duration) -> Self {
        Self {
            http: Client::builder().timeout(timeout).build().unwrap(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ActivityFeed for FeedClient {
    async fn fetch_page(
        &self,
        token: &str,
        page: u32,
        per_page: u32,
    ) -> std::result::Result<Vec<ActivitySummary>, CallError> {
        let url = format!("{}/athlete/activities", self.base_url);

        let response = self
            .http
            .get(&url)
            .query(&[("page", page), ("per_page", per_page)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| CallError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let mut message = response.text().await.unwrap_or_default();
            message.truncate(ERROR_BODY_LIMIT);
            return Err(CallError::Status {
                code: status.as_u16(),
                retry_after,
                message,
            });
        }

        let payload: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| CallError::Network(format!("feed body decode: {e}")))?;

        let mut activities = Vec::with_capacity(payload.len());
        for value in payload {
            match serde_json::from_value::<ActivitySummary>(value.clone()) {
                Ok(mut summary) => {
                    summary.raw = value;
                    activities.push(summary);
                }
                Err(e) => {
                    warn!(page, error = %e, "skipping malformed feed record");
                }
            }
        }

        debug!(page, per_page, count = activities.len(), "feed page fetched");
        Ok(activities)
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
