use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::{num::NonZeroU32, sync::Arc, time::{Duration, Instant}};
use tracing::{debug, warn};

use crate::{
    config::ApiConfig,
    error::{FetchError, FetchErrorKind},
    models::{RawOpportunity, RawStats, RawStatus},
    types::{Envelope, Resource},
};

/// Anything that can produce the three raw payloads. The aggregator only sees this.
#[async_trait]
pub trait ResourceSource: Send + Sync {
    async fn fetch_opportunities(&self) -> Result<Vec<RawOpportunity>, FetchError>;
    async fn fetch_stats(&self) -> Result<RawStats, FetchError>;
    async fn fetch_status(&self) -> Result<RawStatus, FetchError>;
}

pub struct ResourceClient {
    http_client: Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    base_url: String,
    timeout: Duration,
    cache_bust: bool,
}

impl ResourceClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms);

        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second).context("max_requests_per_second must be non-zero")?,
        )
        .allow_burst(NonZeroU32::new(config.burst_size).context("burst_size must be non-zero")?);
        let rate_limiter = Arc::new(RateLimiter::direct(quota));

        Ok(Self {
            http_client,
            rate_limiter,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            cache_bust: config.cache_bust,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn resource_url(&self, resource: Resource) -> String {
        format!("{}/{}", self.base_url, resource.path())
    }

    /// One GET against `resource`, unwrapped from its envelope. No retries here.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        self.rate_limiter.until_ready().await;

        let url = self.resource_url(resource);
        let started = Instant::now();

        let response = self
            .http_client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| FetchError::new(resource, self.classify(&e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::new(resource, self.classify(&e)))?;

        debug!(
            resource = %resource,
            status = status.as_u16(),
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Fetched resource"
        );

        if !status.is_success() {
            // The backend wraps its failures in an envelope; keep its message when there is one
            let message = serde_json::from_slice::<Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.error);
            warn!(resource = %resource, status = status.as_u16(), "Backend returned error status");
            return Err(FetchError::new(resource, FetchErrorKind::HttpStatus {
                status: status.as_u16(),
                message,
            }));
        }

        let envelope: Envelope<T> = serde_json::from_slice(&body)
            .map_err(|e| FetchError::new(resource, FetchErrorKind::MalformedBody(e.to_string())))?;

        if !envelope.success {
            return Err(FetchError::new(resource, FetchErrorKind::Rejected {
                message: envelope.error,
            }));
        }

        envelope.data.ok_or_else(|| {
            FetchError::new(resource, FetchErrorKind::MalformedBody("envelope has no data".to_string()))
        })
    }

    fn classify(&self, error: &reqwest::Error) -> FetchErrorKind {
        if error.is_timeout() {
            FetchErrorKind::Timeout(self.timeout)
        } else if error.is_connect() {
            FetchErrorKind::ConnectionRefused(error.to_string())
        } else if error.is_decode() {
            FetchErrorKind::MalformedBody(error.to_string())
        } else {
            FetchErrorKind::Transport(error.to_string())
        }
    }

    fn cache_buster(&self) -> Vec<(&'static str, String)> {
        if self.cache_bust {
            vec![("t", Utc::now().timestamp_millis().to_string())]
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl ResourceSource for ResourceClient {
    async fn fetch_opportunities(&self) -> Result<Vec<RawOpportunity>, FetchError> {
        let query = self.cache_buster();
        self.fetch(Resource::Opportunities, &query).await
    }

    async fn fetch_stats(&self) -> Result<RawStats, FetchError> {
        self.fetch(Resource::Stats, &[]).await
    }

    async fn fetch_status(&self) -> Result<RawStatus, FetchError> {
        self.fetch(Resource::Status, &[]).await
    }
}
