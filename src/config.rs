use anyhow::{Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};
use tracing::{debug, warn};
use url::Url;

use crate::types::FailurePolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub cache_bust: bool,
    pub max_requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081/api".to_string(),
            request_timeout_ms: 4000,
            cache_bust: true,
            max_requests_per_second: 10,
            burst_size: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_seconds: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            failure_policy: FailurePolicy::RetainLastGood,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub max_rows: usize,
    pub full_screen: bool,
    pub bot_profile: BotProfile,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_rows: 50,
            full_screen: true,
            bot_profile: BotProfile::default(),
        }
    }
}

/// Static bot settings echoed in the configuration panel. Display only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotProfile {
    pub trade_amount: String,
    pub min_profit: String,
    pub gas_estimate: String,
    pub check_interval: String,
    pub network: String,
    pub chain_id: String,
}

impl Default for BotProfile {
    fn default() -> Self {
        Self {
            trade_amount: "1.0 WETH".to_string(),
            min_profit: "5.0 USDC".to_string(),
            gas_estimate: "1.0 USDC".to_string(),
            check_interval: "10 seconds".to_string(),
            network: "Polygon Mainnet".to_string(),
            chain_id: "137".to_string(),
        }
    }
}

impl BotProfile {
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("Trade Amount", self.trade_amount.as_str()),
            ("Min Profit Threshold", self.min_profit.as_str()),
            ("Gas Cost Estimate", self.gas_estimate.as_str()),
            ("Check Interval", self.check_interval.as_str()),
            ("Network", self.network.as_str()),
            ("Chain ID", self.chain_id.as_str()),
        ]
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        if dotenv().is_err() {
            debug!("No .env file found, using environment variables and config file");
        }

        let config_path = env::var("DASHBOARD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(config_path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            debug!("Config file {} not found, using defaults", path.display());
            Config::default()
        };

        config.override_with_env()?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Config>(content).context("Invalid TOML configuration")
    }

    fn override_with_env(&mut self) -> Result<()> {
        if let Ok(val) = env::var("DASHBOARD_API_BASE_URL") {
            self.api.base_url = val;
        }
        if let Ok(val) = env::var("DASHBOARD_REQUEST_TIMEOUT_MS") {
            self.api.request_timeout_ms = val.parse().context("DASHBOARD_REQUEST_TIMEOUT_MS")?;
        }
        if let Ok(val) = env::var("DASHBOARD_CACHE_BUST") {
            self.api.cache_bust = val.parse().context("DASHBOARD_CACHE_BUST")?;
        }
        if let Ok(val) = env::var("DASHBOARD_MAX_REQUESTS_PER_SECOND") {
            self.api.max_requests_per_second = val.parse().context("DASHBOARD_MAX_REQUESTS_PER_SECOND")?;
        }
        if let Ok(val) = env::var("DASHBOARD_POLL_INTERVAL_SECONDS") {
            self.polling.interval_seconds = val.parse().context("DASHBOARD_POLL_INTERVAL_SECONDS")?;
        }
        if let Ok(val) = env::var("DASHBOARD_FAILURE_POLICY") {
            self.polling.failure_policy = val
                .parse()
                .map_err(anyhow::Error::msg)
                .context("DASHBOARD_FAILURE_POLICY")?;
        }
        if let Ok(val) = env::var("DASHBOARD_MAX_ROWS") {
            self.display.max_rows = val.parse().context("DASHBOARD_MAX_ROWS")?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api.base_url)
            .with_context(|| format!("Invalid API base URL: {}", self.api.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("API base URL must be http or https, got {}", url.scheme());
        }

        if self.polling.interval_seconds == 0 {
            anyhow::bail!("polling.interval_seconds must be greater than zero");
        }
        if self.api.request_timeout_ms == 0 {
            anyhow::bail!("api.request_timeout_ms must be greater than zero");
        }
        if self.api.max_requests_per_second == 0 || self.api.burst_size == 0 {
            anyhow::bail!("api rate limit and burst size must be greater than zero");
        }

        if self.request_timeout() >= self.poll_interval() {
            warn!(
                "Request timeout {:?} is not shorter than the poll interval {:?}; slow cycles will skip ticks",
                self.request_timeout(),
                self.poll_interval()
            );
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.request_timeout_ms)
    }
}
