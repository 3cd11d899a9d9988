use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shown when the backend has never reported a check time.
pub const NEVER_CHECKED: &str = "Never";

/// Shown when the backend omits the runtime descriptor.
pub const DEFAULT_RUNTIME: &str = "Active";

// Wire payloads, exactly as the backend sends them inside the envelope.

#[derive(Debug, Clone, Deserialize)]
pub struct RawOpportunity {
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub estimated_profit: Decimal,
    pub profit_percentage: Decimal,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStats {
    #[serde(default)]
    pub total_opportunities: Option<u64>,
    #[serde(default)]
    pub average_profit: Option<Decimal>,
    #[serde(default)]
    pub best_profit: Option<Decimal>,
    #[serde(default)]
    pub runtime: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStatus {
    pub running: bool,
    #[serde(default)]
    pub last_check: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

// Normalized view model.

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
    pub estimated_profit: Decimal,
    pub profit_percentage: Decimal,
}

/// Server-side counters. Profit values are held at two decimal places.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_opportunities: u64,
    pub average_profit: Decimal,
    pub best_profit: Decimal,
    pub runtime: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    pub running: bool,
    pub last_check: String,
    pub detail: Option<String>,
}

impl Status {
    pub fn never_checked(&self) -> bool {
        self.last_check == NEVER_CHECKED
    }
}

/// Everything one successful aggregation cycle produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub cycle: u64,
    pub opportunities: Vec<Opportunity>,
    pub stats: Stats,
    pub status: Status,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.opportunities.is_empty()
    }
}
