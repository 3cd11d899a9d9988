use chrono::Utc;
use rust_decimal::Decimal;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    error::{AggregationError, FetchError, FetchErrorKind},
    models::{
        Opportunity, RawOpportunity, RawStats, RawStatus, Snapshot, Stats, Status, DEFAULT_RUNTIME,
        NEVER_CHECKED,
    },
    types::Resource,
    utils::{
        format::{parse_timestamp, two_places},
        http::ResourceSource,
    },
};

pub struct SnapshotAggregator {
    source: Arc<dyn ResourceSource>,
    next_cycle: AtomicU64,
}

impl SnapshotAggregator {
    pub fn new(source: Arc<dyn ResourceSource>) -> Self {
        Self {
            source,
            next_cycle: AtomicU64::new(1),
        }
    }

    /// Fetches all three resources concurrently and merges them into one snapshot.
    /// Any single failure fails the whole cycle.
    pub async fn aggregate(&self) -> Result<Snapshot, AggregationError> {
        let cycle = self.next_cycle.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        debug!(cycle, "Starting aggregation cycle");

        let (raw_opportunities, raw_stats, raw_status) = tokio::try_join!(
            self.source.fetch_opportunities(),
            self.source.fetch_stats(),
            self.source.fetch_status(),
        )
        .map_err(|cause| {
            warn!(cycle, resource = %cause.resource, "Aggregation failed: {}", cause.kind);
            AggregationError::from(cause)
        })?;

        let mut defaulted = Vec::new();
        let opportunities = normalize_opportunities(raw_opportunities)?;
        let stats = normalize_stats(raw_stats, &mut defaulted);
        let status = normalize_status(raw_status, &mut defaulted);

        if !defaulted.is_empty() {
            debug!(cycle, ?defaulted, "Applied field defaults");
        }

        info!(
            cycle,
            opportunities = opportunities.len(),
            total = stats.total_opportunities,
            running = status.running,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregation cycle complete"
        );

        Ok(Snapshot {
            cycle,
            opportunities,
            stats,
            status,
            fetched_at: Utc::now(),
        })
    }
}

// Field defaults. These are the only places an absent value is replaced:
//
//   stats.total_opportunities  -> 0
//   stats.average_profit       -> 0, then two decimal places
//   stats.best_profit          -> 0, then two decimal places
//   stats.runtime              -> "Active"
//   status.last_check          -> "Never" (also for an empty string)
//   opportunity.timestamp      -> created_at
//
// Anything else missing is a malformed body.

pub fn normalize_stats(raw: RawStats, defaulted: &mut Vec<&'static str>) -> Stats {
    let total_opportunities = raw.total_opportunities.unwrap_or_else(|| {
        defaulted.push("stats.total_opportunities");
        0
    });
    let average_profit = raw.average_profit.unwrap_or_else(|| {
        defaulted.push("stats.average_profit");
        Decimal::ZERO
    });
    let best_profit = raw.best_profit.unwrap_or_else(|| {
        defaulted.push("stats.best_profit");
        Decimal::ZERO
    });
    let runtime = match raw.runtime {
        Some(runtime) if !runtime.trim().is_empty() => runtime,
        _ => {
            defaulted.push("stats.runtime");
            DEFAULT_RUNTIME.to_string()
        }
    };

    Stats {
        total_opportunities,
        average_profit: two_places(average_profit),
        best_profit: two_places(best_profit),
        runtime,
    }
}

pub fn normalize_status(raw: RawStatus, defaulted: &mut Vec<&'static str>) -> Status {
    let last_check = match raw.last_check {
        Some(last_check) if !last_check.trim().is_empty() => last_check,
        _ => {
            defaulted.push("status.last_check");
            NEVER_CHECKED.to_string()
        }
    };

    Status {
        running: raw.running,
        last_check,
        detail: raw.status.filter(|detail| !detail.trim().is_empty()),
    }
}

pub fn normalize_opportunities(raw: Vec<RawOpportunity>) -> Result<Vec<Opportunity>, AggregationError> {
    // Backend order is kept as-is
    raw.into_iter()
        .map(normalize_opportunity)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|kind| FetchError::new(Resource::Opportunities, kind).into())
}

fn normalize_opportunity(raw: RawOpportunity) -> Result<Opportunity, FetchErrorKind> {
    let timestamp = raw
        .timestamp
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| raw.created_at.as_deref().and_then(parse_timestamp))
        .ok_or_else(|| FetchErrorKind::MalformedBody(format!("opportunity {} has no usable timestamp", raw.id)))?;

    Ok(Opportunity {
        id: raw.id,
        timestamp,
        buy_exchange: raw.buy_exchange,
        sell_exchange: raw.sell_exchange,
        buy_price: raw.buy_price,
        sell_price: raw.sell_price,
        estimated_profit: raw.estimated_profit,
        profit_percentage: raw.profit_percentage,
    })
}
