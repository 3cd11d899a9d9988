use super::*;
use crate::{
    error::{AggregationError, FetchError, FetchErrorKind, PollerError},
    models::{RawOpportunity, RawStats, RawStatus, Snapshot},
    types::{FailurePolicy, PollerState, Resource},
    utils::{http::ResourceSource, store::SnapshotStore},
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use tokio::time::{sleep, Duration, Instant};

// Mock ResourceSource for testing. Every payload is tagged with the call number so
// tests can tell which cycle produced it.
struct MockSource {
    delay: Duration,
    opportunities_calls: AtomicU64,
    stats_calls: AtomicU64,
    status_calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    failing: Mutex<Option<Resource>>,
}

impl MockSource {
    fn new(delay: Duration) -> Self {
        MockSource {
            delay,
            opportunities_calls: AtomicU64::new(0),
            stats_calls: AtomicU64::new(0),
            status_calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            failing: Mutex::new(None),
        }
    }

    fn fail_on(&self, resource: Option<Resource>) {
        *self.failing.lock().unwrap() = resource;
    }

    async fn respond<T>(&self, resource: Resource, payload: T) -> Result<T, FetchError> {
        sleep(self.delay).await;
        if *self.failing.lock().unwrap() == Some(resource) {
            return Err(FetchError::new(resource, FetchErrorKind::Timeout(Duration::from_secs(4))));
        }
        Ok(payload)
    }
}

#[async_trait]
impl ResourceSource for MockSource {
    async fn fetch_opportunities(&self) -> Result<Vec<RawOpportunity>, FetchError> {
        let n = self.opportunities_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let payload = vec![RawOpportunity {
            id: format!("opp-{}", n),
            timestamp: Some("2024-05-01T12:00:00Z".to_string()),
            created_at: None,
            buy_exchange: "QuickSwap".to_string(),
            sell_exchange: "SushiSwap".to_string(),
            buy_price: Decimal::from(3000),
            sell_price: Decimal::from(3010),
            estimated_profit: Decimal::from(9),
            profit_percentage: Decimal::new(30, 2),
        }];
        let result = self.respond(Resource::Opportunities, payload).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn fetch_stats(&self) -> Result<RawStats, FetchError> {
        let n = self.stats_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = RawStats {
            total_opportunities: Some(n),
            ..RawStats::default()
        };
        self.respond(Resource::Stats, payload).await
    }

    async fn fetch_status(&self) -> Result<RawStatus, FetchError> {
        let n = self.status_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = RawStatus {
            running: true,
            last_check: Some(format!("check-{}", n)),
            status: None,
        };
        self.respond(Resource::Status, payload).await
    }
}

fn setup(delay: Duration) -> (Arc<MockSource>, Arc<SnapshotAggregator>) {
    let source = Arc::new(MockSource::new(delay));
    let aggregator = Arc::new(SnapshotAggregator::new(source.clone()));
    (source, aggregator)
}

type Collected = (Arc<Mutex<Vec<Snapshot>>>, Arc<Mutex<Vec<AggregationError>>>);

fn start_collecting(poller: &Poller) -> (PollerHandle, Collected) {
    let snapshots = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let (s, e) = (snapshots.clone(), errors.clone());
    let handle = poller
        .start(
            move |snapshot| s.lock().unwrap().push(snapshot),
            move |error| e.lock().unwrap().push(error),
        )
        .unwrap();
    (handle, (snapshots, errors))
}

fn cycle_tag(snapshot: &Snapshot) -> (String, u64, String) {
    (
        snapshot.opportunities[0].id.trim_start_matches("opp-").to_string(),
        snapshot.stats.total_opportunities,
        snapshot.status.last_check.trim_start_matches("check-").to_string(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_aggregate_fetches_concurrently() {
    let (source, aggregator) = setup(Duration::from_secs(2));

    let started = Instant::now();
    let snapshot = aggregator.aggregate().await.unwrap();

    // Three 2s calls in parallel take 2s, not 6s
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(snapshot.cycle, 1);
    assert_eq!(snapshot.opportunities.len(), 1);
    assert_eq!(snapshot.stats.average_profit.to_string(), "0.00");
    assert_eq!(snapshot.stats.runtime, "Active");
    assert_eq!(source.stats_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_aggregate_fails_when_one_call_fails() {
    let (source, aggregator) = setup(Duration::from_millis(100));
    source.fail_on(Some(Resource::Opportunities));

    let err = aggregator.aggregate().await.unwrap_err();
    assert_eq!(err.failed_resource, Resource::Opportunities);
    assert!(err.cause.is_timeout());

    source.fail_on(Some(Resource::Status));
    let err = aggregator.aggregate().await.unwrap_err();
    assert_eq!(err.failed_resource, Resource::Status);
}

#[tokio::test(start_paused = true)]
async fn test_first_cycle_runs_immediately_then_once_per_interval() {
    let (_source, aggregator) = setup(Duration::from_secs(1));
    let poller = Poller::new(aggregator, poller::DEFAULT_POLL_INTERVAL);
    let (handle, (snapshots, errors)) = start_collecting(&poller);

    sleep(Duration::from_millis(1_500)).await;
    assert_eq!(snapshots.lock().unwrap().len(), 1);

    // Ticks at 0, 5, 10, 15, 20 seconds
    sleep(Duration::from_millis(21_000)).await;
    let stats = handle.stats();
    assert_eq!(stats.cycles_started, 5);
    assert_eq!(stats.cycles_succeeded, 5);
    assert_eq!(stats.ticks_skipped, 0);
    assert!(stats.last_success_at.is_some());
    assert!(errors.lock().unwrap().is_empty());

    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_never_overlaps_cycles() {
    let (source, aggregator) = setup(Duration::from_secs(12));
    let poller = Poller::new(aggregator, Duration::from_secs(5));
    let (handle, (snapshots, _errors)) = start_collecting(&poller);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.state(), PollerState::Polling);
    assert!(handle.cycle_in_flight());

    // Cycles start at 0, 15 and 30; ticks at 5, 10, 20 and 25 are skipped
    sleep(Duration::from_secs(30)).await;
    let stats = handle.stats();
    assert_eq!(stats.cycles_started, 3);
    assert_eq!(stats.cycles_succeeded, 2);
    assert_eq!(stats.ticks_skipped, 4);
    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(snapshots.lock().unwrap().len(), 2);

    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_snapshots_are_cycle_ordered_and_never_mixed() {
    let (_source, aggregator) = setup(Duration::from_millis(700));
    let poller = Poller::new(aggregator, Duration::from_secs(1));
    let (handle, (snapshots, _errors)) = start_collecting(&poller);

    sleep(Duration::from_millis(10_500)).await;
    handle.stop();

    let snapshots = snapshots.lock().unwrap();
    assert!(snapshots.len() >= 10);

    let cycles: Vec<u64> = snapshots.iter().map(|s| s.cycle).collect();
    let mut sorted = cycles.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(cycles, sorted);

    for snapshot in snapshots.iter() {
        let (opportunity_tag, stats_tag, status_tag) = cycle_tag(snapshot);
        assert_eq!(opportunity_tag, stats_tag.to_string());
        assert_eq!(status_tag, stats_tag.to_string());
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_suppresses_outstanding_cycle() {
    let (source, aggregator) = setup(Duration::from_secs(3));
    let poller = Poller::new(aggregator, Duration::from_secs(5));
    let (handle, (snapshots, errors)) = start_collecting(&poller);

    sleep(Duration::from_secs(1)).await;
    handle.stop();
    assert!(handle.is_stopped());

    sleep(Duration::from_secs(10)).await;
    assert!(snapshots.lock().unwrap().is_empty());
    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(handle.stats().cycles_started, 1);
    // The request itself was allowed to finish
    assert_eq!(source.opportunities_calls.load(Ordering::SeqCst), 1);
    assert_eq!(source.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(handle.state(), PollerState::Stopped);

    // Idempotent
    handle.stop();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_cycle_keeps_last_good_snapshot() {
    let (source, aggregator) = setup(Duration::from_millis(200));
    let store = SnapshotStore::new(FailurePolicy::RetainLastGood);
    let handle = start_sync(aggregator, Duration::from_secs(5), store.clone()).unwrap();

    sleep(Duration::from_secs(1)).await;
    let first = store.current().expect("first cycle should publish");
    assert_eq!(first.cycle, 1);

    source.fail_on(Some(Resource::Opportunities));
    sleep(Duration::from_secs(5)).await;

    let view = store.view();
    assert_eq!(view.snapshot.as_ref().unwrap().cycle, 1);
    let error = view.last_error.as_ref().expect("second cycle should fail");
    assert_eq!(error.failed_resource, Resource::Opportunities);
    assert_eq!(handle.stats().consecutive_failures, 1);

    source.fail_on(None);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(store.current().unwrap().cycle, 3);
    assert!(store.last_error().is_none());
    assert_eq!(handle.stats().consecutive_failures, 0);

    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_clear_on_error_policy_through_poller() {
    let (source, aggregator) = setup(Duration::from_millis(200));
    let store = SnapshotStore::new(FailurePolicy::ClearOnError);
    let handle = start_sync(aggregator, Duration::from_secs(5), store.clone()).unwrap();

    sleep(Duration::from_secs(1)).await;
    assert!(store.current().is_some());

    source.fail_on(Some(Resource::Stats));
    sleep(Duration::from_secs(5)).await;
    assert!(store.current().is_none());
    assert_eq!(store.last_error().unwrap().failed_resource, Resource::Stats);

    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_are_counted() {
    let (source, aggregator) = setup(Duration::from_millis(100));
    source.fail_on(Some(Resource::Status));
    let poller = Poller::new(aggregator, Duration::from_secs(5));
    let (handle, (snapshots, errors)) = start_collecting(&poller);

    sleep(Duration::from_millis(10_500)).await;
    let stats = handle.stats();
    assert_eq!(stats.cycles_failed, 3);
    assert_eq!(stats.consecutive_failures, 3);
    assert!(stats.last_success_at.is_none());
    assert!(snapshots.lock().unwrap().is_empty());
    assert!(errors
        .lock()
        .unwrap()
        .iter()
        .all(|e| e.failed_resource == Resource::Status));

    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_second_start_is_refused_and_cycles_stay_single_flight() {
    let (source, aggregator) = setup(Duration::from_secs(2));
    let poller = Poller::new(aggregator, Duration::from_secs(5));
    let (handle, (snapshots, _errors)) = start_collecting(&poller);

    let second = poller.start(|_| {}, |_| {});
    assert_eq!(second.err(), Some(PollerError::AlreadyStarted));

    sleep(Duration::from_millis(500)).await;
    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(source.opportunities_calls.load(Ordering::SeqCst), 1);

    sleep(Duration::from_secs(7)).await;
    assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    let cycles: Vec<u64> = snapshots.lock().unwrap().iter().map(|s| s.cycle).collect();
    assert_eq!(cycles, vec![1, 2]);

    handle.stop();
    assert!(poller.start(|_| {}, |_| {}).is_err());
    handle.join().await;
}
