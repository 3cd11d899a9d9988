use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    engine::aggregator::SnapshotAggregator,
    error::{AggregationError, PollerError},
    models::Snapshot,
    types::PollerState,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollerStats {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub ticks_skipped: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
}

type SnapshotFn = Arc<dyn Fn(Snapshot) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(AggregationError) + Send + Sync>;

struct Shared {
    started: AtomicBool,
    state: AtomicU8,
    in_flight: AtomicBool,
    stats: Mutex<PollerStats>,
    shutdown: CancellationToken,
    // Held while a result is handed to the callbacks; stop() takes it to wait out a delivery
    delivery: ReentrantMutex<()>,
    current_cycle: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn set_state(&self, next: PollerState) {
        // Stopped is terminal
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            if PollerState::from_u8(current) == PollerState::Stopped {
                None
            } else {
                Some(next.as_u8())
            }
        });
    }
}

/// Runs aggregation cycles on a fixed interval, one at a time.
pub struct Poller {
    aggregator: Arc<SnapshotAggregator>,
    interval: Duration,
    shared: Arc<Shared>,
}

impl Poller {
    pub fn new(aggregator: Arc<SnapshotAggregator>, interval: Duration) -> Self {
        Self {
            aggregator,
            interval,
            shared: Arc::new(Shared {
                started: AtomicBool::new(false),
                state: AtomicU8::new(PollerState::Idle.as_u8()),
                in_flight: AtomicBool::new(false),
                stats: Mutex::new(PollerStats::default()),
                shutdown: CancellationToken::new(),
                delivery: ReentrantMutex::new(()),
                current_cycle: Mutex::new(None),
            }),
        }
    }

    /// Starts polling. The first cycle runs right away; later ticks that land while a
    /// cycle is still outstanding are skipped rather than queued.
    ///
    /// A poller runs at most once: a second call fails even after the first handle stopped.
    pub fn start<S, E>(&self, on_snapshot: S, on_error: E) -> Result<PollerHandle, PollerError>
    where
        S: Fn(Snapshot) + Send + Sync + 'static,
        E: Fn(AggregationError) + Send + Sync + 'static,
    {
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Poller already started, refusing second start");
            return Err(PollerError::AlreadyStarted);
        }

        let shared = self.shared.clone();
        let on_snapshot: SnapshotFn = Arc::new(on_snapshot);
        let on_error: ErrorFn = Arc::new(on_error);
        let aggregator = self.aggregator.clone();
        let interval = self.interval;

        info!("Starting poller (interval: {:?})", interval);

        let timer = tokio::spawn(run_timer(shared.clone(), aggregator, interval, on_snapshot, on_error));

        Ok(PollerHandle {
            shared,
            timer: Some(timer),
        })
    }
}

async fn run_timer(
    shared: Arc<Shared>,
    aggregator: Arc<SnapshotAggregator>,
    interval: Duration,
    on_snapshot: SnapshotFn,
    on_error: ErrorFn,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        // The first tick completes immediately
        tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if shared
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            shared.stats.lock().ticks_skipped += 1;
            debug!("Previous cycle still outstanding, skipping tick");
            continue;
        }

        shared.stats.lock().cycles_started += 1;
        shared.set_state(PollerState::Polling);

        let cycle = tokio::spawn(run_cycle(
            shared.clone(),
            aggregator.clone(),
            on_snapshot.clone(),
            on_error.clone(),
        ));
        *shared.current_cycle.lock() = Some(cycle);
    }

    debug!("Poller timer exited");
}

async fn run_cycle(
    shared: Arc<Shared>,
    aggregator: Arc<SnapshotAggregator>,
    on_snapshot: SnapshotFn,
    on_error: ErrorFn,
) {
    let result = aggregator.aggregate().await;

    {
        let _delivery = shared.delivery.lock();

        if shared.shutdown.is_cancelled() {
            debug!("Poller stopped while cycle was outstanding, discarding result");
        } else {
            match result {
                Ok(snapshot) => {
                    {
                        let mut stats = shared.stats.lock();
                        stats.cycles_succeeded += 1;
                        stats.consecutive_failures = 0;
                        stats.last_success_at = Some(snapshot.fetched_at);
                    }
                    on_snapshot(snapshot);
                }
                Err(e) => {
                    let consecutive_failures = {
                        let mut stats = shared.stats.lock();
                        stats.cycles_failed += 1;
                        stats.consecutive_failures += 1;
                        stats.consecutive_failures
                    };
                    if consecutive_failures > 1 {
                        error!("Poll cycle failed: {} (consecutive failures: {})", e, consecutive_failures);
                    } else {
                        warn!("Poll cycle failed: {}", e);
                    }
                    on_error(e);
                }
            }
        }

        shared.set_state(PollerState::Idle);
    }

    shared.in_flight.store(false, Ordering::Release);
}

pub struct PollerHandle {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
}

impl PollerHandle {
    /// Cancels the timer. An outstanding cycle is left to finish but its result is dropped.
    /// Once this returns no callback will fire. Safe to call more than once.
    pub fn stop(&self) {
        let previous = self.shared.state.swap(PollerState::Stopped.as_u8(), Ordering::AcqRel);
        self.shared.shutdown.cancel();

        // Wait out a delivery already in progress
        drop(self.shared.delivery.lock());

        if PollerState::from_u8(previous) != PollerState::Stopped {
            info!("Poller stopped");
        }
    }

    pub fn state(&self) -> PollerState {
        PollerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PollerState::Stopped
    }

    pub fn stats(&self) -> PollerStats {
        self.shared.stats.lock().clone()
    }

    pub fn cycle_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Stops the poller and waits for the timer and any outstanding cycle to wind down.
    pub async fn join(mut self) {
        self.stop();

        if let Some(timer) = self.timer.take() {
            if let Err(e) = timer.await {
                error!("Poller timer task failed: {}", e);
            }
        }

        let cycle = self.shared.current_cycle.lock().take();
        if let Some(cycle) = cycle {
            if let Err(e) = cycle.await {
                error!("Poll cycle task failed: {}", e);
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
