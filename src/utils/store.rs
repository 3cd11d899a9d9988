use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};
use tokio::sync::watch;
use tracing::debug;

use crate::{error::AggregationError, models::Snapshot, types::FailurePolicy};

/// What a consumer sees at any instant. Replaced wholesale on every publish.
#[derive(Debug, Clone)]
pub struct SyncView {
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_error: Option<Arc<AggregationError>>,
    pub loading: bool,
}

impl Default for SyncView {
    fn default() -> Self {
        Self {
            snapshot: None,
            last_error: None,
            loading: true,
        }
    }
}

type SnapshotCallback = Arc<dyn Fn(&Arc<Snapshot>) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&AggregationError) + Send + Sync>;

struct Subscriber {
    on_snapshot: SnapshotCallback,
    on_error: ErrorCallback,
}

struct StoreInner {
    view_tx: watch::Sender<Arc<SyncView>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscriber_id: AtomicU64,
    policy: FailurePolicy,
}

/// Single slot holding the latest snapshot, plus the callbacks that want to hear about it.
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<StoreInner>,
}

impl SnapshotStore {
    pub fn new(policy: FailurePolicy) -> Self {
        let (view_tx, _) = watch::channel(Arc::new(SyncView::default()));
        Self {
            inner: Arc::new(StoreInner {
                view_tx,
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(1),
                policy,
            }),
        }
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.inner.view_tx.borrow().snapshot.clone()
    }

    pub fn view(&self) -> Arc<SyncView> {
        self.inner.view_tx.borrow().clone()
    }

    pub fn last_error(&self) -> Option<Arc<AggregationError>> {
        self.inner.view_tx.borrow().last_error.clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<SyncView>> {
        self.inner.view_tx.subscribe()
    }

    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<S, E>(&self, on_snapshot: S, on_error: E) -> Subscription
    where
        S: Fn(&Arc<Snapshot>) + Send + Sync + 'static,
        E: Fn(&AggregationError) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().insert(
            id,
            Subscriber {
                on_snapshot: Arc::new(on_snapshot),
                on_error: Arc::new(on_error),
            },
        );
        debug!(subscriber = id, "Subscriber added");

        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    pub fn publish_snapshot(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.inner.view_tx.send_replace(Arc::new(SyncView {
            snapshot: Some(snapshot.clone()),
            last_error: None,
            loading: false,
        }));

        for subscriber in self.callbacks() {
            (subscriber.0)(&snapshot);
        }
        snapshot
    }

    pub fn publish_error(&self, error: AggregationError) {
        let error = Arc::new(error);
        let policy = self.inner.policy;
        self.inner.view_tx.send_modify(|view| {
            let snapshot = match policy {
                FailurePolicy::RetainLastGood => view.snapshot.clone(),
                FailurePolicy::ClearOnError => None,
            };
            *view = Arc::new(SyncView {
                snapshot,
                last_error: Some(error.clone()),
                loading: false,
            });
        });

        for subscriber in self.callbacks() {
            (subscriber.1)(&error);
        }
    }

    // Callbacks run outside the lock so they may subscribe or unsubscribe
    fn callbacks(&self) -> Vec<(SnapshotCallback, ErrorCallback)> {
        let mut subscribers: Vec<_> = self
            .inner
            .subscribers
            .lock()
            .iter()
            .map(|(id, s)| (*id, s.on_snapshot.clone(), s.on_error.clone()))
            .collect();
        subscribers.sort_by_key(|(id, _, _)| *id);
        subscribers.into_iter().map(|(_, s, e)| (s, e)).collect()
    }
}

/// Removes its callbacks from the store when dropped or unsubscribed.
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            inner.subscribers.lock().remove(&self.id);
            debug!(subscriber = self.id, "Subscriber removed");
        }
    }
}
