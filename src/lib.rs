pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod models;
pub mod tests;
pub mod types;
pub mod utils;

pub use config::Config;
pub use error::{AggregationError, FetchError, FetchErrorKind, PollerError};
pub use models::{Opportunity, Snapshot, Stats, Status};
pub use utils::store::{SnapshotStore, Subscription, SyncView};
