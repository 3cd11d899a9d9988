pub mod format;
pub mod http;
pub mod store;

pub use http::{ResourceClient, ResourceSource};
pub use store::{SnapshotStore, SyncView};
