pub mod chunk;
pub mod dispatch;
pub mod driver;
pub mod entity;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use chunk::ChunkedFetcher;
pub use driver::{SyncDriver, SyncOptions, SyncStats, TriggerMode};
pub use traits::{SessionSource, SyncStore, WarehouseSyncStore};
