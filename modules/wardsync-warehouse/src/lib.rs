pub mod attachments;
pub mod migrate;
pub mod store;
pub mod watermark;

pub use attachments::AttachmentRepo;
pub use migrate::migrate;
pub use store::{Disposition, WarehouseStore};
pub use watermark::WatermarkRepo;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Connect to the warehouse. Pool is sized for the sync worker count plus
/// a little headroom for the watermark statements.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .context("Failed to connect to warehouse")
}
