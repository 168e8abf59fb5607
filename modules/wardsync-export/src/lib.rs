pub mod pipeline;
pub mod window;

pub use pipeline::{collect_phones, load_warehouse, write_local, ExportData, ExportPipeline};
pub use window::{local_window, warehouse_window, ExportWindow};
