pub mod config;
pub mod dates;
pub mod hash;
pub mod records;

pub use config::{Config, Environment};
pub use dates::{candidate_chunk_sizes, date_chunks, DateWindow, EXTRACTION_FLOOR};
pub use hash::content_hash;
pub use records::{add_provenance, stamp_content_hash, MessageAttachment, SyncUser};
