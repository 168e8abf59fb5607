pub mod mirror;
pub mod storage;

pub use mirror::{
    mirror_attachments, object_key, parse_channel_tokens, MediaClient, MediaDownloader,
    MirrorStats, ObjectSink,
};
pub use storage::{BucketConfig, BucketStorage};
