use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use tracing::debug;

use wardsync_common::Config;

use crate::mirror::ObjectSink;

/// S3-compatible bucket credentials, pulled from the optional object
/// storage fields of the shared config.
#[derive(Clone, Debug)]
pub struct BucketConfig {
    pub endpoint_url: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl BucketConfig {
    /// Fails with the full list of missing variables rather than the first,
    /// so a misconfigured CI run needs one fix round, not four.
    pub fn from_config(config: &Config) -> Result<Self> {
        let fields = [
            ("BUCKET_ENDPOINT_URL", &config.bucket_endpoint),
            ("BUCKET_NAME", &config.bucket_name),
            ("BUCKET_ACCESS_KEY_ID", &config.bucket_access_key_id),
            ("BUCKET_SECRET_ACCESS_KEY", &config.bucket_secret_access_key),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            bail!("bucket configuration incomplete, missing: {}", missing.join(", "));
        }

        Ok(Self {
            endpoint_url: config.bucket_endpoint.clone().unwrap_or_default(),
            bucket: config.bucket_name.clone().unwrap_or_default(),
            access_key_id: config.bucket_access_key_id.clone().unwrap_or_default(),
            secret_access_key: config.bucket_secret_access_key.clone().unwrap_or_default(),
        })
    }
}

/// Object storage backed by any S3-compatible bucket endpoint.
pub struct BucketStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl BucketStorage {
    pub fn new(config: BucketConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "wardsync-attachments",
        );
        let sdk_config = aws_sdk_s3::config::Builder::new()
            .region(Region::new("auto"))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url)
            .force_path_style(true)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(sdk_config),
            bucket: config.bucket,
        }
    }
}

#[async_trait]
impl ObjectSink for BucketStorage {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: Option<&str>) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes));
        if let Some(content_type) = content_type {
            request = request.content_type(content_type);
        }
        request
            .send()
            .await
            .with_context(|| format!("put_object failed for {}/{key}", self.bucket))?;

        debug!(key, "Uploaded attachment");
        Ok(())
    }
}
