//! S3-backed [`ArchiveStore`].

use super::archive::ArchiveStore;
use crate::error::ArchiveError;
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;

pub struct S3ArchiveStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArchiveStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the standard AWS environment (credentials chain,
    /// region, profile).
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(aws_sdk_s3::Client::new(&sdk_config), bucket)
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn upload(&self, path: &Path, key: &str) -> Result<(), ArchiveError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| ArchiveError::Upload(format!("{}: {}", path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| ArchiveError::Upload(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    fn destination(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}
