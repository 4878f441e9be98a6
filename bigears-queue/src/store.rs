//! Object store destination and its S3 implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Region},
    primitives::ByteStream,
    types::{BucketCannedAcl, BucketLocationConstraint, CreateBucketConfiguration},
    Client,
};
use tracing::{debug, info};

/// Asynchronous "write object" capability of a bucket.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Write `body` under `key`. Resolves once the object is durably stored.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

    /// Remove the object under `key`. Used only for orphan cleanup.
    async fn delete_object(&self, key: &str) -> Result<()>;
}

#[async_trait]
impl<T: Store + ?Sized> Store for Arc<T> {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        (**self).put_object(key, body, content_type).await
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        (**self).delete_object(key).await
    }
}

/// Where to find the bucket.
#[derive(Debug, Clone)]
pub struct S3Options {
    /// AWS region the bucket lives in.
    pub region: String,
    /// Bucket name.
    pub name: String,
    /// Optional custom endpoint URL (LocalStack, MinIO, ...).
    pub endpoint: Option<String>,
}

/// Private S3 bucket, created on open if it does not exist yet.
#[derive(Debug, Clone)]
pub struct S3Bucket {
    client: Client,
    name: String,
}

impl S3Bucket {
    /// Build a client for the bucket's region and make sure the bucket exists.
    pub async fn open(options: S3Options) -> Result<Self> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(ref endpoint) = options.endpoint {
            builder = builder
                .endpoint_url(endpoint)
                .force_path_style(true); // Required for most S3-compatible services
        }

        let bucket = Self {
            client: Client::from_conf(builder.build()),
            name: options.name,
        };
        bucket.ensure_exists(&options.region).await?;
        Ok(bucket)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_exists(&self, region: &str) -> Result<()> {
        let head = self.client.head_bucket().bucket(&self.name).send().await;
        match head {
            Ok(_) => {
                info!(bucket = %self.name, "s3_bucket_found");
                return Ok(());
            }
            Err(err) if err.as_service_error().is_some_and(|e| e.is_not_found()) => {}
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to check bucket {}", self.name))
            }
        }

        let mut request = self
            .client
            .create_bucket()
            .bucket(&self.name)
            .acl(BucketCannedAcl::Private);

        // us-east-1 rejects an explicit location constraint
        if region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket = %self.name, region = %region, "s3_bucket_created");
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
            {
                info!(bucket = %self.name, "s3_bucket_found");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("Failed to create bucket {}", self.name)),
        }
    }
}

#[async_trait]
impl Store for S3Bucket {
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let bytes = body.len();
        self.client
            .put_object()
            .bucket(&self.name)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("Failed to write s3://{}/{}", self.name, key))?;

        debug!(bucket = %self.name, key = %key, bytes = bytes, "s3_object_written");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.name)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete s3://{}/{}", self.name, key))?;

        debug!(bucket = %self.name, key = %key, "s3_object_deleted");
        Ok(())
    }
}
