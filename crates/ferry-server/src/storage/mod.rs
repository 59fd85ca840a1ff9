//! S3-compatible staging storage

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use ferry_common::checksum::md5_hex;
use tracing::{debug, info, instrument};

use crate::ingest::ledger::ObjectFingerprint;
use crate::ingest::staging::{StagedObject, StagingStore};

pub mod config;

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub async fn new(config: config::StorageConfig) -> Result<Self> {
        debug!("Initializing storage with config: {:?}", config);

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some((access_key, secret_key)) = config.static_credentials() {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "ferry-staging",
            ));
        }

        let shared = loader.load().await;
        let mut s3_config_builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(s3_config_builder.build());

        info!("Storage client initialized for bucket: {}", config.bucket);

        Ok(Self {
            client,
            bucket: config.bucket,
        })
    }
}

#[async_trait]
impl StagingStore for Storage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<StagedObject> {
        let md5 = md5_hex(&data);
        let size_bytes = data.len() as i64;

        debug!("Uploading {} bytes to s3://{}/{}", size_bytes, self.bucket, key);

        let response = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .with_context(|| format!("Failed to upload to S3: {}", key))?;

        info!("Successfully uploaded to s3://{}/{}", self.bucket, key);

        Ok(StagedObject {
            key: key.to_string(),
            uri: self.uri(key),
            fingerprint: ObjectFingerprint {
                md5,
                size_bytes,
                generation: response.version_id().map(str::to_string),
            },
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading from s3://{}/{}", self.bucket, key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download from S3: {}", key))?;

        let data = response
            .body
            .collect()
            .await
            .context("Failed to read S3 response body")?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), self.bucket, key);

        Ok(data)
    }

    #[instrument(skip(self))]
    async fn copy(&self, from_key: &str, to_key: &str) -> Result<()> {
        let copy_source = format!("{}/{}", self.bucket, from_key);

        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(&copy_source)
            .key(to_key)
            .send()
            .await
            .with_context(|| format!("Failed to copy S3 object {} to {}", from_key, to_key))?;

        info!(
            "Successfully copied s3://{}/{} to s3://{}/{}",
            self.bucket, from_key, self.bucket, to_key
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to delete from S3: {}", key))?;

        info!("Successfully deleted s3://{}/{}", self.bucket, key);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_uri() {
        let storage = Storage {
            client: Client::from_conf(
                aws_sdk_s3::Config::builder()
                    .behavior_version(aws_config::BehaviorVersion::latest())
                    .build(),
            ),
            bucket: "ferry-staging".to_string(),
        };

        assert_eq!(
            storage.uri("incoming/payments/2025/11/15/p.csv.gz"),
            "s3://ferry-staging/incoming/payments/2025/11/15/p.csv.gz"
        );
    }
}
