use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Key prefix of the resized copies handed to the vision model.
pub const RESIZED_IMAGES_PREFIX: &str = "resized-images";

/// Object key of a resized image.
pub fn resized_image_key(request_id: &str, image_id: &str) -> String {
    format!("{}/{}/{}.jpg", RESIZED_IMAGES_PREFIX, request_id, image_id)
}

/// Produces time-limited read URLs for stored objects.
#[async_trait]
pub trait ReadUrlSigner: Send + Sync {
    async fn read_url(&self, key: &str) -> Result<String, StorageError>;
}

/// Client for S3-compatible object storage.
pub struct ObjectStorage {
    bucket: Box<Bucket>,
    presign_expiry_secs: u32,
}

impl ObjectStorage {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        presign_expiry_secs: u32,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?
            .with_path_style();

        Ok(Self {
            bucket,
            presign_expiry_secs,
        })
    }

    /// Upload image bytes.
    pub async fn upload(&self, key: &str, data: &[u8], content_type: &str) -> Result<(), StorageError> {
        self.bucket
            .put_object_with_content_type(key, data, content_type)
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }

    /// Download image bytes.
    pub async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        Ok(response.to_vec())
    }

    /// Delete an object.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        Ok(())
    }
}

#[async_trait]
impl ReadUrlSigner for ObjectStorage {
    async fn read_url(&self, key: &str) -> Result<String, StorageError> {
        self.bucket
            .presign_get(key, self.presign_expiry_secs, None)
            .await
            .map_err(StorageError::S3)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
