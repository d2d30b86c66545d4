use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("bucket {0} already exists")]
    BucketAlreadyExists(String),

    #[error("object s3://{bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },
}

/// Bucket/object operations used to hand the artifact from the build function
/// to the client. Every call is a single attempt; faults are returned as-is.
pub trait ObjectStore {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError>;

    /// Creates a private bucket. Reports [`StoreError::BucketAlreadyExists`]
    /// when the bucket was created by a concurrent caller.
    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Writes the object and only returns once it is readable. Returns the
    /// object URL.
    fn upload(&self, bucket: &str, key: &str, body: &[u8]) -> Result<String, StoreError>;

    fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Check-then-create. Losing the creation race to another invocation is
    /// success.
    fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        if self.bucket_exists(bucket)? {
            return Ok(());
        }

        match self.create_bucket(bucket) {
            Ok(()) => {
                info!(bucket, "created artifact bucket");
                Ok(())
            }
            Err(StoreError::BucketAlreadyExists(_)) => {
                debug!(bucket, "artifact bucket was created concurrently");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }
}
