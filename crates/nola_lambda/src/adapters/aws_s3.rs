use std::time::Duration;

use aws_sdk_s3::client::Waiters;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketCannedAcl, BucketLocationConstraint, CreateBucketConfiguration};
use nola_core::storage_keys::{object_url, DEFAULT_S3_REGION};
use tracing::debug;

use super::block_on;
use super::object_store::{ObjectStore, StoreError};

/// Upper bound for the read-after-write wait (20 polls of 5 s in the classic
/// SDK waiter).
const OBJECT_VISIBLE_MAX_WAIT: Duration = Duration::from_secs(100);

#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    region: String,
}

impl S3ObjectStore {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        let region = sdk_config
            .region()
            .map(ToString::to_string)
            .unwrap_or_else(|| DEFAULT_S3_REGION.to_string());
        Self {
            client: aws_sdk_s3::Client::new(sdk_config),
            region,
        }
    }
}

impl ObjectStore for S3ObjectStore {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        block_on(async {
            match self.client.head_bucket().bucket(bucket).send().await {
                Ok(_) => Ok(true),
                Err(error)
                    if error
                        .as_service_error()
                        .is_some_and(|service_error| service_error.is_not_found()) =>
                {
                    Ok(false)
                }
                Err(error) => Err(transport("head_bucket", error)),
            }
        })
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        let mut request = self
            .client
            .create_bucket()
            .bucket(bucket)
            .acl(BucketCannedAcl::Private);
        if self.region != DEFAULT_S3_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }

        block_on(async {
            match request.send().await {
                Ok(_) => Ok(()),
                Err(error)
                    if error.as_service_error().is_some_and(|service_error| {
                        service_error.is_bucket_already_owned_by_you()
                    }) =>
                {
                    Err(StoreError::BucketAlreadyExists(bucket.to_string()))
                }
                Err(error) => Err(transport("create_bucket", error)),
            }
        })
    }

    fn upload(&self, bucket: &str, key: &str, body: &[u8]) -> Result<String, StoreError> {
        block_on(async {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(ByteStream::from(body.to_vec()))
                .send()
                .await
                .map_err(|error| transport("put_object", error))?;

            debug!(bucket, key, "waiting for object to become visible");
            self.client
                .wait_until_object_exists()
                .bucket(bucket)
                .key(key)
                .wait(OBJECT_VISIBLE_MAX_WAIT)
                .await
                .map_err(|error| transport("wait_until_object_exists", error))?;

            Ok(object_url(bucket, &self.region, key))
        })
    }

    fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|error| {
                    let missing = error
                        .as_service_error()
                        .is_some_and(|service_error| service_error.is_no_such_key());
                    if missing {
                        StoreError::NotFound {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        }
                    } else {
                        transport("get_object", error)
                    }
                })?;

            let body = output
                .body
                .collect()
                .await
                .map_err(|error| transport("get_object body", error))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        block_on(async {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| transport("delete_object", error))
        })
    }
}

fn transport<E: std::error::Error>(operation: &'static str, error: E) -> StoreError {
    StoreError::Transport {
        operation,
        message: DisplayErrorContext(error).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_s3::operation::create_bucket::{CreateBucketError, CreateBucketOutput};
    use aws_sdk_s3::operation::get_object::GetObjectError;
    use aws_sdk_s3::operation::head_bucket::{HeadBucketError, HeadBucketOutput};
    use aws_sdk_s3::types::error::{BucketAlreadyOwnedByYou, NoSuchKey, NotFound};
    use aws_smithy_mocks::{mock, mock_client};

    use super::*;

    fn store(client: aws_sdk_s3::Client, region: &str) -> S3ObjectStore {
        S3ObjectStore {
            client,
            region: region.to_string(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn head_not_found_means_bucket_is_missing() {
        let rule = mock!(aws_sdk_s3::Client::head_bucket)
            .then_error(|| HeadBucketError::NotFound(NotFound::builder().build()));
        let store = store(mock_client!(aws_sdk_s3, [&rule]), DEFAULT_S3_REGION);

        assert!(!store.bucket_exists("nola-abc").expect("not found is not an error"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn head_success_means_bucket_exists() {
        let rule = mock!(aws_sdk_s3::Client::head_bucket)
            .match_requests(|request| request.bucket() == Some("nola-abc"))
            .then_output(|| HeadBucketOutput::builder().build());
        let store = store(mock_client!(aws_sdk_s3, [&rule]), DEFAULT_S3_REGION);

        assert!(store.bucket_exists("nola-abc").expect("head should succeed"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bucket_owned_by_caller_reports_already_exists() {
        let rule = mock!(aws_sdk_s3::Client::create_bucket).then_error(|| {
            CreateBucketError::BucketAlreadyOwnedByYou(BucketAlreadyOwnedByYou::builder().build())
        });
        let store = store(mock_client!(aws_sdk_s3, [&rule]), DEFAULT_S3_REGION);

        assert_eq!(
            store.create_bucket("nola-abc"),
            Err(StoreError::BucketAlreadyExists("nola-abc".to_string()))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn us_east_1_bucket_has_no_location_constraint() {
        let rule = mock!(aws_sdk_s3::Client::create_bucket)
            .match_requests(|request| {
                request.acl() == Some(&BucketCannedAcl::Private)
                    && request.create_bucket_configuration().is_none()
            })
            .then_output(|| CreateBucketOutput::builder().build());
        let store = store(mock_client!(aws_sdk_s3, [&rule]), "us-east-1");

        store
            .create_bucket("nola-abc")
            .expect("private bucket without constraint");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn other_regions_send_location_constraint() {
        let rule = mock!(aws_sdk_s3::Client::create_bucket)
            .match_requests(|request| {
                request
                    .create_bucket_configuration()
                    .and_then(|configuration| configuration.location_constraint())
                    == Some(&BucketLocationConstraint::EuWest1)
            })
            .then_output(|| CreateBucketOutput::builder().build());
        let store = store(mock_client!(aws_sdk_s3, [&rule]), "eu-west-1");

        store
            .create_bucket("nola-abc")
            .expect("bucket with eu-west-1 constraint");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_key_reports_not_found() {
        let rule = mock!(aws_sdk_s3::Client::get_object)
            .then_error(|| GetObjectError::NoSuchKey(NoSuchKey::builder().build()));
        let store = store(mock_client!(aws_sdk_s3, [&rule]), DEFAULT_S3_REGION);

        assert_eq!(
            store.download("nola-abc", "req-1/node_modules.zip"),
            Err(StoreError::NotFound {
                bucket: "nola-abc".to_string(),
                key: "req-1/node_modules.zip".to_string(),
            })
        );
    }
}
