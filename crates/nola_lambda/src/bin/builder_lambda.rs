use std::path::PathBuf;

use lambda_runtime::{service_fn, Error, LambdaEvent};
use nola_lambda::adapters::aws_s3::S3ObjectStore;
use nola_lambda::adapters::installer::NpmInstaller;
use nola_lambda::handlers::build::{handle_build_request, BuilderConfig};
use nola_lambda::runtime::contract::{BuildRequest, BuildResponse};
use nola_lambda::runtime::storage_keys::bucket_name_for_identity;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_SCRATCH_ROOT: &str = "/tmp";

struct RuntimeDependencies {
    config: BuilderConfig,
    installer: NpmInstaller,
    store: S3ObjectStore,
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|value| !value.trim().is_empty())
}

/// `NOLA_ARTIFACT_BUCKET` wins; otherwise the bucket is derived from the
/// function's access key so each account gets its own.
fn builder_config(lookup: impl Fn(&str) -> Option<String>) -> Result<BuilderConfig, Error> {
    let bucket = non_empty(&lookup, "NOLA_ARTIFACT_BUCKET")
        .or_else(|| {
            non_empty(&lookup, "AWS_ACCESS_KEY_ID")
                .map(|access_key| bucket_name_for_identity(&access_key))
        })
        .ok_or_else(|| {
            Error::from("NOLA_ARTIFACT_BUCKET or AWS_ACCESS_KEY_ID must be configured")
        })?;
    let scratch_root = non_empty(&lookup, "NOLA_SCRATCH_ROOT")
        .unwrap_or_else(|| DEFAULT_SCRATCH_ROOT.to_string());

    Ok(BuilderConfig {
        bucket,
        scratch_root: PathBuf::from(scratch_root),
    })
}

fn npm_installer(lookup: impl Fn(&str) -> Option<String>) -> NpmInstaller {
    let installer = non_empty(&lookup, "NOLA_NPM_PATH")
        .map(NpmInstaller::new)
        .unwrap_or_default();
    match non_empty(&lookup, "NOLA_NODE_DIR") {
        Some(node_dir) => installer.with_node_dir(node_dir),
        None => installer,
    }
}

async fn handle_request(
    event: LambdaEvent<Value>,
    deps: &RuntimeDependencies,
) -> Result<BuildResponse, Error> {
    let request_id = event.context.request_id;
    let request: BuildRequest = match serde_json::from_value(event.payload) {
        Ok(request) => request,
        Err(error) => {
            warn!(%request_id, %error, "rejecting malformed build request");
            return Ok(BuildResponse::failure(format!(
                "invalid build request: {error}"
            )));
        }
    };

    Ok(handle_build_request(
        &request,
        &request_id,
        &deps.config,
        &deps.installer,
        &deps.store,
    ))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .without_time()
        .init();

    let lookup = |name: &str| std::env::var(name).ok();
    let config = builder_config(lookup)?;
    let installer = npm_installer(lookup);
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    info!(bucket = %config.bucket, scratch_root = %config.scratch_root.display(), "builder ready");

    let deps = RuntimeDependencies {
        config,
        installer,
        store: S3ObjectStore::new(&aws_config),
    };
    let deps = &deps;
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handle_request(event, deps).await
    }))
    .await
}
