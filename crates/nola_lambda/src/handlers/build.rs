use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info};

use crate::adapters::installer::{DependencyInstaller, InstallError};
use crate::adapters::object_store::{ObjectStore, StoreError};
use crate::archive::{pack_directory, ArchiveError};
use crate::runtime::contract::{ArtifactLocation, BuildRequest, BuildResponse};
use crate::runtime::storage_keys::{artifact_object_key, ARTIFACT_FILE_NAME, DEPENDENCY_DIR_NAME};
use crate::scratch::ScratchDir;

pub const MANIFEST_FILE_NAME: &str = "package.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
    pub bucket: String,
    pub scratch_root: PathBuf,
}

/// Request-scoped paths under the scratch root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchPaths {
    pub workspace: PathBuf,
    pub module_cache: PathBuf,
}

impl ScratchPaths {
    pub fn for_request(scratch_root: &Path, request_id: &str) -> Self {
        Self {
            workspace: scratch_root.join(request_id),
            module_cache: scratch_root.join(format!(".npm-{request_id}")),
        }
    }
}

#[derive(Debug, Error)]
enum BuildFailure {
    #[error("invalid request id {0:?}")]
    InvalidRequestId(String),

    #[error("failed to prepare {}: {source}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write package.json: {0}")]
    Manifest(String),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error("failed to zip node_modules: {0}")]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Builds the dependency archive for one invocation and publishes it. Never
/// fails: every fault becomes a failure response.
pub fn handle_build_request(
    request: &BuildRequest,
    request_id: &str,
    config: &BuilderConfig,
    installer: &impl DependencyInstaller,
    store: &impl ObjectStore,
) -> BuildResponse {
    let started_at = Instant::now();
    info!(
        request_id,
        manifest = %request.package_json,
        "building dependencies"
    );

    match build_and_publish(request, request_id, config, installer, store) {
        Ok(location) => {
            info!(
                request_id,
                bucket = %location.bucket,
                key = %location.key,
                duration_ms = started_at.elapsed().as_millis() as u64,
                "dependencies built"
            );
            BuildResponse::success(location)
        }
        Err(failure) => {
            error!(
                request_id,
                error = %failure,
                duration_ms = started_at.elapsed().as_millis() as u64,
                "dependency build failed"
            );
            BuildResponse::failure(failure.to_string())
        }
    }
}

fn build_and_publish(
    request: &BuildRequest,
    request_id: &str,
    config: &BuilderConfig,
    installer: &impl DependencyInstaller,
    store: &impl ObjectStore,
) -> Result<ArtifactLocation, BuildFailure> {
    validate_request_id(request_id)?;

    let paths = ScratchPaths::for_request(&config.scratch_root, request_id);
    let workspace = create_scratch(&paths.workspace)?;
    let module_cache = create_scratch(&paths.module_cache)?;

    let manifest = request
        .package_json
        .to_json_bytes()
        .map_err(|error| BuildFailure::Manifest(error.to_string()))?;
    fs::write(workspace.path().join(MANIFEST_FILE_NAME), manifest)
        .map_err(|error| BuildFailure::Manifest(error.to_string()))?;

    info!(request_id, "installing dependencies");
    installer.install(workspace.path(), module_cache.path())?;

    info!(request_id, "zipping node_modules");
    let archive_path = workspace.path().join(ARTIFACT_FILE_NAME);
    pack_directory(
        &workspace.path().join(DEPENDENCY_DIR_NAME),
        DEPENDENCY_DIR_NAME,
        &archive_path,
    )?;
    let body = fs::read(&archive_path).map_err(|source| BuildFailure::Scratch {
        path: archive_path.clone(),
        source,
    })?;

    store.ensure_bucket(&config.bucket)?;
    let key = artifact_object_key(request_id);
    info!(request_id, bucket = %config.bucket, key = %key, bytes = body.len(), "uploading artifact");
    let url = store.upload(&config.bucket, &key, &body)?;

    Ok(ArtifactLocation {
        bucket: config.bucket.clone(),
        key,
        url,
    })
}

fn validate_request_id(request_id: &str) -> Result<(), BuildFailure> {
    let unsafe_id = request_id.trim().is_empty()
        || request_id.contains(['/', '\\'])
        || request_id.contains("..");
    if unsafe_id {
        return Err(BuildFailure::InvalidRequestId(request_id.to_string()));
    }
    Ok(())
}

fn create_scratch(path: &Path) -> Result<ScratchDir, BuildFailure> {
    ScratchDir::create(path).map_err(|source| BuildFailure::Scratch {
        path: path.to_path_buf(),
        source,
    })
}
