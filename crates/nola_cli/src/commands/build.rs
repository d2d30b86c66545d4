use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nola_core::config::Config;
use nola_core::contract::{ArtifactLocation, BuildRequest, BuildResponse, Manifest, ResponseError};
use nola_core::storage_keys::{ARTIFACT_FILE_NAME, DEPENDENCY_DIR_NAME};
use nola_lambda::adapters::invoke::{FunctionGateway, InvokeError};
use nola_lambda::adapters::object_store::{ObjectStore, StoreError};
use nola_lambda::archive::{ArchiveError, ArchiveReader};
use nola_lambda::handlers::build::MANIFEST_FILE_NAME;
use nola_lambda::scratch::ScratchDir;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const BUILD_SCRATCH_DIR_NAME: &str = ".nola-temp";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to prepare scratch directory {}: {source}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read manifest {}: {source}", path.display())]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("manifest {} is invalid: {source}", path.display())]
    ManifestInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode build request: {0}")]
    Encode(serde_json::Error),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("{0}")]
    Remote(String),

    #[error("malformed build response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to write {}: {source}", path.display())]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove existing dependencies at {}: {source}", path.display())]
    ReplaceDependencies {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to unpack dependency archive: {0}")]
    Archive(#[from] ArchiveError),
}

/// Deletes the remote artifact when dropped. Failures are logged only.
struct RemoteArtifact<'a, S: ObjectStore> {
    store: &'a S,
    location: &'a ArtifactLocation,
}

impl<S: ObjectStore> Drop for RemoteArtifact<'_, S> {
    fn drop(&mut self) {
        let ArtifactLocation { bucket, key, .. } = self.location;
        match self.store.delete(bucket, key) {
            Ok(()) => debug!(%bucket, %key, "removed remote artifact"),
            Err(error) => warn!(%bucket, %key, %error, "failed to remove remote artifact"),
        }
    }
}

/// Builds the dependencies of the project in `project_dir` remotely and
/// replaces its `node_modules` with the result.
pub fn run_build(
    project_dir: &Path,
    config: &Config,
    functions: &impl FunctionGateway,
    store: &impl ObjectStore,
) -> Result<ArtifactLocation, BuildError> {
    let scratch_path = project_dir.join(BUILD_SCRATCH_DIR_NAME);
    let scratch = ScratchDir::create(&scratch_path).map_err(|source| BuildError::Scratch {
        path: scratch_path.clone(),
        source,
    })?;

    let manifest = read_manifest(&project_dir.join(MANIFEST_FILE_NAME))?;
    info!(
        manifest = %manifest,
        function = %config.build_function_name,
        "requesting remote build"
    );
    let payload =
        serde_json::to_value(BuildRequest::new(manifest)).map_err(BuildError::Encode)?;

    let reply = functions.invoke(&config.build_function_name, &payload)?;
    let location = decode_reply(reply)?;
    let remote = RemoteArtifact {
        store,
        location: &location,
    };

    info!(bucket = %location.bucket, key = %location.key, "downloading dependency archive");
    let body = store.download(&location.bucket, &location.key)?;
    let archive_path = scratch.path().join(ARTIFACT_FILE_NAME);
    fs::write(&archive_path, &body).map_err(|source| BuildError::ArtifactWrite {
        path: archive_path.clone(),
        source,
    })?;

    let reader = ArchiveReader::open(&archive_path)?;
    replace_dependency_dir(project_dir)?;
    let entries = reader.extract_into(project_dir)?;
    info!(entries, dir = %project_dir.display(), "unpacked dependencies");

    drop(remote);
    if let Err(error) = scratch.close() {
        warn!(path = %scratch_path.display(), %error, "failed to remove scratch directory");
    }

    Ok(location)
}

fn read_manifest(path: &Path) -> Result<Manifest, BuildError> {
    let bytes = fs::read(path).map_err(|source| BuildError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| BuildError::ManifestInvalid {
        path: path.to_path_buf(),
        source,
    })
}

fn decode_reply(reply: serde_json::Value) -> Result<ArtifactLocation, BuildError> {
    let response: BuildResponse = serde_json::from_value(reply)
        .map_err(|error| BuildError::MalformedResponse(error.to_string()))?;

    response.into_result().map_err(|error| match error {
        ResponseError::Remote(message) => BuildError::Remote(message),
        ResponseError::MissingLocation => BuildError::MalformedResponse(error.to_string()),
    })
}

fn replace_dependency_dir(project_dir: &Path) -> Result<(), BuildError> {
    let modules = project_dir.join(DEPENDENCY_DIR_NAME);
    match fs::remove_dir_all(&modules) {
        Ok(()) => {
            debug!(path = %modules.display(), "removed existing dependency directory");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(BuildError::ReplaceDependencies {
            path: modules,
            source,
        }),
    }
}
