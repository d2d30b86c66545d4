use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nola_core::config::Config;
use nola_core::contract::{DeployAction, FunctionSpec, BUILDER_HANDLER};
use nola_lambda::adapters::invoke::{FunctionGateway, InvokeError};
use nola_lambda::archive::{pack_executable, ArchiveError};
use nola_lambda::scratch::ScratchDir;
use thiserror::Error;
use tracing::{info, warn};

pub const DEPLOY_SCRATCH_DIR_NAME: &str = ".nola-deploy";
pub const DEFAULT_BUILDER_BINARY: &str = "target/x86_64-unknown-linux-gnu/release/builder_lambda";
const CODE_ARCHIVE_NAME: &str = "builder.zip";

#[derive(Debug, Error)]
pub enum DeployError {
    #[error(
        "builder binary not found at {} (build it with `cargo run -p xtask -- builder-build`)",
        .0.display()
    )]
    MissingBinary(PathBuf),

    #[error("failed to prepare scratch directory {}: {source}", path.display())]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to package builder: {0}")]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

/// Packages the builder executable as the function's `bootstrap` and creates
/// or updates the configured build function with it.
pub fn run_deploy(
    working_dir: &Path,
    binary: &Path,
    config: &Config,
    functions: &impl FunctionGateway,
) -> Result<DeployAction, DeployError> {
    let binary = working_dir.join(binary);
    if !binary.is_file() {
        return Err(DeployError::MissingBinary(binary));
    }

    let scratch_path = working_dir.join(DEPLOY_SCRATCH_DIR_NAME);
    let scratch = ScratchDir::create(&scratch_path).map_err(|source| DeployError::Scratch {
        path: scratch_path.clone(),
        source,
    })?;

    let archive_path = scratch.path().join(CODE_ARCHIVE_NAME);
    pack_executable(&binary, BUILDER_HANDLER, &archive_path)?;
    let code_archive = fs::read(&archive_path).map_err(|source| ArchiveError::Io {
        path: archive_path.clone(),
        source,
    })?;
    info!(
        function = %config.build_function_name,
        bytes = code_archive.len(),
        "packaged builder"
    );

    let spec = FunctionSpec::builder_function(
        config.build_function_name.clone(),
        config.role.clone(),
        code_archive,
    );
    let action = functions.deploy_function(&spec)?;

    if let Err(error) = scratch.close() {
        warn!(path = %scratch_path.display(), %error, "failed to remove scratch directory");
    }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use nola_core::contract::{BUILDER_RUNTIME, BUILDER_TIMEOUT_SECONDS};
    use nola_lambda::testing::{GatewayCall, RecordingFunctionGateway};
    use zip::ZipArchive;

    use super::*;

    const ROLE: &str = "arn:aws:iam::123456789012:role/nola";

    fn sample_config() -> Config {
        format!("{{\"role\": \"{ROLE}\", \"buildFuncName\": \"my-builder\"}}")
            .parse()
            .expect("valid config")
    }

    fn write_binary(dir: &Path) -> PathBuf {
        let path = dir.join("builder_lambda");
        fs::write(&path, b"\x7fELF builder").expect("write binary");
        path
    }

    #[test]
    fn first_deploy_creates_then_second_updates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let binary = write_binary(dir.path());
        let functions = RecordingFunctionGateway::new();

        let first = run_deploy(dir.path(), &binary, &sample_config(), &functions).expect("deploy");
        let second = run_deploy(dir.path(), &binary, &sample_config(), &functions).expect("deploy");

        assert_eq!(first, DeployAction::Created);
        assert_eq!(second, DeployAction::Updated);
        assert_eq!(
            functions.calls(),
            vec![
                GatewayCall::ListFunctions,
                GatewayCall::CreateFunction("my-builder".to_string()),
                GatewayCall::ListFunctions,
                GatewayCall::UpdateFunctionCode("my-builder".to_string()),
                GatewayCall::UpdateFunctionConfiguration("my-builder".to_string()),
            ]
        );
        assert!(!dir.path().join(DEPLOY_SCRATCH_DIR_NAME).exists());
    }

    #[test]
    fn deployed_spec_wraps_binary_as_bootstrap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let binary = write_binary(dir.path());
        let functions = RecordingFunctionGateway::new();

        run_deploy(dir.path(), &binary, &sample_config(), &functions).expect("deploy");

        let specs = functions.deployed_specs();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];
        assert_eq!(spec.name, "my-builder");
        assert_eq!(spec.role, ROLE);
        assert_eq!(spec.handler, "bootstrap");
        assert_eq!(spec.runtime, BUILDER_RUNTIME);
        assert_eq!(spec.timeout_seconds, BUILDER_TIMEOUT_SECONDS);

        let mut archive = ZipArchive::new(Cursor::new(spec.code_archive.clone())).expect("zip");
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_name("bootstrap").expect("bootstrap entry");
        assert_eq!(entry.unix_mode().map(|mode| mode & 0o777), Some(0o755));
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).expect("read");
        assert_eq!(contents, b"\x7fELF builder");
    }

    #[test]
    fn relative_binary_resolves_against_working_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_binary(dir.path());
        let functions = RecordingFunctionGateway::new();

        let action = run_deploy(
            dir.path(),
            Path::new("builder_lambda"),
            &sample_config(),
            &functions,
        )
        .expect("deploy");

        assert_eq!(action, DeployAction::Created);
    }

    #[test]
    fn missing_binary_fails_before_any_remote_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let functions = RecordingFunctionGateway::new();

        let error = run_deploy(
            dir.path(),
            Path::new(DEFAULT_BUILDER_BINARY),
            &sample_config(),
            &functions,
        )
        .expect_err("missing binary");

        assert!(matches!(error, DeployError::MissingBinary(_)));
        assert!(functions.calls().is_empty());
        assert!(!dir.path().join(DEPLOY_SCRATCH_DIR_NAME).exists());
    }

    #[test]
    fn gateway_failure_still_removes_scratch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let binary = write_binary(dir.path());
        let functions = RecordingFunctionGateway::new();
        functions.fail_operation("create_function", "InvalidParameterValueException");

        let error = run_deploy(dir.path(), &binary, &sample_config(), &functions)
            .expect_err("create failure");

        assert!(error.to_string().contains("InvalidParameterValueException"));
        assert!(!dir.path().join(DEPLOY_SCRATCH_DIR_NAME).exists());
    }
}
