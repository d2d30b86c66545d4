use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::debug;

const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} install failed ({status}): {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
}

/// Installs production dependencies for the manifest in `project_dir`.
pub trait DependencyInstaller {
    fn install(&self, project_dir: &Path, cache_dir: &Path) -> Result<(), InstallError>;
}

/// Runs `npm install --production` with a request-scoped cache. The home
/// directory of the function is read-only, so npm and node-gyp must never
/// fall back to it.
#[derive(Debug, Clone)]
pub struct NpmInstaller {
    program: String,
    node_dir: Option<PathBuf>,
}

impl NpmInstaller {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            node_dir: None,
        }
    }

    /// Node headers used by node-gyp for native modules.
    pub fn with_node_dir(mut self, node_dir: impl Into<PathBuf>) -> Self {
        self.node_dir = Some(node_dir.into());
        self
    }
}

impl Default for NpmInstaller {
    fn default() -> Self {
        Self::new("npm")
    }
}

impl DependencyInstaller for NpmInstaller {
    fn install(&self, project_dir: &Path, cache_dir: &Path) -> Result<(), InstallError> {
        let mut command = Command::new(&self.program);
        command
            .arg("install")
            .arg("--production")
            .current_dir(project_dir)
            .env("npm_config_cache", cache_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(node_dir) = &self.node_dir {
            command.env("npm_config_nodedir", node_dir);
        }

        debug!(program = %self.program, dir = %project_dir.display(), "spawning installer");
        let output = command.output().map_err(|source| InstallError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        debug!(
            stdout = %String::from_utf8_lossy(&output.stdout),
            "installer output"
        );

        if !output.status.success() {
            return Err(InstallError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(())
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}
