//! Project configuration read from the `.nola` file.
//!
//! `role` is mandatory; `region` and `buildFuncName` fall back to defaults when
//! absent or empty. The file is read once per command and never mutated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = ".nola";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_BUILD_FUNCTION_NAME: &str = "nola-builder";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config file is not valid JSON")]
    Parse(#[from] serde_json::Error),

    #[error("AWS 'role' not set in .nola config file")]
    MissingRole,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub region: String,
    pub role: String,
    pub build_function_name: String,
    /// Shared-credentials profile used for every AWS client of the command.
    pub profile: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    role: Option<String>,
    region: Option<String>,
    #[serde(rename = "buildFuncName")]
    build_func_name: Option<String>,
    profile: Option<String>,
}

impl Config {
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(CONFIG_FILE_NAME)
    }

    /// Loads `<dir>/.nola`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = Self::path_in(dir);
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        text.parse()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let raw: RawConfig = serde_json::from_str(text)?;

        let role = non_empty(raw.role).ok_or(ConfigError::MissingRole)?;

        Ok(Self {
            region: non_empty(raw.region).unwrap_or_else(|| DEFAULT_REGION.to_string()),
            role,
            build_function_name: non_empty(raw.build_func_name)
                .unwrap_or_else(|| DEFAULT_BUILD_FUNCTION_NAME.to_string()),
            profile: non_empty(raw.profile),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
