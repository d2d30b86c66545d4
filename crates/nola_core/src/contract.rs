use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const BUILDER_HANDLER: &str = "bootstrap";
pub const BUILDER_RUNTIME: &str = "provided.al2023";
pub const BUILDER_DESCRIPTION: &str = "Nola build server";
pub const BUILDER_TIMEOUT_SECONDS: i32 = 300;
pub const SUCCESS_MESSAGE: &str = "success";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Project manifest (`package.json`), passed through to the package manager
/// untouched. The only structural requirement is that it is a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Manifest(Value);

impl Manifest {
    pub fn name(&self) -> &str {
        self.0.get("name").and_then(Value::as_str).unwrap_or("<unnamed>")
    }

    pub fn version(&self) -> &str {
        self.0
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("<unversioned>")
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.0)
    }
}

impl TryFrom<Value> for Manifest {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if !value.is_object() {
            return Err(ValidationError::new("Manifest must be a JSON object"));
        }
        Ok(Self(value))
    }
}

impl From<Manifest> for Value {
    fn from(manifest: Manifest) -> Self {
        manifest.0
    }
}

impl fmt::Display for Manifest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name(), self.version())
    }
}

/// Payload sent to the build function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(rename = "packageJson")]
    pub package_json: Manifest,
}

impl BuildRequest {
    pub fn new(package_json: Manifest) -> Self {
        Self { package_json }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub bucket: String,
    pub key: String,
    pub url: String,
}

/// Structured reply of the build function. Always produced, even on failure,
/// and always either fully a success or fully a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResponse {
    pub error: bool,
    #[serde(default)]
    pub message: String,
    pub url: Option<String>,
    pub bucket: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("{0}")]
    Remote(String),
    #[error("build response reported success without an artifact location")]
    MissingLocation,
}

impl BuildResponse {
    pub fn success(location: ArtifactLocation) -> Self {
        Self {
            error: false,
            message: SUCCESS_MESSAGE.to_string(),
            url: Some(location.url),
            bucket: Some(location.bucket),
            key: Some(location.key),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            url: None,
            bucket: None,
            key: None,
        }
    }

    pub fn into_result(self) -> Result<ArtifactLocation, ResponseError> {
        if self.error {
            return Err(ResponseError::Remote(self.message));
        }

        match (self.bucket, self.key, self.url) {
            (Some(bucket), Some(key), Some(url)) => Ok(ArtifactLocation { bucket, key, url }),
            _ => Err(ResponseError::MissingLocation),
        }
    }
}

/// Everything needed to create or update the build function. `name` is the
/// identity key.
#[derive(Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub handler: String,
    pub runtime: String,
    pub role: String,
    pub description: String,
    pub timeout_seconds: i32,
    pub code_archive: Vec<u8>,
}

impl FunctionSpec {
    pub fn builder_function(
        name: impl Into<String>,
        role: impl Into<String>,
        code_archive: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            handler: BUILDER_HANDLER.to_string(),
            runtime: BUILDER_RUNTIME.to_string(),
            role: role.into(),
            description: BUILDER_DESCRIPTION.to_string(),
            timeout_seconds: BUILDER_TIMEOUT_SECONDS,
            code_archive,
        }
    }
}

impl fmt::Debug for FunctionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSpec")
            .field("name", &self.name)
            .field("handler", &self.handler)
            .field("runtime", &self.runtime)
            .field("role", &self.role)
            .field("description", &self.description)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("code_archive_bytes", &self.code_archive.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployAction {
    Created,
    Updated,
}

impl fmt::Display for DeployAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
        }
    }
}
