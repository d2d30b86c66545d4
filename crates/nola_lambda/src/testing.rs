//! In-memory gateways for exercising handlers and orchestrators without AWS.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use nola_core::contract::FunctionSpec;
use nola_core::storage_keys::{object_url, DEFAULT_S3_REGION, DEPENDENCY_DIR_NAME};
use serde_json::Value;

use crate::adapters::installer::{DependencyInstaller, InstallError};
use crate::adapters::invoke::{FunctionGateway, InvokeError};
use crate::adapters::object_store::{ObjectStore, StoreError};

type Failures = Mutex<HashMap<&'static str, String>>;

fn injected_failure(failures: &Failures, operation: &'static str) -> Option<String> {
    failures
        .lock()
        .expect("poisoned mutex")
        .get(operation)
        .cloned()
}

pub struct MemoryObjectStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    hidden_buckets: Mutex<BTreeSet<String>>,
    failures: Failures,
    operations: Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            hidden_buckets: Mutex::new(BTreeSet::new()),
            failures: Mutex::new(HashMap::new()),
            operations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        self.buckets
            .lock()
            .expect("poisoned mutex")
            .entry(bucket.to_string())
            .or_default();
        self
    }

    /// Makes `bucket_exists` answer false for an existing bucket, as seen by
    /// an invocation that lost the creation race.
    pub fn report_bucket_missing(&self, bucket: &str) {
        self.hidden_buckets
            .lock()
            .expect("poisoned mutex")
            .insert(bucket.to_string());
    }

    /// Makes every later call of `operation` fail with a transport fault.
    pub fn fail_operation(&self, operation: &'static str, message: &str) {
        self.failures
            .lock()
            .expect("poisoned mutex")
            .insert(operation, message.to_string());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets
            .lock()
            .expect("poisoned mutex")
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
    }

    pub fn object_keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .lock()
            .expect("poisoned mutex")
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn bucket_names(&self) -> Vec<String> {
        self.buckets
            .lock()
            .expect("poisoned mutex")
            .keys()
            .cloned()
            .collect()
    }

    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().expect("poisoned mutex").clone()
    }

    fn record(&self, operation: &'static str, target: String) -> Result<(), StoreError> {
        self.operations
            .lock()
            .expect("poisoned mutex")
            .push(format!("{operation} {target}"));
        match injected_failure(&self.failures, operation) {
            Some(message) => Err(StoreError::Transport { operation, message }),
            None => Ok(()),
        }
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, StoreError> {
        self.record("bucket_exists", bucket.to_string())?;
        if self
            .hidden_buckets
            .lock()
            .expect("poisoned mutex")
            .contains(bucket)
        {
            return Ok(false);
        }
        Ok(self
            .buckets
            .lock()
            .expect("poisoned mutex")
            .contains_key(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.record("create_bucket", bucket.to_string())?;
        let mut buckets = self.buckets.lock().expect("poisoned mutex");
        if buckets.contains_key(bucket) {
            return Err(StoreError::BucketAlreadyExists(bucket.to_string()));
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    fn upload(&self, bucket: &str, key: &str, body: &[u8]) -> Result<String, StoreError> {
        self.record("upload", format!("{bucket}/{key}"))?;
        let mut buckets = self.buckets.lock().expect("poisoned mutex");
        let objects = buckets.get_mut(bucket).ok_or_else(|| StoreError::Transport {
            operation: "upload",
            message: format!("NoSuchBucket: {bucket}"),
        })?;
        objects.insert(key.to_string(), body.to_vec());
        Ok(object_url(bucket, DEFAULT_S3_REGION, key))
    }

    fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.record("download", format!("{bucket}/{key}"))?;
        self.object(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.record("delete", format!("{bucket}/{key}"))?;
        if let Some(objects) = self.buckets.lock().expect("poisoned mutex").get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    ListFunctions,
    CreateFunction(String),
    UpdateFunctionCode(String),
    UpdateFunctionConfiguration(String),
    Invoke { function: String, payload: Value },
}

type Responder = Box<dyn Fn(&str, &Value) -> Result<Value, InvokeError> + Send + Sync>;

pub struct RecordingFunctionGateway {
    functions: Mutex<Vec<String>>,
    calls: Mutex<Vec<GatewayCall>>,
    deployed_specs: Mutex<Vec<FunctionSpec>>,
    failures: Failures,
    responder: Responder,
}

impl RecordingFunctionGateway {
    pub fn new() -> Self {
        Self {
            functions: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            deployed_specs: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            responder: Box::new(|_, _| {
                Err(InvokeError::Transport {
                    operation: "invoke",
                    message: "no responder configured".to_string(),
                })
            }),
        }
    }

    pub fn with_functions(self, names: &[&str]) -> Self {
        self.functions
            .lock()
            .expect("poisoned mutex")
            .extend(names.iter().map(|name| name.to_string()));
        self
    }

    pub fn responding_with(
        mut self,
        responder: impl Fn(&str, &Value) -> Result<Value, InvokeError> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Box::new(responder);
        self
    }

    pub fn fail_operation(&self, operation: &'static str, message: &str) {
        self.failures
            .lock()
            .expect("poisoned mutex")
            .insert(operation, message.to_string());
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().expect("poisoned mutex").clone()
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.lock().expect("poisoned mutex").clone()
    }

    /// Specs passed to create/update-code, in call order.
    pub fn deployed_specs(&self) -> Vec<FunctionSpec> {
        self.deployed_specs.lock().expect("poisoned mutex").clone()
    }

    fn record(&self, operation: &'static str, call: GatewayCall) -> Result<(), InvokeError> {
        self.calls.lock().expect("poisoned mutex").push(call);
        match injected_failure(&self.failures, operation) {
            Some(message) => Err(InvokeError::Transport { operation, message }),
            None => Ok(()),
        }
    }
}

impl Default for RecordingFunctionGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionGateway for RecordingFunctionGateway {
    fn list_functions(&self) -> Result<Vec<String>, InvokeError> {
        self.record("list_functions", GatewayCall::ListFunctions)?;
        Ok(self.function_names())
    }

    fn create_function(&self, spec: &FunctionSpec) -> Result<(), InvokeError> {
        self.record(
            "create_function",
            GatewayCall::CreateFunction(spec.name.clone()),
        )?;
        self.functions
            .lock()
            .expect("poisoned mutex")
            .push(spec.name.clone());
        self.deployed_specs
            .lock()
            .expect("poisoned mutex")
            .push(spec.clone());
        Ok(())
    }

    fn update_function_code(&self, spec: &FunctionSpec) -> Result<(), InvokeError> {
        self.record(
            "update_function_code",
            GatewayCall::UpdateFunctionCode(spec.name.clone()),
        )?;
        self.deployed_specs
            .lock()
            .expect("poisoned mutex")
            .push(spec.clone());
        Ok(())
    }

    fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<(), InvokeError> {
        self.record(
            "update_function_configuration",
            GatewayCall::UpdateFunctionConfiguration(spec.name.clone()),
        )
    }

    fn invoke(&self, function_name: &str, payload: &Value) -> Result<Value, InvokeError> {
        self.record(
            "invoke",
            GatewayCall::Invoke {
                function: function_name.to_string(),
                payload: payload.clone(),
            },
        )?;
        (self.responder)(function_name, payload)
    }
}

/// Stands in for the package manager: records what it was asked to install,
/// then either writes a fixed set of files under `node_modules` or fails.
pub struct ScriptedInstaller {
    files: Vec<(PathBuf, String)>,
    failure: Option<String>,
    manifests: Mutex<Vec<Value>>,
    directories: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl ScriptedInstaller {
    pub fn succeeding() -> Self {
        Self {
            files: Vec::new(),
            failure: None,
            manifests: Mutex::new(Vec::new()),
            directories: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            failure: Some(stderr.to_string()),
            ..Self::succeeding()
        }
    }

    /// Adds a file, relative to `node_modules`, written on install.
    pub fn with_file(mut self, relative_path: &str, contents: &str) -> Self {
        self.files
            .push((PathBuf::from(relative_path), contents.to_string()));
        self
    }

    pub fn manifests(&self) -> Vec<Value> {
        self.manifests.lock().expect("poisoned mutex").clone()
    }

    /// `(project_dir, cache_dir)` of every install, in call order.
    pub fn directories(&self) -> Vec<(PathBuf, PathBuf)> {
        self.directories.lock().expect("poisoned mutex").clone()
    }
}

impl DependencyInstaller for ScriptedInstaller {
    fn install(&self, project_dir: &Path, cache_dir: &Path) -> Result<(), InstallError> {
        self.directories
            .lock()
            .expect("poisoned mutex")
            .push((project_dir.to_path_buf(), cache_dir.to_path_buf()));

        let manifest = fs::read(project_dir.join("package.json"))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or(Value::Null);
        self.manifests.lock().expect("poisoned mutex").push(manifest);

        if let Some(stderr) = &self.failure {
            return Err(InstallError::Failed {
                program: "npm".to_string(),
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            });
        }

        let modules = project_dir.join(DEPENDENCY_DIR_NAME);
        for (relative_path, contents) in &self.files {
            let path = modules.join(relative_path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| InstallError::Spawn {
                    program: "npm".to_string(),
                    source,
                })?;
            }
            fs::write(&path, contents).map_err(|source| InstallError::Spawn {
                program: "npm".to_string(),
                source,
            })?;
        }
        Ok(())
    }
}
