use nola_core::contract::{DeployAction, FunctionSpec};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("{operation} failed: {message}")]
    Transport {
        operation: &'static str,
        message: String,
    },

    /// The function itself crashed or timed out; the transport succeeded.
    #[error("function {function} failed: {payload}")]
    FunctionError { function: String, payload: String },

    #[error("function {function} returned a payload that is not JSON: {message}")]
    MalformedPayload { function: String, message: String },
}

/// Remote compute functions addressed by name.
pub trait FunctionGateway {
    fn list_functions(&self) -> Result<Vec<String>, InvokeError>;

    fn create_function(&self, spec: &FunctionSpec) -> Result<(), InvokeError>;

    fn update_function_code(&self, spec: &FunctionSpec) -> Result<(), InvokeError>;

    fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<(), InvokeError>;

    /// Synchronous call-and-wait. The reply is returned verbatim.
    fn invoke(&self, function_name: &str, payload: &Value) -> Result<Value, InvokeError>;

    /// Create when no function carries `spec.name`, otherwise update code and
    /// then configuration. The two updates are not atomic; re-running converges.
    fn deploy_function(&self, spec: &FunctionSpec) -> Result<DeployAction, InvokeError> {
        let functions = self.list_functions()?;

        if functions.iter().any(|name| name == &spec.name) {
            info!(function = %spec.name, "updating existing function");
            self.update_function_code(spec)?;
            self.update_function_configuration(spec)?;
            Ok(DeployAction::Updated)
        } else {
            info!(function = %spec.name, "creating function");
            self.create_function(spec)?;
            Ok(DeployAction::Created)
        }
    }
}
