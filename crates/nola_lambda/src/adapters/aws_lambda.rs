use std::time::Duration;

use aws_sdk_lambda::client::Waiters;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{FunctionCode, InvocationType, Runtime};
use nola_core::contract::FunctionSpec;
use serde_json::Value;
use tracing::debug;

use super::block_on;
use super::invoke::{FunctionGateway, InvokeError};

/// Lambda refuses configuration changes while a code update is still being
/// applied, and invocations while a new function is pending.
const FUNCTION_SETTLE_MAX_WAIT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct LambdaFunctionGateway {
    client: aws_sdk_lambda::Client,
}

impl LambdaFunctionGateway {
    pub fn new(sdk_config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_lambda::Client::new(sdk_config),
        }
    }
}

impl FunctionGateway for LambdaFunctionGateway {
    fn list_functions(&self) -> Result<Vec<String>, InvokeError> {
        block_on(async {
            let mut names = Vec::new();
            let mut marker: Option<String> = None;

            loop {
                let output = self
                    .client
                    .list_functions()
                    .set_marker(marker.take())
                    .send()
                    .await
                    .map_err(|error| transport("list_functions", error))?;

                names.extend(
                    output
                        .functions()
                        .iter()
                        .filter_map(|function| function.function_name().map(str::to_string)),
                );

                match output.next_marker() {
                    Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                    _ => break,
                }
            }

            Ok(names)
        })
    }

    fn create_function(&self, spec: &FunctionSpec) -> Result<(), InvokeError> {
        block_on(async {
            self.client
                .create_function()
                .function_name(&spec.name)
                .handler(&spec.handler)
                .role(&spec.role)
                .runtime(Runtime::from(spec.runtime.as_str()))
                .description(&spec.description)
                .timeout(spec.timeout_seconds)
                .code(
                    FunctionCode::builder()
                        .zip_file(Blob::new(spec.code_archive.clone()))
                        .build(),
                )
                .send()
                .await
                .map_err(|error| transport("create_function", error))?;

            debug!(function = %spec.name, "waiting for function to become active");
            self.client
                .wait_until_function_active_v2()
                .function_name(&spec.name)
                .wait(FUNCTION_SETTLE_MAX_WAIT)
                .await
                .map_err(|error| transport("wait_until_function_active", error))?;
            Ok(())
        })
    }

    fn update_function_code(&self, spec: &FunctionSpec) -> Result<(), InvokeError> {
        block_on(async {
            self.client
                .update_function_code()
                .function_name(&spec.name)
                .zip_file(Blob::new(spec.code_archive.clone()))
                .send()
                .await
                .map_err(|error| transport("update_function_code", error))?;

            debug!(function = %spec.name, "waiting for code update to settle");
            self.client
                .wait_until_function_updated_v2()
                .function_name(&spec.name)
                .wait(FUNCTION_SETTLE_MAX_WAIT)
                .await
                .map_err(|error| transport("wait_until_function_updated", error))?;
            Ok(())
        })
    }

    fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<(), InvokeError> {
        block_on(async {
            self.client
                .update_function_configuration()
                .function_name(&spec.name)
                .handler(&spec.handler)
                .role(&spec.role)
                .runtime(Runtime::from(spec.runtime.as_str()))
                .description(&spec.description)
                .timeout(spec.timeout_seconds)
                .send()
                .await
                .map(|_| ())
                .map_err(|error| transport("update_function_configuration", error))
        })
    }

    fn invoke(&self, function_name: &str, payload: &Value) -> Result<Value, InvokeError> {
        let request_payload = serde_json::to_vec(payload).map_err(|error| InvokeError::Transport {
            operation: "invoke",
            message: format!("failed to encode payload: {error}"),
        })?;

        let output = block_on(async {
            self.client
                .invoke()
                .function_name(function_name)
                .invocation_type(InvocationType::RequestResponse)
                .payload(Blob::new(request_payload))
                .send()
                .await
                .map_err(|error| transport("invoke", error))
        })?;

        let body = output
            .payload()
            .map(|blob| blob.as_ref().to_vec())
            .unwrap_or_default();

        if let Some(kind) = output.function_error() {
            return Err(InvokeError::FunctionError {
                function: function_name.to_string(),
                payload: format!("{kind}: {}", String::from_utf8_lossy(&body)),
            });
        }

        serde_json::from_slice(&body).map_err(|error| InvokeError::MalformedPayload {
            function: function_name.to_string(),
            message: error.to_string(),
        })
    }
}

fn transport<E: std::error::Error>(operation: &'static str, error: E) -> InvokeError {
    InvokeError::Transport {
        operation,
        message: DisplayErrorContext(error).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_lambda::operation::invoke::InvokeOutput;
    use aws_sdk_lambda::operation::list_functions::ListFunctionsOutput;
    use aws_sdk_lambda::types::FunctionConfiguration;
    use aws_smithy_mocks::{mock, mock_client, RuleMode};
    use serde_json::json;

    use super::*;

    fn function(name: &str) -> FunctionConfiguration {
        FunctionConfiguration::builder().function_name(name).build()
    }

    fn replying_with(output: fn() -> InvokeOutput) -> LambdaFunctionGateway {
        let rule = mock!(aws_sdk_lambda::Client::invoke)
            .match_requests(|request| request.function_name() == Some("nola-builder"))
            .then_output(output);
        LambdaFunctionGateway {
            client: mock_client!(aws_sdk_lambda, [&rule]),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_functions_follows_pagination_markers() {
        let first_page = mock!(aws_sdk_lambda::Client::list_functions)
            .match_requests(|request| request.marker().is_none())
            .then_output(|| {
                ListFunctionsOutput::builder()
                    .functions(function("alpha"))
                    .next_marker("page-2")
                    .build()
            });
        let second_page = mock!(aws_sdk_lambda::Client::list_functions)
            .match_requests(|request| request.marker() == Some("page-2"))
            .then_output(|| {
                ListFunctionsOutput::builder()
                    .functions(function("nola-builder"))
                    .build()
            });
        let gateway = LambdaFunctionGateway {
            client: mock_client!(aws_sdk_lambda, RuleMode::MatchAny, [&first_page, &second_page]),
        };

        let names = gateway.list_functions().expect("list should succeed");

        assert_eq!(names, vec!["alpha".to_string(), "nola-builder".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invoke_parses_json_reply() {
        let gateway = replying_with(|| {
            InvokeOutput::builder()
                .status_code(200)
                .payload(Blob::new(br#"{"error": false, "key": "req-1/node_modules.zip"}"#.to_vec()))
                .build()
        });

        let reply = gateway
            .invoke("nola-builder", &json!({"packageJson": {}}))
            .expect("invoke should succeed");

        assert_eq!(reply, json!({"error": false, "key": "req-1/node_modules.zip"}));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn function_error_is_reported_with_payload() {
        let gateway = replying_with(|| {
            InvokeOutput::builder()
                .status_code(200)
                .function_error("Unhandled")
                .payload(Blob::new(br#"{"errorMessage": "Task timed out"}"#.to_vec()))
                .build()
        });

        let error = gateway
            .invoke("nola-builder", &json!({"packageJson": {}}))
            .expect_err("function error should fail the call");

        match error {
            InvokeError::FunctionError { function, payload } => {
                assert_eq!(function, "nola-builder");
                assert!(payload.starts_with("Unhandled"));
                assert!(payload.contains("Task timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_json_reply_is_malformed() {
        let gateway = replying_with(|| {
            InvokeOutput::builder()
                .status_code(200)
                .payload(Blob::new(b"<html>gateway timeout</html>".to_vec()))
                .build()
        });

        let error = gateway
            .invoke("nola-builder", &json!({"packageJson": {}}))
            .expect_err("non-JSON reply should fail");

        assert!(matches!(
            error,
            InvokeError::MalformedPayload { ref function, .. } if function == "nola-builder"
        ));
    }
}
