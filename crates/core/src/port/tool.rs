// Tool capability traits
//
// Every adapter satisfies both Executable and HealthCheckable; the serving
// harness (outside this workspace) only ever talks to these two traits.

use crate::domain::{ErrorClass, HealthStatus};
use crate::error::{ErrorCode, Operation, Result, ToolError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Static metadata describing an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub tags: &'static [&'static str],
}

/// A tool that turns a typed request into a typed response
#[async_trait]
pub trait Executable: Send + Sync {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    fn descriptor(&self) -> ToolDescriptor;

    /// Validate, run and parse one invocation
    ///
    /// # Errors
    /// Every failure is a [`ToolError`] carrying its [`ErrorClass`].
    async fn execute(&self, request: Self::Request) -> Result<Self::Response>;

    /// Schema boundary: decode untyped JSON into the typed request, execute,
    /// and encode the response back to JSON.
    async fn execute_value(&self, input: serde_json::Value) -> Result<serde_json::Value> {
        let name = self.descriptor().name;

        let request: Self::Request = serde_json::from_value(input).map_err(|e| {
            ToolError::invalid_input(name, format!("invalid request: {}", e)).with_source(e)
        })?;

        let response = self.execute(request).await?;

        serde_json::to_value(response).map_err(|e| {
            ToolError::new(
                name,
                Operation::Parse,
                ErrorCode::ParseError,
                ErrorClass::Semantic,
                format!("failed to encode response: {}", e),
            )
            .with_source(e)
        })
    }
}

/// A tool that can report whether its preconditions hold
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health(&self) -> HealthStatus;
}
