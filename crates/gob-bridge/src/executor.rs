use std::future::Future;

use async_trait::async_trait;
use http::HeaderMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::multipart::Upload;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// What the bridge hands to the executor for one HTTP request.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Directive-free operation source.
    pub document: String,
    /// Variables read from the request. Absent values are never present as
    /// keys; mapped upload locations hold `null`.
    pub variables: Map<String, Value>,
    /// Upload placeholders keyed by their path below `variables`.
    pub uploads: IndexMap<String, Upload>,
    /// Request headers, with `content-length` adjusted when the body was
    /// rewritten.
    pub headers: HeaderMap,
}

/// Outcome of executing an operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
}

impl ExecutionResult {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Runs GraphQL operations. The bridge makes no assumption about transport:
/// implementations may execute in process or call a remote endpoint.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, BoxError>;
}

#[async_trait]
impl<F, Fut> Executor for F
where
    F: Fn(ExecutionRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ExecutionResult, BoxError>> + Send,
{
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, BoxError> {
        (self)(request).await
    }
}
