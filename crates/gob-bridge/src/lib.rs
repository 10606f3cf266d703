//! Serves operations compiled by `gob-core` as REST routes.
//!
//! Each request is validated against the published OpenAPI operation, turned
//! into GraphQL variables and handed to an [`Executor`]. Multipart bodies are
//! rewritten into GraphQL multipart requests so uploaded files reach the
//! executor as [`Upload`] placeholders.

pub mod error;
pub mod executor;
pub mod handler;
pub mod multipart;
pub mod router;
pub mod upload;
pub mod validate;

pub use error::{BridgeError, InvalidResponseError, MountError, SchemaError, UploadError};
pub use executor::{BoxError, ExecutionRequest, ExecutionResult, Executor};
pub use handler::{OperationHandler, ResponseContext, ResponseTransformer, TransformedResponse};
pub use multipart::{FileUpload, MultipartLimits, Upload, UploadTable, process_request};
pub use router::{bridge_router, bridge_router_from_document};
pub use upload::{AsyncQueue, Slot};

use gob_core::config::{BridgeSettings, DEFAULT_MAX_BODY_SIZE};

/// Request handling options shared by every mounted operation.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Reject requests that do not match the operation's parameters and body.
    pub validate_request: bool,
    /// Fail with 500 when a result does not match the 200 response schema or
    /// carries GraphQL errors.
    pub validate_response: bool,
    /// Largest accepted JSON or url-encoded body, in bytes.
    pub max_body_size: usize,
    pub limits: MultipartLimits,
    pub response_transformer: Option<ResponseTransformer>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            validate_request: true,
            validate_response: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            limits: MultipartLimits::default(),
            response_transformer: None,
        }
    }
}

impl From<&BridgeSettings> for BridgeConfig {
    fn from(settings: &BridgeSettings) -> Self {
        Self {
            validate_request: settings.validate_request,
            validate_response: settings.validate_response,
            max_body_size: settings.max_body_size,
            limits: MultipartLimits::from(settings),
            response_transformer: None,
        }
    }
}

impl BridgeConfig {
    pub fn with_response_transformer(mut self, transformer: ResponseTransformer) -> Self {
        self.response_transformer = Some(transformer);
        self
    }
}
