use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use crate::validate::Violation;

/// Failure of a multipart upload, observed by every consumer waiting on the
/// affected file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct UploadError {
    status: u16,
    message: String,
}

impl UploadError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    pub fn too_large(message: impl Into<String>) -> Self {
        Self::new(413, message)
    }

    /// The client went away before the body was read completely.
    pub fn disconnected() -> Self {
        Self::new(499, "Request disconnected during file upload stream parsing.")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, message)
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_disconnect(&self) -> bool {
        self.status == 499
    }
}

/// Raised instead of answering when response validation is on and either the
/// result does not match the published schema or the executor reported errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct InvalidResponseError {
    pub message: String,
    pub validation_errors: Vec<Violation>,
    pub graphql_errors: Vec<Value>,
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("SyntaxError: Unable to parse JSON body")]
    InvalidJson,

    #[error("Unable to parse form body: {0}")]
    InvalidForm(String),

    #[error("Request body exceeds the {0} byte size limit.")]
    BodyTooLarge(usize),

    #[error("Unable to read request body: {0}")]
    UnreadableBody(String),

    #[error("Only \"{}\" supported", .0.join(", "))]
    UnsupportedMediaType(Vec<String>),

    #[error("request validation failed")]
    InvalidRequest(Vec<Violation>),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("executor failed: {0}")]
    Executor(String),

    #[error(transparent)]
    InvalidResponse(#[from] InvalidResponseError),
}

/// Failure to prepare the validators of one operation.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(transparent)]
    Resolve(#[from] gob_core::error::ResolveError),

    #[error("{location} cannot be compiled: {message}")]
    Compile { location: String, message: String },
}

/// Failure to mount the operations of a document.
#[derive(Debug, Error)]
pub enum MountError {
    #[error(transparent)]
    Transform(#[from] gob_core::error::TransformError),

    #[error("failed to prepare schemas of `{operation}`: {source}")]
    Schemas {
        operation: String,
        source: SchemaError,
    },
}

#[derive(Serialize)]
struct MessageError<'a> {
    message: &'a str,
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            BridgeError::InvalidJson
            | BridgeError::InvalidForm(_)
            | BridgeError::UnreadableBody(_)
            | BridgeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            BridgeError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            BridgeError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            BridgeError::Upload(error) => {
                StatusCode::from_u16(error.status()).unwrap_or(StatusCode::BAD_REQUEST)
            }
            BridgeError::Executor(_) | BridgeError::InvalidResponse(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// JSON body sent for this error.
    pub fn body(&self) -> Value {
        match self {
            BridgeError::InvalidRequest(violations) => json!({ "errors": violations }),
            BridgeError::InvalidResponse(error) => json!({
                "errors": [MessageError { message: &error.message }],
                "validationErrors": error.validation_errors,
                "graphqlErrors": error.graphql_errors,
            }),
            other => json!({ "errors": [MessageError { message: &other.to_string() }] }),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
