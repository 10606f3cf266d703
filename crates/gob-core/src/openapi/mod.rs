//! The OpenAPI 3.0 document model written by the compiler and read back by
//! the bridge.

pub mod components;
pub mod media_type;
pub mod operation;
pub mod parameter;
pub mod ref_resolve;
pub mod request_body;
pub mod response;
pub mod schema;
pub mod security;
pub mod spec;

use crate::error::ParseError;
use spec::OpenApiSpec;

pub fn from_yaml(input: &str) -> Result<OpenApiSpec, ParseError> {
    check_version(serde_yaml_ng::from_str(input)?)
}

pub fn from_json(input: &str) -> Result<OpenApiSpec, ParseError> {
    check_version(serde_json::from_str(input)?)
}

pub fn to_yaml(document: &OpenApiSpec) -> Result<String, ParseError> {
    Ok(serde_yaml_ng::to_string(document)?)
}

pub fn to_json(document: &OpenApiSpec) -> Result<String, ParseError> {
    Ok(serde_json::to_string_pretty(document)?)
}

/// Only 3.0.x documents are read back: the `nullable` keyword the compiler
/// writes changed meaning in 3.1.
fn check_version(document: OpenApiSpec) -> Result<OpenApiSpec, ParseError> {
    if document.openapi.starts_with("3.0.") {
        Ok(document)
    } else {
        Err(ParseError::UnsupportedVersion(document.openapi))
    }
}
