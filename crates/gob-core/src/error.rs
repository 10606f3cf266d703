use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported OpenAPI version: {0}")]
    UnsupportedVersion(String),
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("circular reference detected: {0}")]
    CircularRef(String),

    #[error("invalid reference format: {0}")]
    InvalidRefFormat(String),

    #[error("reference target not found: {0}")]
    RefTargetNotFound(String),
}

/// Fatal errors raised while compiling a document. No operation table is
/// produced when any of these occur.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("invalid GraphQL schema: {0}")]
    Schema(String),

    #[error("invalid GraphQL document: {0}")]
    Document(String),

    #[error("Unknown custom scalar: {0}")]
    UnknownScalar(String),

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("unknown field `{field}` on type `{type_name}`")]
    UnknownField { type_name: String, field: String },

    #[error("unknown fragment `{0}`")]
    UnknownFragment(String),

    #[error("schema has no {0} root type")]
    MissingRootType(&'static str),

    #[error("{0}")]
    Validation(#[from] ValidationErrors),

    #[error("transform of operation `{operation}` removed the `{status}` response")]
    ResponseRemoved { operation: String, status: String },
}

/// A single rule violation with its source location, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
    pub location: Option<String>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Source: {}",
            self.message,
            self.location.as_deref().unwrap_or("unknown")
        )
    }
}

/// All rule violations found in one document, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors {
    pub errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.message.as_str())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Schema validation error(s): ")?;
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("operation {method} {path} has no `x-graphql-operation` source")]
    MissingOperationSource { method: &'static str, path: String },
}
