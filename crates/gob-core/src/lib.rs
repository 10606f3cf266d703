//! Compiles GraphQL operations annotated with routing directives into an
//! OpenAPI 3.0 document and a table of operation descriptors.

pub mod config;
pub mod error;
pub mod graphql;
pub mod openapi;
pub mod transform;

pub use error::{CompileError, ValidationError, ValidationErrors};
pub use graphql::{Compilation, Compiler, OperationDescriptor};
