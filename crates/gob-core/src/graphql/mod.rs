pub mod ast;
pub mod compiler;
pub mod converter;
pub mod directives;
pub mod fragments;
pub mod path_template;
pub mod validation;

pub use compiler::{Compilation, Compiler, OperationDescriptor, OperationTransform};
pub use converter::{ComponentRegistry, NoCustomScalars, ScalarProvider, TypeConverter};
pub use directives::{BodyContentType, DIRECTIVE_DEFINITIONS};
pub use validation::validate_document;
