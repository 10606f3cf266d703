use crate::graphql::compiler::{Compilation, OperationDescriptor};
use crate::openapi::components::Components;
use crate::openapi::operation::Operation;
use crate::openapi::spec::OpenApiSpec;

/// Rewrites one operation while the document is assembled.
pub type DocumentTransform<'a> = &'a dyn Fn(&OperationDescriptor, Operation) -> Operation;

/// Assemble the API document from a base document and one compile.
pub fn build_document(base: OpenApiSpec, compilation: &Compilation) -> OpenApiSpec {
    build_document_with(base, compilation, &[])
}

/// Like [`build_document`], passing every operation through `transforms` in
/// order before it is mounted under its path and method.
pub fn build_document_with(
    mut base: OpenApiSpec,
    compilation: &Compilation,
    transforms: &[DocumentTransform<'_>],
) -> OpenApiSpec {
    for descriptor in &compilation.operations {
        let operation = transforms
            .iter()
            .fold(descriptor.api_operation().clone(), |operation, transform| {
                transform(descriptor, operation)
            });
        let item = base.paths.entry(descriptor.path().to_string()).or_default();
        *item.operation_mut(descriptor.method()) = Some(operation);
    }

    if !compilation.components.is_empty() {
        base.components
            .get_or_insert_with(Components::default)
            .merge_schemas(&compilation.components);
    }
    base
}
