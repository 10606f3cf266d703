use crate::openapi::operation::Operation;
use crate::openapi::schema::SchemaOrRef;
use crate::openapi::spec::OpenApiSpec;

/// Strip the `x-graphql-*` annotations the bridge relies on, for publishing a
/// document to API consumers. The stripped document can no longer be turned
/// back into an operation table.
pub fn remove_custom_properties(mut spec: OpenApiSpec) -> OpenApiSpec {
    for item in spec.paths.values_mut() {
        for operation in item.operations_mut() {
            strip_operation(operation);
        }
    }
    spec
}

fn strip_operation(operation: &mut Operation) {
    operation.graphql_operation = None;
    for parameter in &mut operation.parameters {
        parameter.variable_name = None;
    }
    let Some(body) = &mut operation.request_body else {
        return;
    };
    for media in body.content.values_mut() {
        let Some(SchemaOrRef::Schema(schema)) = &mut media.schema else {
            continue;
        };
        schema.variable_name = None;
        for property in schema.properties.values_mut() {
            if let SchemaOrRef::Schema(property) = property {
                property.variable_name = None;
            }
        }
    }
}
