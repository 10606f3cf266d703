use indexmap::IndexMap;

use crate::error::TransformError;
use crate::graphql::compiler::OperationDescriptor;
use crate::graphql::directives::BodyContentType;
use crate::openapi::operation::{HttpMethod, Operation};
use crate::openapi::request_body::RequestBody;
use crate::openapi::schema::SchemaType;
use crate::openapi::spec::OpenApiSpec;

/// Rebuild the operation table from a document produced by the compiler.
///
/// Relies on the `x-graphql-*` annotations, so it fails on documents that went
/// through [`remove_custom_properties`](super::remove_custom_properties).
pub fn operations_from_document(
    spec: &OpenApiSpec,
) -> Result<Vec<OperationDescriptor>, TransformError> {
    let mut descriptors = Vec::new();
    for (path, item) in &spec.paths {
        for (method, operation) in item.operations() {
            descriptors.push(descriptor_from_operation(path, method, operation)?);
        }
    }
    Ok(descriptors)
}

fn descriptor_from_operation(
    path: &str,
    method: HttpMethod,
    operation: &Operation,
) -> Result<OperationDescriptor, TransformError> {
    let source = operation
        .graphql_operation
        .clone()
        .ok_or_else(|| TransformError::MissingOperationSource {
            method: method.as_str(),
            path: path.to_string(),
        })?;

    let variable_map = operation
        .parameters
        .iter()
        .filter_map(|parameter| {
            let variable = parameter.variable_name.as_ref()?;
            (*variable != parameter.name).then(|| (parameter.name.clone(), variable.clone()))
        })
        .collect();

    let body = operation.request_body.as_ref().and_then(body_from_request);

    Ok(OperationDescriptor {
        name: operation
            .operation_id
            .clone()
            .unwrap_or_else(|| format!("{} {path}", method.as_str())),
        api_operation: operation.clone(),
        path: path.to_string(),
        method,
        source,
        variable_map,
        request_body_variable_map: body
            .as_ref()
            .map(|(map, _, _)| map.clone())
            .unwrap_or_default(),
        request_body_is_single_input: body.as_ref().is_some_and(|(_, single, _)| *single),
        request_body_content: body.map(|(_, _, content)| content),
    })
}

/// Body variable map, single-input flag and content kind of a request body.
fn body_from_request(
    body: &RequestBody,
) -> Option<(IndexMap<String, String>, bool, BodyContentType)> {
    // A multipart body may also list its JSON fallback; the multipart entry
    // decides the kind.
    let (content, media) = body
        .content
        .iter()
        .filter_map(|(media_type, media)| {
            BodyContentType::from_media_type(media_type).map(|content| (content, media))
        })
        .max_by_key(|(content, _)| *content == BodyContentType::MultipartFormData)?;
    let schema = media.schema.as_ref()?.as_schema()?;

    let mut map = IndexMap::new();
    if let Some(variable) = &schema.variable_name {
        map.insert(variable.clone(), variable.clone());
        return Some((map, true, content));
    }
    for (key, property) in &schema.properties {
        let Some(property) = property.as_schema() else {
            continue;
        };
        let Some(variable) = &property.variable_name else {
            continue;
        };
        let body_key = if property.schema_type == Some(SchemaType::Array) {
            format!("{key}[]")
        } else {
            key.clone()
        };
        map.insert(variable.clone(), body_key);
    }
    Some((map, false, content))
}
