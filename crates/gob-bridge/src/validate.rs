//! Coercion and validation of requests and responses against the OpenAPI 3.0
//! schemas of one operation.
//!
//! Schemas are resolved and compiled into JSON Schema (draft 7) validators
//! once, when the operation is mounted. OpenAPI's `nullable` becomes an
//! `if: {type: null}` guard and `int32` becomes numeric bounds. Messages follow
//! the wording API clients usually get from JSON schema validators
//! (`must be integer`, `must have required property 'id'`).

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use gob_core::openapi::components::SchemaComponents;
use gob_core::openapi::operation::Operation;
use gob_core::openapi::parameter::{Parameter, ParameterLocation};
use gob_core::openapi::ref_resolve::RefResolver;
use gob_core::openapi::request_body::RequestBody;
use gob_core::openapi::schema::{Schema, SchemaOrRef, SchemaType};
use http::HeaderMap;
use indexmap::IndexMap;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, ValidationError, Validator};
use serde::Serialize;
use serde_json::{Map, Number, Value, json};

use crate::error::SchemaError;

const REQUEST_VALIDATION: &str = "openapi.requestValidation";
const RESPONSE_VALIDATION: &str = "openapi.responseValidation";

/// One value rejected by a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub path: String,
    pub error_code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Where a request value came from, as reported in violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestLocation {
    Path,
    Query,
    Headers,
    Body,
}

impl RequestLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestLocation::Path => "path",
            RequestLocation::Query => "query",
            RequestLocation::Headers => "headers",
            RequestLocation::Body => "body",
        }
    }
}

impl From<ParameterLocation> for RequestLocation {
    fn from(location: ParameterLocation) -> Self {
        match location {
            ParameterLocation::Path => RequestLocation::Path,
            ParameterLocation::Query => RequestLocation::Query,
            ParameterLocation::Header => RequestLocation::Headers,
        }
    }
}

/// Raw, uncoerced parameter sources of a request.
#[derive(Debug, Clone, Copy)]
pub struct RawParameters<'a> {
    pub path: &'a HashMap<String, String>,
    pub query: &'a [(String, String)],
    pub headers: &'a HeaderMap,
}

/// Coerced parameter values, by location and name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterValues {
    pub path: Map<String, Value>,
    pub query: Map<String, Value>,
    pub header: Map<String, Value>,
}

impl ParameterValues {
    pub fn get(&self, location: ParameterLocation, name: &str) -> Option<&Value> {
        match location {
            ParameterLocation::Path => self.path.get(name),
            ParameterLocation::Query => self.query.get(name),
            ParameterLocation::Header => self.header.get(name),
        }
    }

    fn insert(&mut self, location: ParameterLocation, name: String, value: Value) {
        let values = match location {
            ParameterLocation::Path => &mut self.path,
            ParameterLocation::Query => &mut self.query,
            ParameterLocation::Header => &mut self.header,
        };
        values.insert(name, value);
    }
}

/// Resolved schemas of one operation, with their compiled validators.
#[derive(Debug, Clone)]
pub struct OperationSchemas {
    parameters: Vec<Parameter>,
    parameter_validators: Vec<Option<CompiledSchema>>,
    bodies: IndexMap<String, Schema>,
    body_validators: IndexMap<String, CompiledSchema>,
    response: Option<CompiledSchema>,
}

impl OperationSchemas {
    pub fn new(operation: &Operation, components: &SchemaComponents) -> Result<Self, SchemaError> {
        let mut operation = operation.clone();
        RefResolver::new(components).resolve_operation(&mut operation)?;

        let bodies: IndexMap<String, Schema> = operation
            .request_body
            .iter()
            .flat_map(RequestBody::schemas)
            .filter_map(|(content_type, schema)| {
                Some((content_type.to_string(), schema.as_schema()?.clone()))
            })
            .collect();
        let body_validators: IndexMap<String, CompiledSchema> = bodies
            .iter()
            .map(|(content_type, schema)| {
                let compiled = CompiledSchema::new(schema, || format!("request body `{content_type}`"))?;
                Ok((content_type.clone(), compiled))
            })
            .collect::<Result<_, SchemaError>>()?;
        let parameter_validators: Vec<Option<CompiledSchema>> = operation
            .parameters
            .iter()
            .map(|parameter| {
                parameter
                    .schema
                    .as_schema()
                    .map(|schema| CompiledSchema::new(schema, || format!("parameter `{}`", parameter.name)))
                    .transpose()
            })
            .collect::<Result<_, SchemaError>>()?;
        let response = operation
            .responses
            .get("200")
            .and_then(|response| response.json_schema())
            .and_then(SchemaOrRef::as_schema)
            .map(|schema| CompiledSchema::new(schema, || "response `200`".to_string()))
            .transpose()?;

        Ok(Self {
            parameters: operation.parameters,
            parameter_validators,
            bodies,
            body_validators,
            response,
        })
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Turn raw path, query and header strings into typed values.
    pub fn coerce_parameters(&self, raw: RawParameters<'_>) -> ParameterValues {
        let mut values = ParameterValues::default();
        for parameter in &self.parameters {
            let inputs: Vec<String> = match parameter.location {
                ParameterLocation::Path => raw.path.get(&parameter.name).cloned().into_iter().collect(),
                ParameterLocation::Query => raw
                    .query
                    .iter()
                    .filter(|(key, _)| key == &parameter.name)
                    .map(|(_, value)| value.clone())
                    .collect(),
                ParameterLocation::Header => raw
                    .headers
                    .get_all(parameter.name.as_str())
                    .iter()
                    .filter_map(|value| value.to_str().ok())
                    .map(str::to_string)
                    .collect(),
            };
            if inputs.is_empty() {
                continue;
            }
            let schema = parameter.schema.as_schema();
            values.insert(
                parameter.location,
                parameter.name.clone(),
                coerce_inputs(&inputs, schema),
            );
        }
        values
    }

    /// Turn url-encoded form fields into an object typed after the body
    /// schema. Repeated keys and `key[]` keys collect into arrays.
    pub fn coerce_form(&self, content_type: &str, fields: Vec<(String, String)>) -> Value {
        let mut grouped: IndexMap<String, (bool, Vec<String>)> = IndexMap::new();
        for (key, value) in fields {
            let (key, is_array) = match key.strip_suffix("[]") {
                Some(stripped) => (stripped.to_string(), true),
                None => (key, false),
            };
            let entry = grouped.entry(key).or_default();
            entry.0 |= is_array;
            entry.1.push(value);
        }

        let body = self.bodies.get(content_type);
        let mut object = Map::new();
        for (key, (is_array, inputs)) in grouped {
            let schema = body.and_then(|body| {
                body.properties
                    .get(&key)
                    .or_else(|| body.properties.get(&format!("{key}[]")))
                    .and_then(SchemaOrRef::as_schema)
            });
            let value = match schema {
                Some(schema) => coerce_inputs(&inputs, Some(schema)),
                None if is_array || inputs.len() > 1 => {
                    Value::Array(inputs.into_iter().map(Value::String).collect())
                }
                None => inputs.into_iter().next().map(Value::String).unwrap_or(Value::Null),
            };
            object.insert(key, value);
        }
        Value::Object(object)
    }

    /// Check coerced parameters and, for JSON and form bodies, the body.
    pub fn validate_request(
        &self,
        parameters: &ParameterValues,
        body: Option<(&str, &Value)>,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (parameter, validator) in self.parameters.iter().zip(&self.parameter_validators) {
            let reporter = Reporter::new(REQUEST_VALIDATION, Some(parameter.location.into()));
            match parameters.get(parameter.location, &parameter.name) {
                Some(value) => {
                    if let Some(validator) = validator {
                        violations.extend(validator.violations(value, &parameter.name, &reporter));
                    }
                }
                None if parameter.required => violations.push(reporter.missing(&parameter.name)),
                None => {}
            }
        }

        if let Some((content_type, value)) = body {
            if let Some(validator) = self.body_validators.get(content_type) {
                let reporter = Reporter::new(REQUEST_VALIDATION, Some(RequestLocation::Body));
                violations.extend(validator.violations(value, "", &reporter));
            }
        }
        violations
    }

    /// Check the data of a successful result against the `200` schema.
    pub fn validate_response(&self, data: Option<&Value>) -> Vec<Violation> {
        let Some(validator) = &self.response else {
            return Vec::new();
        };
        let reporter = Reporter::new(RESPONSE_VALIDATION, None);
        validator.violations(data.unwrap_or(&Value::Null), "", &reporter)
    }
}

/// Follows `allOf` wrappers down to the schema carrying the type.
fn effective(schema: &Schema) -> &Schema {
    if schema.schema_type.is_none() {
        if let Some(inner) = schema.all_of.first().and_then(SchemaOrRef::as_schema) {
            return effective(inner);
        }
    }
    schema
}

fn coerce_inputs(inputs: &[String], schema: Option<&Schema>) -> Value {
    let schema = schema.map(effective);
    if schema.and_then(|s| s.schema_type) == Some(SchemaType::Array) {
        let items = schema
            .and_then(|s| s.items.as_deref())
            .and_then(SchemaOrRef::as_schema);
        let parts: Vec<&str> = match inputs {
            [single] => single.split(',').collect(),
            many => many.iter().map(String::as_str).collect(),
        };
        return Value::Array(parts.into_iter().map(|part| coerce_value(part, items)).collect());
    }
    match inputs.first() {
        Some(first) => coerce_value(first, schema),
        None => Value::Null,
    }
}

/// Best-effort conversion of one string. Values that do not parse stay strings
/// so validation can report them.
pub fn coerce_value(raw: &str, schema: Option<&Schema>) -> Value {
    let schema_type = schema.map(effective).and_then(|s| s.schema_type);
    match schema_type {
        Some(SchemaType::Integer) => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        Some(SchemaType::Number) => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        Some(SchemaType::Boolean) => match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            other => Value::String(other.to_string()),
        },
        Some(SchemaType::Object) => match serde_json::from_str::<Value>(raw) {
            Ok(object @ Value::Object(_)) => object,
            _ => Value::String(raw.to_string()),
        },
        _ => Value::String(raw.to_string()),
    }
}

/// A draft 7 validator compiled from one resolved OpenAPI schema.
#[derive(Clone)]
struct CompiledSchema {
    document: Arc<Value>,
    validator: Arc<Validator>,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    fn new(schema: &Schema, location: impl Fn() -> String) -> Result<Self, SchemaError> {
        let openapi = serde_json::to_value(schema).map_err(|error| SchemaError::Compile {
            location: location(),
            message: error.to_string(),
        })?;
        let document = json_schema(&openapi);
        let validator = jsonschema::options()
            .with_draft(Draft::Draft7)
            .should_validate_formats(true)
            .build(&document)
            .map_err(|error| SchemaError::Compile {
                location: location(),
                message: error.to_string(),
            })?;
        Ok(Self {
            document: Arc::new(document),
            validator: Arc::new(validator),
        })
    }

    /// Violations of `value`, with paths rooted at `prefix`.
    fn violations(&self, value: &Value, prefix: &str, reporter: &Reporter) -> Vec<Violation> {
        let mut violations = Vec::new();
        for error in self.validator.iter_errors(value) {
            self.describe(value, &error, prefix, reporter, &mut violations);
        }
        let mut seen = HashSet::new();
        violations.retain(|violation| {
            seen.insert((violation.path.clone(), violation.error_code.clone()))
        });
        violations
    }

    fn describe(
        &self,
        root: &Value,
        error: &ValidationError<'_>,
        prefix: &str,
        reporter: &Reporter,
        out: &mut Vec<Violation>,
    ) {
        let path = dotted_path(root, &error.instance_path.to_string(), prefix);
        let (keyword, keyword_pointer) = failed_keyword(&error.schema_path.to_string());
        let expected = self.document.pointer(&keyword_pointer);

        match keyword.as_str() {
            "required" => match &error.kind {
                ValidationErrorKind::Required { property } => {
                    let name = property
                        .as_str()
                        .map_or_else(|| property.to_string(), str::to_string);
                    out.push(reporter.report(
                        "required",
                        join(&path, &name),
                        format!("must have required property '{name}'"),
                    ));
                }
                _ => out.push(reporter.report(&keyword, path, error.to_string())),
            },
            "additionalProperties" => match &error.kind {
                ValidationErrorKind::AdditionalProperties { unexpected } => {
                    for name in unexpected {
                        out.push(reporter.report(
                            "additionalProperties",
                            join(&path, name),
                            "must NOT have additional properties".to_string(),
                        ));
                    }
                }
                _ => out.push(reporter.report(&keyword, path, error.to_string())),
            },
            _ => {
                let message = message(&keyword, expected).unwrap_or_else(|| error.to_string());
                out.push(reporter.report(&keyword, path, message));
            }
        }
    }
}

/// Rewrite an OpenAPI 3.0 schema object as draft 7 JSON Schema.
fn json_schema(openapi: &Value) -> Value {
    let Value::Object(source) = openapi else {
        return openapi.clone();
    };
    let mut schema = Map::new();
    let mut nullable = false;
    for (keyword, value) in source {
        let converted = match keyword.as_str() {
            "nullable" => {
                nullable = value.as_bool() == Some(true);
                continue;
            }
            "example" | "deprecated" | "discriminator" | "xml" | "externalDocs" => continue,
            extension if extension.starts_with("x-") => continue,
            "properties" => Value::Object(
                value
                    .as_object()
                    .into_iter()
                    .flatten()
                    .map(|(name, property)| (name.clone(), json_schema(property)))
                    .collect(),
            ),
            "items" | "additionalProperties" | "not" => json_schema(value),
            "allOf" | "anyOf" | "oneOf" => Value::Array(
                value
                    .as_array()
                    .into_iter()
                    .flatten()
                    .map(json_schema)
                    .collect(),
            ),
            _ => value.clone(),
        };
        schema.insert(keyword.clone(), converted);
    }

    if schema.get("format").and_then(Value::as_str) == Some("int32") {
        schema.entry("minimum").or_insert(json!(i32::MIN));
        schema.entry("maximum").or_insert(json!(i32::MAX));
    }

    if nullable {
        json!({"if": {"type": "null"}, "else": schema})
    } else {
        Value::Object(schema)
    }
}

/// The keyword a schema path ends in, and the pointer to that keyword's value.
/// Trailing array indexes (`required/0`) are skipped.
fn failed_keyword(schema_path: &str) -> (String, String) {
    let segments: Vec<&str> = schema_path.split('/').skip(1).collect();
    let end = segments
        .iter()
        .rposition(|segment| segment.parse::<usize>().is_err())
        .unwrap_or(0);
    let keyword = segments
        .get(end)
        .map(|segment| unescape(segment))
        .unwrap_or_default();
    let pointer = segments
        .get(..=end)
        .map(|kept| format!("/{}", kept.join("/")))
        .unwrap_or_default();
    (keyword, pointer)
}

fn unescape(segment: &str) -> String {
    segment.replace("~1", "/").replace("~0", "~")
}

/// `/items/1/name` as `items[1].name`, walking `root` to tell array indexes
/// from object keys.
fn dotted_path(root: &Value, pointer: &str, prefix: &str) -> String {
    let mut path = prefix.to_string();
    let mut current = Some(root);
    for segment in pointer.split('/').skip(1).map(unescape) {
        match current {
            Some(Value::Array(items)) => {
                current = segment.parse::<usize>().ok().and_then(|index| items.get(index));
                path.push_str(&format!("[{segment}]"));
            }
            other => {
                current = other.and_then(|value| value.get(&segment));
                path = join(&path, &segment);
            }
        }
    }
    path
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

/// The usual wording for a failed keyword. `None` when the keyword is unknown
/// or its value could not be found.
fn message(keyword: &str, expected: Option<&Value>) -> Option<String> {
    let limit = || expected.map(render);
    Some(match keyword {
        "type" => format!("must be {}", limit()?),
        "enum" => "must be equal to one of the allowed values".to_string(),
        "const" => "must be equal to constant".to_string(),
        "minimum" => format!("must be >= {}", limit()?),
        "maximum" => format!("must be <= {}", limit()?),
        "exclusiveMinimum" => format!("must be > {}", limit()?),
        "exclusiveMaximum" => format!("must be < {}", limit()?),
        "multipleOf" => format!("must be multiple of {}", limit()?),
        "minLength" => format!("must NOT have fewer than {} characters", limit()?),
        "maxLength" => format!("must NOT have more than {} characters", limit()?),
        "minItems" => format!("must NOT have fewer than {} items", limit()?),
        "maxItems" => format!("must NOT have more than {} items", limit()?),
        "uniqueItems" => "must NOT have duplicate items".to_string(),
        "minProperties" => format!("must NOT have fewer than {} properties", limit()?),
        "maxProperties" => format!("must NOT have more than {} properties", limit()?),
        "pattern" => format!("must match pattern \"{}\"", limit()?),
        "format" => format!("must match format \"{}\"", limit()?),
        "anyOf" => "must match a schema in anyOf".to_string(),
        "oneOf" => "must match exactly one schema in oneOf".to_string(),
        "not" => "must NOT be valid".to_string(),
        _ => return None,
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => match number.as_f64() {
            Some(float) if number.is_f64() && float.fract() == 0.0 => format!("{}", float as i64),
            _ => number.to_string(),
        },
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Turns failed keywords into violations for one validation direction.
struct Reporter {
    suffix: &'static str,
    location: Option<RequestLocation>,
}

impl Reporter {
    fn new(suffix: &'static str, location: Option<RequestLocation>) -> Self {
        Self { suffix, location }
    }

    fn report(&self, keyword: &str, path: String, message: String) -> Violation {
        Violation {
            path,
            error_code: format!("{keyword}.{}", self.suffix),
            message,
            location: self.location.map(|location| location.as_str().to_string()),
        }
    }

    fn missing(&self, name: &str) -> Violation {
        self.report(
            "required",
            name.to_string(),
            format!("must have required property '{name}'"),
        )
    }
}
