//! Compiles routing-annotated GraphQL operations into OpenAPI operations and
//! the descriptors the bridge executes them with.

use apollo_compiler::ast::{self, Definition, OperationDefinition};
use apollo_compiler::validation::Valid;
use apollo_compiler::{Name, Node, Schema};
use indexmap::{IndexMap, IndexSet};
use log::{debug, info};
use serde::Serialize;

use super::ast::{
    FragmentDependencies, FragmentMap, dependency_closure, fragment_dependencies, fragment_map,
    operations, referenced_fragments, strip_fragment, strip_operation,
};
use super::converter::{ComponentRegistry, NoCustomScalars, ScalarProvider, TypeConverter};
use super::directives::{
    BodyContentType, BodyDirective, DIRECTIVE_NAMES, DirectiveReader, OperationDirective,
    ParamDirective, ParameterSource, merge_directives, schema_with_directives,
};
use super::fragments::FragmentAnalyzer;
use super::path_template;
use super::validation::{default_method, operation_label, validate_document};
use crate::error::{CompileError, ValidationErrors};
use crate::openapi::components::SchemaComponents;
use crate::openapi::operation::{HttpMethod, Operation};
use crate::openapi::parameter::{Parameter, ParameterLocation};
use crate::openapi::request_body::{JSON_CONTENT_TYPE, RequestBody};
use crate::openapi::response::Response;
use crate::openapi::schema::{Schema as OaSchema, SchemaOrRef, SchemaType};

/// Everything the bridge needs to serve one operation. Built once by the
/// compiler and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub(crate) name: String,
    #[serde(skip)]
    pub(crate) api_operation: Operation,
    pub(crate) path: String,
    pub(crate) method: HttpMethod,
    pub(crate) source: String,
    pub(crate) variable_map: IndexMap<String, String>,
    pub(crate) request_body_variable_map: IndexMap<String, String>,
    pub(crate) request_body_is_single_input: bool,
    pub(crate) request_body_content: Option<BodyContentType>,
}

impl OperationDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The published OpenAPI operation.
    pub fn api_operation(&self) -> &Operation {
        &self.api_operation
    }

    /// Route template, with `{name}` path variables.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// Directive-free GraphQL document executed for every request.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parameter name → variable name, for renamed parameters only.
    pub fn variable_map(&self) -> &IndexMap<String, String> {
        &self.variable_map
    }

    /// Variable name → key of the value in the request body. Array variables
    /// read from form bodies carry a `[]` suffix.
    pub fn request_body_variable_map(&self) -> &IndexMap<String, String> {
        &self.request_body_variable_map
    }

    /// Whether the whole request body is the value of a single variable.
    pub fn request_body_is_single_input(&self) -> bool {
        self.request_body_is_single_input
    }

    pub fn request_body_content(&self) -> Option<BodyContentType> {
        self.request_body_content
    }

    /// Variable a request parameter is bound to.
    pub fn variable_for_parameter<'a>(&'a self, parameter: &'a str) -> &'a str {
        self.variable_map
            .get(parameter)
            .map(String::as_str)
            .unwrap_or(parameter)
    }
}

/// Output of one compile.
#[derive(Debug, Clone, Default)]
pub struct Compilation {
    pub operations: Vec<OperationDescriptor>,
    pub components: SchemaComponents,
}

/// Rewrites the draft OpenAPI operation of each descriptor. Removing a
/// response fails the compile.
pub type OperationTransform<'a> = Box<dyn Fn(&OperationDescriptor, Operation) -> Operation + 'a>;

/// Compiles documents against one schema.
pub struct Compiler<'a> {
    schema: Valid<Schema>,
    scalars: Box<dyn ScalarProvider + 'a>,
    transform: Option<OperationTransform<'a>>,
}

impl<'a> Compiler<'a> {
    /// Compiler for a schema given as SDL text.
    pub fn from_sdl(sdl: &str, path: &str) -> Result<Self, CompileError> {
        Ok(Self::with_schema(schema_with_directives(sdl, path)?))
    }

    /// Compiler for an already built schema.
    pub fn from_schema(schema: &Schema) -> Result<Self, CompileError> {
        Ok(Self::with_schema(merge_directives(schema)?))
    }

    fn with_schema(schema: Valid<Schema>) -> Self {
        Self {
            schema,
            scalars: Box::new(NoCustomScalars),
            transform: None,
        }
    }

    pub fn with_scalars(mut self, scalars: impl ScalarProvider + 'a) -> Self {
        self.scalars = Box::new(scalars);
        self
    }

    pub fn with_transform(
        mut self,
        transform: impl Fn(&OperationDescriptor, Operation) -> Operation + 'a,
    ) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    /// The schema with the routing directives merged in.
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub fn parse_document(&self, source: &str, path: &str) -> Result<ast::Document, CompileError> {
        ast::Document::parse(source, path).map_err(|e| CompileError::Document(e.errors.to_string()))
    }

    pub fn validate(&self, document: &ast::Document) -> Result<(), ValidationErrors> {
        validate_document(&self.schema, document)
    }

    pub fn compile_str(&self, source: &str, path: &str) -> Result<Compilation, CompileError> {
        let document = self.parse_document(source, path)?;
        self.compile(&document)
    }

    /// Validate and compile every operation of a document. The document is
    /// never modified; executed sources are printed from stripped copies.
    pub fn compile(&self, document: &ast::Document) -> Result<Compilation, CompileError> {
        self.validate(document)?;

        let fragments = fragment_map(document);
        let dependencies = fragment_dependencies(&fragments);
        let referenceable = FragmentAnalyzer::new(&self.schema, &fragments).referenceable();
        let reader = DirectiveReader::new(&self.schema);

        let mut registry = ComponentRegistry::new();
        let mut compiled = Vec::new();
        {
            let mut converter = TypeConverter::new(
                &self.schema,
                self.scalars.as_ref(),
                &fragments,
                &referenceable,
                &mut registry,
            );
            for operation in operations(document) {
                let Some(directive) = reader.operation(&operation.directives)? else {
                    debug!(
                        "skipping operation `{}` without @OAOperation",
                        operation_label(operation)
                    );
                    continue;
                };
                let context = OperationContext {
                    reader,
                    fragments: &fragments,
                    dependencies: &dependencies,
                };
                let descriptor = self.compile_operation(&mut converter, &context, operation, directive)?;
                info!(
                    "compiled operation `{}` as {} {}",
                    descriptor.name,
                    descriptor.method.as_str(),
                    descriptor.path
                );
                compiled.push(descriptor);
            }
        }

        Ok(Compilation {
            operations: compiled,
            components: registry.into_schemas(),
        })
    }

    fn compile_operation(
        &self,
        converter: &mut TypeConverter<'_>,
        context: &OperationContext<'_>,
        operation: &Node<OperationDefinition>,
        directive: OperationDirective,
    ) -> Result<OperationDescriptor, CompileError> {
        let name = operation_label(operation);

        // Phase 1: Classify variables by directive
        let mut params: IndexMap<String, ParamDirective> = IndexMap::new();
        let mut bodies: IndexMap<String, BodyDirective> = IndexMap::new();
        for variable in &operation.variables {
            let variable_name = variable.name.to_string();
            if let Some(body) = context.reader.body(&variable.directives)? {
                bodies.insert(variable_name, body);
            } else {
                let param = context.reader.param(&variable.directives)?.unwrap_or_default();
                params.insert(variable_name, param);
            }
        }

        // Phase 2: Convert variable and result types
        let types = converter.from_operation(operation)?;

        // Phase 3: Parameters and request body
        let (parameters, variable_map) = build_parameters(&types.variables, &directive.path, &params);
        let body = build_request_body(&types.variables, &bodies);

        // Phase 4: Directive-free source of the operation and its fragments
        let source = print_operation(operation, context.fragments, context.dependencies);

        let api_operation = Operation {
            operation_id: operation.name.as_ref().map(|name| name.to_string()),
            graphql_operation: Some(source.clone()),
            tags: directive.tags.clone().unwrap_or_default(),
            summary: directive.summary.clone(),
            description: directive.description.clone(),
            external_docs: directive.external_docs(),
            deprecated: directive.deprecated.filter(|deprecated| *deprecated),
            security: directive.security_requirements(),
            parameters,
            request_body: body.as_ref().map(|body| body.request_body.clone()),
            responses: standard_responses(&types.result),
        };

        let method = directive
            .method
            .map(HttpMethod::from)
            .unwrap_or_else(|| default_method(operation.operation_type));

        let mut descriptor = OperationDescriptor {
            name: name.clone(),
            api_operation,
            path: directive.path,
            method,
            source,
            variable_map,
            request_body_variable_map: body
                .as_ref()
                .map(|body| body.variable_map.clone())
                .unwrap_or_default(),
            request_body_is_single_input: body.as_ref().is_some_and(|body| body.is_single_input),
            request_body_content: body.as_ref().map(|body| body.content_type),
        };

        // Phase 5: Caller supplied rewrite of the published operation
        if let Some(transform) = &self.transform {
            let transformed = transform(&descriptor, descriptor.api_operation.clone());
            if let Some(status) = descriptor
                .api_operation
                .responses
                .keys()
                .find(|status| !transformed.responses.contains_key(*status))
            {
                return Err(CompileError::ResponseRemoved {
                    operation: name,
                    status: status.clone(),
                });
            }
            descriptor.api_operation = transformed;
        }

        Ok(descriptor)
    }
}

struct OperationContext<'a> {
    reader: DirectiveReader<'a>,
    fragments: &'a FragmentMap,
    dependencies: &'a FragmentDependencies,
}

/// Stand-alone document holding the operation and every fragment it reaches,
/// with the routing directives removed.
fn print_operation(
    operation: &Node<OperationDefinition>,
    fragments: &FragmentMap,
    dependencies: &FragmentDependencies,
) -> String {
    let roots = referenced_fragments(&operation.selection_set);
    let closure: IndexSet<Name> = dependency_closure(&roots, dependencies);

    let mut document = ast::Document::new();
    document
        .definitions
        .push(Definition::OperationDefinition(strip_operation(operation, &DIRECTIVE_NAMES)));
    for (name, fragment) in fragments {
        if closure.contains(name) {
            document
                .definitions
                .push(Definition::FragmentDefinition(strip_fragment(fragment, &DIRECTIVE_NAMES)));
        }
    }
    document.to_string()
}

fn build_parameters(
    variables: &IndexMap<String, SchemaOrRef>,
    path: &str,
    params: &IndexMap<String, ParamDirective>,
) -> (Vec<Parameter>, IndexMap<String, String>) {
    let path_variables = path_template::variables(path);
    let mut parameters = Vec::new();
    let mut variable_map = IndexMap::new();

    for (variable_name, directive) in params {
        let Some(schema) = variables.get(variable_name) else {
            continue;
        };
        let is_header = directive.source == Some(ParameterSource::Header);
        let mut name = directive.name.clone().unwrap_or_else(|| variable_name.clone());
        if is_header {
            name = name.to_lowercase();
        }
        if name != *variable_name {
            variable_map.insert(name.clone(), variable_name.clone());
        }

        let location = if path_variables.contains(&name) {
            ParameterLocation::Path
        } else if is_header {
            ParameterLocation::Header
        } else {
            ParameterLocation::Query
        };
        let required = location == ParameterLocation::Path
            || (!schema.is_nullable() && !schema.has_default());

        parameters.push(Parameter {
            location,
            name,
            schema: schema.clone(),
            required,
            deprecated: directive.deprecated.filter(|deprecated| *deprecated),
            description: directive.description.clone(),
            variable_name: Some(variable_name.clone()),
        });
    }

    (parameters, variable_map)
}

struct BodyAssembly {
    request_body: RequestBody,
    variable_map: IndexMap<String, String>,
    is_single_input: bool,
    content_type: BodyContentType,
}

fn build_request_body(
    variables: &IndexMap<String, SchemaOrRef>,
    bodies: &IndexMap<String, BodyDirective>,
) -> Option<BodyAssembly> {
    let (first_name, first_body) = bodies.first()?;
    let first_schema = variables.get(first_name)?;

    let content_type = if bodies
        .values()
        .any(|body| body.content_type == BodyContentType::MultipartFormData)
    {
        BodyContentType::MultipartFormData
    } else {
        first_body.content_type
    };

    let mut variable_map = IndexMap::new();
    let mut description = None;
    let is_single_input = bodies.len() == 1 && first_schema.schema_type() == Some(SchemaType::Object);

    let schema = if is_single_input {
        variable_map.insert(first_name.clone(), first_name.clone());
        description = first_body.description.clone();
        let mut schema = first_schema.clone().into_schema();
        schema.variable_name = Some(first_name.clone());
        schema
    } else {
        // Scalar or multiple body variables are wrapped into one object.
        let mut properties = IndexMap::new();
        let mut required = Vec::new();
        for (variable_name, body) in bodies {
            let Some(schema) = variables.get(variable_name) else {
                continue;
            };
            let key = body.path.clone().unwrap_or_else(|| variable_name.clone());
            let body_key = if schema.schema_type() == Some(SchemaType::Array) {
                format!("{key}[]")
            } else {
                key.clone()
            };
            variable_map.insert(variable_name.clone(), body_key);
            if !schema.is_nullable() {
                required.push(key.clone());
            }
            let mut property = schema.clone().into_schema();
            if let Some(description) = &body.description {
                property.description = Some(description.clone());
            }
            property.variable_name = Some(variable_name.clone());
            properties.insert(key, SchemaOrRef::from(property));
        }
        OaSchema {
            required,
            ..OaSchema::object(properties)
        }
    };

    let mut request_body = RequestBody::new(description, content_type.media_type(), schema);
    let all_nullable = bodies
        .keys()
        .all(|name| variables.get(name).is_some_and(SchemaOrRef::is_nullable));
    if content_type == BodyContentType::MultipartFormData && all_nullable {
        // A request without any file may then be sent as plain JSON.
        request_body = request_body.with_content(
            JSON_CONTENT_TYPE,
            OaSchema {
                nullable: Some(true),
                ..OaSchema::typed(SchemaType::Object)
            },
        );
    }

    Some(BodyAssembly {
        request_body,
        variable_map,
        is_single_input,
        content_type,
    })
}

fn string_schema() -> SchemaOrRef {
    OaSchema::typed(SchemaType::String).into()
}

fn error_list(properties: IndexMap<String, SchemaOrRef>) -> SchemaOrRef {
    OaSchema::array_of(OaSchema::object(properties).into()).into()
}

/// Fixed response set published for every operation.
pub fn standard_responses(result: &SchemaOrRef) -> IndexMap<String, Response> {
    let mut responses = IndexMap::new();

    responses.insert("200".to_string(), Response::json("Success", result.clone()));

    let invalid_request: IndexMap<String, SchemaOrRef> = ["errorCode", "location", "message", "path"]
        .into_iter()
        .map(|key| (key.to_string(), string_schema()))
        .collect();
    responses.insert(
        "400".to_string(),
        Response::json(
            "Invalid request",
            OaSchema::object([("errors".to_string(), error_list(invalid_request))].into_iter().collect()),
        ),
    );

    let mut data = result.clone().into_schema();
    data.nullable = Some(true);
    data.description = Some("Branch of data that does not contain errors".to_string());
    let location: IndexMap<String, SchemaOrRef> = ["line", "column"]
        .into_iter()
        .map(|key| (key.to_string(), OaSchema::typed(SchemaType::Integer).into()))
        .collect();
    let mut graphql_error = IndexMap::new();
    graphql_error.insert("locations".to_string(), error_list(location));
    graphql_error.insert("message".to_string(), string_schema());
    graphql_error.insert(
        "path".to_string(),
        OaSchema::array_of(string_schema()).into(),
    );
    let mut internal = IndexMap::new();
    internal.insert("data".to_string(), SchemaOrRef::from(data));
    internal.insert("errors".to_string(), error_list(graphql_error));
    responses.insert(
        "500".to_string(),
        Response::json("Internal Server Error", OaSchema::object(internal)),
    );

    let unsupported: IndexMap<String, SchemaOrRef> =
        [("message".to_string(), string_schema())].into_iter().collect();
    responses.insert(
        "415".to_string(),
        Response::json(
            "Unsupported Media Type",
            OaSchema::object([("errors".to_string(), error_list(unsupported))].into_iter().collect()),
        ),
    );

    responses
}
