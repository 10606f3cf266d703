//! The routing directives understood by the compiler.
//!
//! Directive applications are read once into closed, typed argument structs.
//! Omitted arguments pick up the defaults declared in [`DIRECTIVE_DEFINITIONS`].

use apollo_compiler::ast::{self, DirectiveList};
use apollo_compiler::Schema;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::ast::directive_arguments;
use crate::error::CompileError;
use crate::openapi::operation::{ExternalDocs, HttpMethod};
use crate::openapi::parameter::ParameterLocation;
use crate::openapi::request_body::{FORM_CONTENT_TYPE, JSON_CONTENT_TYPE, MULTIPART_CONTENT_TYPE};
use crate::openapi::security::{self, SecurityRequirement};

/// Type system definitions of the routing directives, merged into the target
/// schema before a document is validated.
pub const DIRECTIVE_DEFINITIONS: &str = r#"
input OAExternalDocsInput {
  url: String!
  description: String
}

input SecurityDefinitionInput {
  schema: String!
  scopes: [String!]
}

enum HttpMethod {
  GET
  POST
  PUT
  DELETE
}

enum ParameterSource {
  PATH
  QUERY
  HEADER
}

enum BodyContentType {
  JSON
  FORM_DATA
  MULTIPART_FORM_DATA
}

directive @OAOperation(
  path: String!
  tags: [String!]
  summary: String
  security: [SecurityDefinitionInput]
  description: String
  externalDocs: OAExternalDocsInput
  deprecated: Boolean
  method: HttpMethod
) on QUERY | MUTATION

directive @OAParam(
  in: ParameterSource
  deprecated: Boolean
  description: String
  name: String
) on VARIABLE_DEFINITION

directive @OABody(
  description: String
  path: String
  contentType: BodyContentType = JSON
) on VARIABLE_DEFINITION

directive @OADescription(description: String) on FRAGMENT_DEFINITION | FIELD
"#;

/// The kinds of routing directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Operation,
    Param,
    Body,
    Description,
}

impl DirectiveKind {
    pub const ALL: [DirectiveKind; 4] = [
        DirectiveKind::Operation,
        DirectiveKind::Param,
        DirectiveKind::Body,
        DirectiveKind::Description,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DirectiveKind::Operation => "OAOperation",
            DirectiveKind::Param => "OAParam",
            DirectiveKind::Body => "OABody",
            DirectiveKind::Description => "OADescription",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Names of every routing directive, as stripped from executed documents.
pub const DIRECTIVE_NAMES: [&str; 4] = ["OAOperation", "OAParam", "OABody", "OADescription"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DirectiveHttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl From<DirectiveHttpMethod> for HttpMethod {
    fn from(method: DirectiveHttpMethod) -> Self {
        match method {
            DirectiveHttpMethod::Get => HttpMethod::Get,
            DirectiveHttpMethod::Post => HttpMethod::Post,
            DirectiveHttpMethod::Put => HttpMethod::Put,
            DirectiveHttpMethod::Delete => HttpMethod::Delete,
        }
    }
}

/// Where an `@OAParam` variable is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParameterSource {
    Path,
    Query,
    Header,
}

impl ParameterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterSource::Path => "path",
            ParameterSource::Query => "query",
            ParameterSource::Header => "header",
        }
    }
}

impl From<ParameterSource> for ParameterLocation {
    fn from(source: ParameterSource) -> Self {
        match source {
            ParameterSource::Path => ParameterLocation::Path,
            ParameterSource::Query => ParameterLocation::Query,
            ParameterSource::Header => ParameterLocation::Header,
        }
    }
}

/// Encoding of the request body an `@OABody` variable is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BodyContentType {
    #[default]
    Json,
    FormData,
    MultipartFormData,
}

impl BodyContentType {
    pub fn media_type(&self) -> &'static str {
        match self {
            BodyContentType::Json => JSON_CONTENT_TYPE,
            BodyContentType::FormData => FORM_CONTENT_TYPE,
            BodyContentType::MultipartFormData => MULTIPART_CONTENT_TYPE,
        }
    }

    pub fn from_media_type(media_type: &str) -> Option<Self> {
        match media_type {
            JSON_CONTENT_TYPE => Some(BodyContentType::Json),
            FORM_CONTENT_TYPE => Some(BodyContentType::FormData),
            MULTIPART_CONTENT_TYPE => Some(BodyContentType::MultipartFormData),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyContentType::Json => "JSON",
            BodyContentType::FormData => "FORM_DATA",
            BodyContentType::MultipartFormData => "MULTIPART_FORM_DATA",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SecurityDefinition {
    pub schema: String,
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExternalDocsInput {
    pub url: String,
    pub description: Option<String>,
}

/// Arguments of `@OAOperation`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDirective {
    pub path: String,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub security: Option<Vec<Option<SecurityDefinition>>>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub external_docs: Option<ExternalDocsInput>,
    #[serde(default)]
    pub deprecated: Option<bool>,
    #[serde(default)]
    pub method: Option<DirectiveHttpMethod>,
}

impl OperationDirective {
    /// Security requirements in OpenAPI form. A `null` entry becomes the empty
    /// requirement, which makes authentication optional.
    pub fn security_requirements(&self) -> Option<Vec<SecurityRequirement>> {
        self.security.as_ref().map(|items| {
            items
                .iter()
                .map(|item| match item {
                    Some(definition) => security::requirement(
                        &definition.schema,
                        definition.scopes.as_deref().unwrap_or_default(),
                    ),
                    None => security::anonymous(),
                })
                .collect()
        })
    }

    pub fn external_docs(&self) -> Option<ExternalDocs> {
        self.external_docs.as_ref().map(|docs| ExternalDocs {
            url: docs.url.clone(),
            description: docs.description.clone(),
        })
    }
}

/// Arguments of `@OAParam`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParamDirective {
    #[serde(rename = "in", default)]
    pub source: Option<ParameterSource>,
    #[serde(default)]
    pub deprecated: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Arguments of `@OABody`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyDirective {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub content_type: BodyContentType,
}

/// Arguments of `@OADescription`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DescriptionDirective {
    #[serde(default)]
    pub description: Option<String>,
}

/// A routing directive application with its typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Operation(OperationDirective),
    Param(ParamDirective),
    Body(BodyDirective),
    Description(DescriptionDirective),
}

/// Reads routing directive applications against the directive definitions of
/// a schema.
#[derive(Clone, Copy)]
pub struct DirectiveReader<'a> {
    schema: &'a Schema,
}

impl<'a> DirectiveReader<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Typed arguments of any routing directive. Other directives yield `None`.
    pub fn read(&self, directive: &ast::Directive) -> Result<Option<Directive>, CompileError> {
        let Some(kind) = DirectiveKind::from_name(directive.name.as_str()) else {
            return Ok(None);
        };
        let parsed = match kind {
            DirectiveKind::Operation => Directive::Operation(self.arguments(kind, directive)?),
            DirectiveKind::Param => Directive::Param(self.arguments(kind, directive)?),
            DirectiveKind::Body => Directive::Body(self.arguments(kind, directive)?),
            DirectiveKind::Description => {
                Directive::Description(self.arguments(kind, directive)?)
            }
        };
        Ok(Some(parsed))
    }

    pub fn operation(
        &self,
        directives: &DirectiveList,
    ) -> Result<Option<OperationDirective>, CompileError> {
        self.find(DirectiveKind::Operation, directives)
    }

    pub fn param(&self, directives: &DirectiveList) -> Result<Option<ParamDirective>, CompileError> {
        self.find(DirectiveKind::Param, directives)
    }

    pub fn body(&self, directives: &DirectiveList) -> Result<Option<BodyDirective>, CompileError> {
        self.find(DirectiveKind::Body, directives)
    }

    pub fn description(
        &self,
        directives: &DirectiveList,
    ) -> Result<Option<DescriptionDirective>, CompileError> {
        self.find(DirectiveKind::Description, directives)
    }

    fn find<T: DeserializeOwned>(
        &self,
        kind: DirectiveKind,
        directives: &DirectiveList,
    ) -> Result<Option<T>, CompileError> {
        directives
            .get(kind.name())
            .map(|directive| self.arguments(kind, directive))
            .transpose()
    }

    fn arguments<T: DeserializeOwned>(
        &self,
        kind: DirectiveKind,
        directive: &ast::Directive,
    ) -> Result<T, CompileError> {
        let definition = self
            .schema
            .directive_definitions
            .get(kind.name())
            .ok_or_else(|| CompileError::Schema(format!("directive @{} is not defined", kind.name())))?;
        let args = directive_arguments(directive, definition);
        serde_json::from_value(serde_json::Value::Object(args)).map_err(|e| {
            CompileError::Document(format!("invalid arguments for @{}: {e}", kind.name()))
        })
    }
}

/// Build a validated schema from SDL with the routing directives merged in.
pub fn schema_with_directives(
    sdl: &str,
    path: &str,
) -> Result<apollo_compiler::validation::Valid<Schema>, CompileError> {
    let schema = Schema::builder()
        .parse(sdl, path)
        .build()
        .map_err(|e| CompileError::Schema(e.errors.to_string()))?;
    if schema.directive_definitions.contains_key(DirectiveKind::Operation.name()) {
        return schema
            .validate()
            .map_err(|e| CompileError::Schema(e.errors.to_string()));
    }
    Schema::builder()
        .parse(sdl, path)
        .parse(DIRECTIVE_DEFINITIONS, "directives.graphql")
        .build()
        .map_err(|e| CompileError::Schema(e.errors.to_string()))?
        .validate()
        .map_err(|e| CompileError::Schema(e.errors.to_string()))
}

/// Merge the routing directives into an already built schema.
pub fn merge_directives(
    schema: &Schema,
) -> Result<apollo_compiler::validation::Valid<Schema>, CompileError> {
    schema_with_directives(&schema.to_string(), "schema.graphql")
}
