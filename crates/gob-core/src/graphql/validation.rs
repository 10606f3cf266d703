//! Document-wide checks of routing directive usage.
//!
//! Runs the standard GraphQL validation against the schema merged with the
//! routing directives, then the routing rules. Every violation is collected;
//! nothing here stops at the first error.

use apollo_compiler::Schema;
use apollo_compiler::ast::{self, OperationDefinition, OperationType, VariableDefinition};
use apollo_compiler::parser::SourceSpan;
use apollo_compiler::validation::{DiagnosticList, Valid};
use apollo_compiler::Node;
use indexmap::{IndexMap, IndexSet};

use super::ast::{operations, source_location};
use super::directives::{BodyContentType, BodyDirective, DirectiveReader, ParamDirective, ParameterSource};
use super::path_template;
use crate::error::{ValidationError, ValidationErrors};
use crate::openapi::operation::HttpMethod;

/// Validate a document, returning every violation found.
pub fn validate_document(
    schema: &Valid<Schema>,
    document: &ast::Document,
) -> Result<(), ValidationErrors> {
    let mut rules = RuleContext::new(schema, document);
    if let Err(with_errors) = document.to_executable_validate(schema) {
        rules.push_diagnostics(&with_errors.errors);
    }
    for operation in operations(document) {
        rules.check_operation(operation);
    }
    rules.finish()
}

/// HTTP method an operation is mounted on when `@OAOperation` names none.
pub fn default_method(operation_type: OperationType) -> HttpMethod {
    match operation_type {
        OperationType::Mutation => HttpMethod::Post,
        _ => HttpMethod::Get,
    }
}

pub(crate) fn operation_label(operation: &OperationDefinition) -> String {
    operation
        .name
        .as_ref()
        .map(|name| name.to_string())
        .unwrap_or_else(|| "<anonymous>".to_string())
}

struct VariableRouting<'v> {
    definition: &'v Node<VariableDefinition>,
    parameter_name: String,
    param: Option<ParamDirective>,
    body: Option<BodyDirective>,
}

struct RuleContext<'a> {
    reader: DirectiveReader<'a>,
    document: &'a ast::Document,
    routes: IndexMap<(HttpMethod, String), String>,
    errors: Vec<ValidationError>,
}

impl<'a> RuleContext<'a> {
    fn new(schema: &'a Schema, document: &'a ast::Document) -> Self {
        Self {
            reader: DirectiveReader::new(schema),
            document,
            routes: IndexMap::new(),
            errors: Vec::new(),
        }
    }

    fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors {
                errors: self.errors,
            })
        }
    }

    fn report(&mut self, message: String, location: Option<SourceSpan>) {
        self.errors.push(ValidationError {
            message,
            location: source_location(location, &self.document.sources),
        });
    }

    fn push_diagnostics(&mut self, diagnostics: &DiagnosticList) {
        let path = self
            .document
            .sources
            .values()
            .next()
            .map(|file| file.path().display().to_string());
        for diagnostic in diagnostics.iter() {
            let location = diagnostic.line_column_range().map(|range| range.start).map(|at| match &path {
                Some(path) => format!("{path}:{}:{}", at.line, at.column),
                None => format!("{}:{}", at.line, at.column),
            });
            self.errors.push(ValidationError {
                message: diagnostic.error.to_string(),
                location,
            });
        }
    }

    fn check_operation(&mut self, operation: &Node<OperationDefinition>) {
        let name = operation_label(operation);
        if operation.operation_type == OperationType::Subscription {
            self.report(
                format!("Subscription operation \"{name}\" cannot be published as a route."),
                operation.location(),
            );
            return;
        }
        // Malformed arguments are already reported by the standard rules.
        let Ok(directive) = self.reader.operation(&operation.directives) else {
            return;
        };
        let Some(directive) = directive else {
            self.report(
                format!("Missing required directive \"@OAOperation\" on operation \"{name}\"."),
                operation.location(),
            );
            return;
        };

        let path = directive.path.clone();
        let method = directive
            .method
            .map(HttpMethod::from)
            .unwrap_or_else(|| default_method(operation.operation_type));
        self.check_route(&name, method, &path, operation.location());

        let variables = self.variable_routing(operation);
        if self.check_path_mapping(&path, &variables, operation.location()) {
            for variable in &variables {
                self.check_variable(&path, variable);
            }
        }
        self.check_bodies(&name, &variables, operation.location());
    }

    fn variable_routing<'v>(
        &self,
        operation: &'v OperationDefinition,
    ) -> Vec<VariableRouting<'v>> {
        operation
            .variables
            .iter()
            .map(|definition| {
                let param = self.reader.param(&definition.directives).ok().flatten();
                let body = self.reader.body(&definition.directives).ok().flatten();
                let parameter_name = param
                    .as_ref()
                    .and_then(|param| param.name.clone())
                    .unwrap_or_else(|| definition.name.to_string());
                VariableRouting {
                    definition,
                    parameter_name,
                    param,
                    body,
                }
            })
            .collect()
    }

    fn check_route(
        &mut self,
        name: &str,
        method: HttpMethod,
        path: &str,
        location: Option<SourceSpan>,
    ) {
        let key = (method, path_template::normalize(path));
        match self.routes.get(&key) {
            Some(previous) => {
                let message = format!(
                    "Route \"{} {path}\" of operation \"{name}\" has already been defined by operation \"{previous}\".",
                    method.as_str()
                );
                self.report(message, location);
            }
            None => {
                self.routes.insert(key, name.to_string());
            }
        }
    }

    /// Every path variable must be mapped by exactly one operation variable.
    fn check_path_mapping(
        &mut self,
        path: &str,
        variables: &[VariableRouting<'_>],
        location: Option<SourceSpan>,
    ) -> bool {
        let path_variables = path_template::variables(path);
        if path_variables.is_empty() {
            return true;
        }
        let mut counts: IndexMap<&str, usize> =
            path_variables.iter().map(|name| (name.as_str(), 0)).collect();
        for variable in variables {
            if let Some(count) = counts.get_mut(variable.parameter_name.as_str()) {
                *count += 1;
            }
        }
        let missing: Vec<String> = counts
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| format!("\"{name}\""))
            .collect();
        if !missing.is_empty() {
            self.report(
                format!(
                    "Not all path variables in \"{path}\" are mapped to variables - Missing mappings are: {}.",
                    missing.join(", ")
                ),
                location,
            );
            return false;
        }
        let repeated: Vec<String> = counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(name, _)| format!("\"{name}\""))
            .collect();
        if !repeated.is_empty() {
            self.report(
                format!(
                    "Path variables in \"{path}\" are mapped to more than one variable: {}.",
                    repeated.join(", ")
                ),
                location,
            );
            return false;
        }
        true
    }

    fn check_variable(&mut self, path: &str, variable: &VariableRouting<'_>) {
        let definition = variable.definition;
        let var_name = definition.name.as_str();
        let var_type = definition.ty.to_string();
        let parameter_name = variable.parameter_name.as_str();
        let in_path = path_template::variables(path).contains(parameter_name);
        let source = variable.param.as_ref().and_then(|param| param.source);

        if in_path {
            if variable.body.is_some() {
                self.report(
                    format!(
                        "Variable \"${var_name}\" of type \"{var_type}\" cannot be used with \"@OABody\", as it is used within \"{path}\"."
                    ),
                    definition.location(),
                );
                return;
            }
            if !definition.ty.is_non_null() {
                self.report(
                    format!(
                        "Variable \"${var_name}\" of type \"{var_type}\" must be defined as \"{var_type}!\", as it is used within \"{path}\"."
                    ),
                    definition.location(),
                );
                return;
            }
            if let Some(source) = source.filter(|source| *source != ParameterSource::Path) {
                self.report(
                    format!(
                        "Location \"{}\" is invalid for \"${var_name}\" of type \"{var_type}\", because \"{parameter_name}\" is part of the path \"{path}\".",
                        source.as_str()
                    ),
                    definition.location(),
                );
            }
        } else if source == Some(ParameterSource::Path) {
            self.report(
                format!(
                    "Location \"path\" is invalid for \"${var_name}\" of type \"{var_type}\", because \"{parameter_name}\" was expected in \"{path}\"."
                ),
                definition.location(),
            );
        }
    }

    fn check_bodies(
        &mut self,
        name: &str,
        variables: &[VariableRouting<'_>],
        location: Option<SourceSpan>,
    ) {
        let bodies: Vec<(&VariableRouting<'_>, &BodyDirective)> = variables
            .iter()
            .filter_map(|variable| variable.body.as_ref().map(|body| (variable, body)))
            .collect();
        if bodies.is_empty() {
            return;
        }

        let mut paths = IndexSet::new();
        for (variable, body) in &bodies {
            let path = body
                .path
                .clone()
                .unwrap_or_else(|| variable.definition.name.to_string());
            paths.insert(path);
        }
        if paths.len() != bodies.len() {
            self.report(
                "Only unique \"@OABody\" definitions allowed.".to_string(),
                bodies[0].0.definition.location(),
            );
        }

        let content_types: IndexSet<BodyContentType> =
            bodies.iter().map(|(_, body)| body.content_type).collect();
        if content_types.len() > 1 {
            let fallback_allowed = content_types.contains(&BodyContentType::MultipartFormData)
                && bodies
                    .iter()
                    .filter(|(_, body)| body.content_type != BodyContentType::MultipartFormData)
                    .all(|(variable, _)| !variable.definition.ty.is_non_null());
            if !fallback_allowed {
                let listed: Vec<String> = content_types
                    .iter()
                    .map(|content_type| format!("\"{}\"", content_type.as_str()))
                    .collect();
                self.report(
                    format!(
                        "Operation \"{name}\" mixes \"@OABody\" content types {}; only nullable variables may be combined with \"MULTIPART_FORM_DATA\".",
                        listed.join(", ")
                    ),
                    location,
                );
            }
        }
    }
}
