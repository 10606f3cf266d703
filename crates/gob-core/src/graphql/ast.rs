//! Helpers over the executable document AST: directive lookup, fragment
//! dependency graphs and directive stripping.

use apollo_compiler::ast::{
    self, Definition, DirectiveDefinition, DirectiveList, FragmentDefinition, OperationDefinition,
    Selection,
};
use apollo_compiler::parser::{SourceMap, SourceSpan};
use apollo_compiler::{Name, Node};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

pub type FragmentMap = IndexMap<Name, Node<FragmentDefinition>>;
pub type FragmentDependencies = IndexMap<Name, IndexSet<Name>>;

/// Whether any directive in the list carries one of the given names.
pub fn has_directive(directives: &DirectiveList, names: &[&str]) -> bool {
    directives
        .iter()
        .any(|directive| names.contains(&directive.name.as_str()))
}

/// `@include` / `@skip` make a selection conditional.
pub fn is_conditional(directives: &DirectiveList) -> bool {
    has_directive(directives, &["include", "skip"])
}

/// Arguments of a directive application as JSON, filling in defaults declared
/// by the directive definition for omitted arguments.
pub fn directive_arguments(
    directive: &ast::Directive,
    definition: &DirectiveDefinition,
) -> Map<String, Value> {
    let mut args = Map::new();
    for arg_def in &definition.arguments {
        match directive.specified_argument_by_name(arg_def.name.as_str()) {
            Some(value) => {
                args.insert(arg_def.name.to_string(), value_to_json(value));
            }
            None => {
                if let Some(default) = &arg_def.default_value {
                    args.insert(arg_def.name.to_string(), value_to_json(default));
                }
            }
        }
    }
    args
}

/// Untyped conversion of a constant GraphQL value. Variables have no value at
/// compile time and become `null`.
pub fn value_to_json(value: &ast::Value) -> Value {
    match value {
        ast::Value::Null | ast::Value::Variable(_) => Value::Null,
        ast::Value::Enum(name) => Value::String(name.to_string()),
        ast::Value::String(s) => Value::String(s.to_string()),
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::Int(i) => number_from_literal(i.as_str()),
        ast::Value::Float(f) => number_from_literal(f.as_str()),
        ast::Value::List(items) => Value::Array(items.iter().map(|v| value_to_json(v)).collect()),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, v)| (name.to_string(), value_to_json(v)))
                .collect(),
        ),
    }
}

fn number_from_literal(literal: &str) -> Value {
    if let Ok(int) = literal.parse::<i64>() {
        return Value::from(int);
    }
    literal
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

pub fn operations(document: &ast::Document) -> impl Iterator<Item = &Node<OperationDefinition>> {
    document.definitions.iter().filter_map(|def| match def {
        Definition::OperationDefinition(op) => Some(op),
        _ => None,
    })
}

pub fn fragment_map(document: &ast::Document) -> FragmentMap {
    document
        .definitions
        .iter()
        .filter_map(|def| match def {
            Definition::FragmentDefinition(fragment) => {
                Some((fragment.name.clone(), fragment.clone()))
            }
            _ => None,
        })
        .collect()
}

/// Every fragment spread anywhere in a selection set, including spreads nested
/// in fields and inline fragments.
pub fn referenced_fragments(selection_set: &[Selection]) -> IndexSet<Name> {
    let mut names = IndexSet::new();
    collect_spreads(selection_set, &mut names);
    names
}

fn collect_spreads(selection_set: &[Selection], names: &mut IndexSet<Name>) {
    for selection in selection_set {
        match selection {
            Selection::Field(field) => collect_spreads(&field.selection_set, names),
            Selection::FragmentSpread(spread) => {
                names.insert(spread.fragment_name.clone());
            }
            Selection::InlineFragment(inline) => collect_spreads(&inline.selection_set, names),
        }
    }
}

pub fn fragment_dependencies(fragments: &FragmentMap) -> FragmentDependencies {
    fragments
        .iter()
        .map(|(name, fragment)| (name.clone(), referenced_fragments(&fragment.selection_set)))
        .collect()
}

/// Transitive closure of `roots` over the dependency graph. Names without an
/// entry in the graph are kept but not expanded.
pub fn dependency_closure(
    roots: &IndexSet<Name>,
    dependencies: &FragmentDependencies,
) -> IndexSet<Name> {
    let mut seen = IndexSet::new();
    let mut stack: Vec<Name> = roots.iter().rev().cloned().collect();
    while let Some(name) = stack.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(deps) = dependencies.get(&name) {
            stack.extend(deps.iter().rev().cloned());
        }
    }
    seen
}

fn retain_directives(directives: &mut DirectiveList, names: &[&str]) {
    directives
        .0
        .retain(|directive| !names.contains(&directive.name.as_str()));
}

fn strip_selection_set(selection_set: &mut [Selection], names: &[&str]) {
    for selection in selection_set {
        match selection {
            Selection::Field(field) => {
                let field = field.make_mut();
                retain_directives(&mut field.directives, names);
                strip_selection_set(&mut field.selection_set, names);
            }
            Selection::FragmentSpread(spread) => {
                retain_directives(&mut spread.make_mut().directives, names);
            }
            Selection::InlineFragment(inline) => {
                let inline = inline.make_mut();
                retain_directives(&mut inline.directives, names);
                strip_selection_set(&mut inline.selection_set, names);
            }
        }
    }
}

/// Copy of an operation with the named directives removed everywhere,
/// including on variable definitions. The input node is left untouched.
pub fn strip_operation(
    operation: &Node<OperationDefinition>,
    names: &[&str],
) -> Node<OperationDefinition> {
    let mut operation = operation.clone();
    let op = operation.make_mut();
    retain_directives(&mut op.directives, names);
    for variable in &mut op.variables {
        retain_directives(&mut variable.make_mut().directives, names);
    }
    strip_selection_set(&mut op.selection_set, names);
    operation
}

/// Copy of a fragment with the named directives removed everywhere.
pub fn strip_fragment(
    fragment: &Node<FragmentDefinition>,
    names: &[&str],
) -> Node<FragmentDefinition> {
    let mut fragment = fragment.clone();
    let def = fragment.make_mut();
    retain_directives(&mut def.directives, names);
    strip_selection_set(&mut def.selection_set, names);
    fragment
}

/// `path:line:column` of a node, as far as the source map knows it.
pub fn source_location(location: Option<SourceSpan>, sources: &SourceMap) -> Option<String> {
    let location = location?;
    let range = location.line_column_range(sources)?;
    let path = sources
        .get(&location.file_id())
        .map(|file| file.path().display().to_string())
        .unwrap_or_default();
    Some(if path.is_empty() {
        format!("{}:{}", range.start.line, range.start.column)
    } else {
        format!("{path}:{}:{}", range.start.line, range.start.column)
    })
}
