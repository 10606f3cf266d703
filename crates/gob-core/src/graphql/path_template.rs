//! `{var}`-style route templates.
//!
//! A variable always spans a whole `/`-separated segment, so `/a/{id}` has a
//! variable but `/a/x{id}` does not.

use indexmap::IndexSet;

/// Variable names of a path template, in order of appearance.
pub fn variables(template: &str) -> IndexSet<String> {
    template
        .split('/')
        .filter_map(segment_variable)
        .map(str::to_string)
        .collect()
}

fn segment_variable(segment: &str) -> Option<&str> {
    segment
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
}

/// Shape of a template with every variable replaced by the same placeholder,
/// so `/mutate/{id}` and `/mutate/{firstId}` normalize to the same string.
pub fn normalize(template: &str) -> String {
    template
        .split('/')
        .map(|segment| match segment_variable(segment) {
            Some(_) => "{}",
            None => segment,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Convert a template into axum's route syntax.
///
/// Axum 0.8 captures use the same `{name}` braces; segments that merely look
/// like captures are rewritten so only whole-segment variables are captured.
pub fn to_axum_route(template: &str) -> String {
    let route = template
        .split('/')
        .map(|segment| match segment_variable(segment) {
            Some(name) => format!("{{{name}}}"),
            None => segment.replace('{', "{{").replace('}', "}}"),
        })
        .collect::<Vec<_>>()
        .join("/");
    if route.starts_with('/') {
        route
    } else {
        format!("/{route}")
    }
}

/// Convert a template into the `:name` capture syntax used by express-style routers.
pub fn to_colon_route(template: &str) -> String {
    template
        .split('/')
        .map(|segment| match segment_variable(segment) {
            Some(name) => format!(":{name}"),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}
