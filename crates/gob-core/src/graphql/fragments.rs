//! Decides which named fragments can be published once as a shared schema
//! component and referenced from every spread site.

use std::collections::HashSet;

use apollo_compiler::ast::{FragmentDefinition, Selection};
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::{Name, Schema};
use indexmap::{IndexMap, IndexSet};

use super::ast::{FragmentMap, is_conditional};

/// Concrete object types a composite type can resolve to.
pub fn possible_types<'a>(schema: &'a Schema, type_name: &str) -> IndexSet<&'a str> {
    match schema.types.get(type_name) {
        Some(ExtendedType::Object(object)) => [object.name.as_str()].into_iter().collect(),
        Some(ExtendedType::Interface(_)) => schema
            .types
            .values()
            .filter_map(|ty| match ty {
                ExtendedType::Object(object)
                    if object
                        .implements_interfaces
                        .iter()
                        .any(|iface| iface.name == type_name) =>
                {
                    Some(object.name.as_str())
                }
                _ => None,
            })
            .collect(),
        Some(ExtendedType::Union(union_)) => union_
            .members
            .iter()
            .map(|member| member.name.as_str())
            .collect(),
        _ => IndexSet::new(),
    }
}

/// Whether every value of `sub_type` is also a value of `super_type`, i.e. a
/// selection on `super_type` always applies in a `sub_type` context.
pub fn is_sub_type(schema: &Schema, sub_type: &str, super_type: &str) -> bool {
    if sub_type == super_type {
        return true;
    }
    let super_types = possible_types(schema, super_type);
    let sub_types = possible_types(schema, sub_type);
    !sub_types.is_empty() && sub_types.iter().all(|ty| super_types.contains(ty))
}

/// Memoizing referenceability analysis over the fragments of one document.
pub struct FragmentAnalyzer<'a> {
    schema: &'a Schema,
    fragments: &'a FragmentMap,
    memo: IndexMap<Name, bool>,
    visiting: HashSet<Name>,
}

impl<'a> FragmentAnalyzer<'a> {
    pub fn new(schema: &'a Schema, fragments: &'a FragmentMap) -> Self {
        Self {
            schema,
            fragments,
            memo: IndexMap::new(),
            visiting: HashSet::new(),
        }
    }

    /// Names of all fragments that are referenceable against their own type
    /// condition, in document order.
    pub fn referenceable(mut self) -> IndexSet<Name> {
        let fragments = self.fragments;
        for fragment in fragments.values() {
            self.check_fragment(fragment, fragment.type_condition.as_str());
        }
        self.memo
            .into_iter()
            .filter_map(|(name, ok)| ok.then_some(name))
            .collect()
    }

    fn check_fragment(&mut self, fragment: &FragmentDefinition, context: &str) -> bool {
        if !is_sub_type(self.schema, context, fragment.type_condition.as_str()) {
            return false;
        }
        if let Some(known) = self.memo.get(&fragment.name) {
            return *known;
        }
        if !self.visiting.insert(fragment.name.clone()) {
            return false;
        }
        let ok = !is_conditional(&fragment.directives)
            && self.check_selection_set(&fragment.selection_set, fragment.type_condition.as_str());
        self.visiting.remove(&fragment.name);
        self.memo.insert(fragment.name.clone(), ok);
        ok
    }

    fn check_selection_set(&mut self, selection_set: &[Selection], type_name: &str) -> bool {
        for selection in selection_set {
            let ok = match selection {
                Selection::Field(field) => {
                    if is_conditional(&field.directives) {
                        return false;
                    }
                    match field_type_name(self.schema, type_name, field.name.as_str()) {
                        Some(inner) if !field.selection_set.is_empty() => {
                            self.check_selection_set(&field.selection_set, &inner)
                        }
                        _ => true,
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if is_conditional(&spread.directives) {
                        return false;
                    }
                    let fragments = self.fragments;
                    match fragments.get(&spread.fragment_name) {
                        Some(fragment) => self.check_fragment(fragment, type_name),
                        None => false,
                    }
                }
                Selection::InlineFragment(inline) => {
                    if is_conditional(&inline.directives) {
                        return false;
                    }
                    let condition = inline
                        .type_condition
                        .as_ref()
                        .map(|name| name.as_str())
                        .unwrap_or(type_name);
                    self.check_selection_set(&inline.selection_set, condition)
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }
}

/// Named type of a field declared on a composite type. Fields on a union are
/// looked up on its members in declaration order.
pub fn field_type_name(schema: &Schema, type_name: &str, field: &str) -> Option<String> {
    if field == "__typename" {
        return Some("String".to_string());
    }
    match schema.types.get(type_name)? {
        ExtendedType::Object(object) => object
            .fields
            .get(field)
            .map(|def| def.ty.inner_named_type().to_string()),
        ExtendedType::Interface(iface) => iface
            .fields
            .get(field)
            .map(|def| def.ty.inner_named_type().to_string()),
        ExtendedType::Union(union_) => union_
            .members
            .iter()
            .find_map(|member| field_type_name(schema, member.name.as_str(), field)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::ast::fragment_map;
    use apollo_compiler::ast::Document;

    const SCHEMA: &str = r#"
        interface I { i1: String! }
        type B implements I { b1: Int! b2: String! i1: String! }
        type A1 { a1: Int! a2: String b: B! }
        type A2 implements I { a1: Int! a2: Boolean! i1: String! }
        union A = A1 | A2
        type Query { a: A! b: B! i: I! }
    "#;

    fn analyze(document: &str) -> Vec<String> {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let doc = Document::parse(document, "doc.graphql").unwrap();
        let fragments = fragment_map(&doc);
        FragmentAnalyzer::new(&schema, &fragments)
            .referenceable()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    #[test]
    fn computes_possible_types() {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let of = |name| possible_types(&schema, name).into_iter().collect::<Vec<_>>();
        assert_eq!(of("A"), vec!["A1", "A2"]);
        assert_eq!(of("I"), vec!["B", "A2"]);
        assert_eq!(of("B"), vec!["B"]);
        assert!(is_sub_type(&schema, "A2", "I"));
        assert!(!is_sub_type(&schema, "A", "I"));
        assert!(is_sub_type(&schema, "A", "A"));
    }

    #[test]
    fn plain_fragments_are_referenceable() {
        let names = analyze(
            r#"
            fragment BFields on B { b1 b2 }
            fragment AFields on A { __typename ... on A1 { a1 b { ...BFields } } ... on A2 { a2 } }
            "#,
        );
        assert_eq!(names, vec!["BFields", "AFields"]);
    }

    #[test]
    fn conditional_selections_disqualify() {
        let names = analyze(
            r#"
            fragment Cond on B { b1 @include(if: true) }
            fragment UsesCond on B { ...Cond }
            fragment Spread on B { ...Plain @skip(if: false) }
            fragment Plain on B { b2 }
            "#,
        );
        assert_eq!(names, vec!["Plain"]);
    }

    #[test]
    fn spreads_on_wider_types_disqualify() {
        let names = analyze(
            r#"
            fragment OnB on B { b1 }
            fragment OnI on I { ... on B { ...OnB } }
            fragment Narrow on I { ...OnB }
            "#,
        );
        assert!(names.contains(&"OnB".to_string()));
        assert!(names.contains(&"OnI".to_string()));
        assert!(!names.contains(&"Narrow".to_string()));
    }
}
