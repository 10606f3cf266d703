//! Conversion of GraphQL types, guided by selection sets, into OpenAPI schemas.

use std::collections::HashSet;

use apollo_compiler::ast::{self, FragmentDefinition, OperationDefinition, OperationType, Selection};
use apollo_compiler::schema::{EnumType, ExtendedType, InputObjectType};
use apollo_compiler::{Name, Schema};
use indexmap::{IndexMap, IndexSet};
use log::debug;
use serde_json::Value;

use super::ast::{FragmentMap, is_conditional, value_to_json};
use super::directives::DirectiveReader;
use super::fragments::{is_sub_type, possible_types};
use crate::error::CompileError;
use crate::openapi::components::SchemaComponents;
use crate::openapi::schema::{Schema as OaSchema, SchemaOrRef, SchemaType};

/// Supplies schemas for custom scalars.
///
/// Called at most once per scalar name per compile. Returning `None` aborts
/// the compile with [`CompileError::UnknownScalar`].
pub trait ScalarProvider {
    fn scalar_schema(&self, name: &str) -> Option<OaSchema>;
}

impl<F> ScalarProvider for F
where
    F: Fn(&str) -> Option<OaSchema>,
{
    fn scalar_schema(&self, name: &str) -> Option<OaSchema> {
        self(name)
    }
}

impl ScalarProvider for SchemaComponents {
    fn scalar_schema(&self, name: &str) -> Option<OaSchema> {
        self.get(name).cloned()
    }
}

/// Provider for schemas without custom scalars.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCustomScalars;

impl ScalarProvider for NoCustomScalars {
    fn scalar_schema(&self, _name: &str) -> Option<OaSchema> {
        None
    }
}

/// Shared schema components accumulated during one compile. Each key is
/// materialized once; later requests only hand out a `$ref`.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    schemas: SchemaComponents,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&OaSchema> {
        self.schemas.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.schemas.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn schemas(&self) -> &SchemaComponents {
        &self.schemas
    }

    pub fn into_schemas(self) -> SchemaComponents {
        self.schemas
    }

    fn insert(&mut self, key: String, schema: OaSchema) {
        debug!("registered schema component `{key}`");
        self.schemas.insert(key, schema);
    }
}

/// Variable and result schemas of one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationTypes {
    pub name: Option<String>,
    pub variables: IndexMap<String, SchemaOrRef>,
    pub result: SchemaOrRef,
}

#[derive(Default)]
struct ObjectShape {
    properties: IndexMap<String, SchemaOrRef>,
    required: IndexSet<String>,
    all_of: Vec<SchemaOrRef>,
}

impl ObjectShape {
    fn into_schema(self) -> OaSchema {
        OaSchema {
            schema_type: Some(SchemaType::Object),
            properties: self.properties,
            required: self.required.into_iter().collect(),
            all_of: self.all_of,
            ..OaSchema::default()
        }
    }
}

/// Converts types of one schema, writing shared shapes into a registry owned
/// by the caller.
pub struct TypeConverter<'a> {
    schema: &'a Schema,
    scalars: &'a dyn ScalarProvider,
    fragments: &'a FragmentMap,
    referenceable: &'a IndexSet<Name>,
    registry: &'a mut ComponentRegistry,
    visiting_inputs: HashSet<String>,
}

impl<'a> TypeConverter<'a> {
    pub fn new(
        schema: &'a Schema,
        scalars: &'a dyn ScalarProvider,
        fragments: &'a FragmentMap,
        referenceable: &'a IndexSet<Name>,
        registry: &'a mut ComponentRegistry,
    ) -> Self {
        Self {
            schema,
            scalars,
            fragments,
            referenceable,
            registry,
            visiting_inputs: HashSet::new(),
        }
    }

    pub fn from_operation(
        &mut self,
        operation: &OperationDefinition,
    ) -> Result<OperationTypes, CompileError> {
        Ok(OperationTypes {
            name: operation.name.as_ref().map(|name| name.to_string()),
            variables: self.variables_from_operation(operation)?,
            result: self.result_from_operation(operation)?,
        })
    }

    /// One schema per variable, with declared defaults merged in.
    pub fn variables_from_operation(
        &mut self,
        operation: &OperationDefinition,
    ) -> Result<IndexMap<String, SchemaOrRef>, CompileError> {
        let mut variables = IndexMap::new();
        for variable in &operation.variables {
            let mut schema = self.from_type(&variable.ty, &[])?;
            if let Some(default) = &variable.default_value {
                merge_default(&mut schema, &value_to_json(default));
            }
            variables.insert(variable.name.to_string(), schema);
        }
        Ok(variables)
    }

    /// Schema of the `data` an operation returns. The root is never nullable.
    pub fn result_from_operation(
        &mut self,
        operation: &OperationDefinition,
    ) -> Result<SchemaOrRef, CompileError> {
        let root = self
            .schema
            .root_operation(operation.operation_type)
            .ok_or(CompileError::MissingRootType(root_kind(operation.operation_type)))?;
        self.from_named(root.as_str(), &operation.selection_set)
    }

    /// Schema of a (possibly wrapped) type. Anything not wrapped in non-null
    /// comes out nullable.
    pub fn from_type(
        &mut self,
        ty: &ast::Type,
        selection_set: &[Selection],
    ) -> Result<SchemaOrRef, CompileError> {
        match ty {
            ast::Type::NonNullNamed(name) => self.from_named(name.as_str(), selection_set),
            ast::Type::Named(name) => Ok(nullable(self.from_named(name.as_str(), selection_set)?)),
            ast::Type::NonNullList(inner) => {
                Ok(OaSchema::array_of(self.from_type(inner, selection_set)?).into())
            }
            ast::Type::List(inner) => Ok(nullable(
                OaSchema::array_of(self.from_type(inner, selection_set)?).into(),
            )),
        }
    }

    fn from_named(
        &mut self,
        name: &str,
        selection_set: &[Selection],
    ) -> Result<SchemaOrRef, CompileError> {
        let schema = self.schema;
        match schema.types.get(name) {
            Some(ExtendedType::Scalar(_)) => self.from_scalar(name),
            Some(ExtendedType::Enum(enum_type)) => self.from_enum(enum_type),
            Some(ExtendedType::Object(_) | ExtendedType::Interface(_) | ExtendedType::Union(_)) => {
                Ok(self.from_composite(name, selection_set)?.into())
            }
            Some(ExtendedType::InputObject(input)) => Ok(self.from_input_object(input)?.into()),
            None => Err(CompileError::UnknownType(name.to_string())),
        }
    }

    fn from_scalar(&mut self, name: &str) -> Result<SchemaOrRef, CompileError> {
        let builtin = match name {
            "Int" => Some(OaSchema::with_format(SchemaType::Integer, "int32")),
            "Float" => Some(OaSchema::with_format(SchemaType::Number, "double")),
            "String" | "ID" => Some(OaSchema::typed(SchemaType::String)),
            "Boolean" => Some(OaSchema::typed(SchemaType::Boolean)),
            _ => None,
        };
        if let Some(schema) = builtin {
            return Ok(schema.into());
        }
        self.reference(name.to_string(), |converter| {
            converter
                .scalars
                .scalar_schema(name)
                .ok_or_else(|| CompileError::UnknownScalar(name.to_string()))
        })
    }

    fn from_enum(&mut self, enum_type: &EnumType) -> Result<SchemaOrRef, CompileError> {
        self.reference(enum_type.name.to_string(), |_| {
            Ok(OaSchema {
                schema_type: Some(SchemaType::String),
                enum_values: enum_type
                    .values
                    .keys()
                    .map(|value| Value::String(value.to_string()))
                    .collect(),
                description: enum_type.description.as_deref().map(str::to_string),
                ..OaSchema::default()
            })
        })
    }

    fn from_input_object(&mut self, input: &InputObjectType) -> Result<OaSchema, CompileError> {
        let name = input.name.to_string();
        if !self.visiting_inputs.insert(name.clone()) {
            // Recursive input types stop at an untyped object.
            return Ok(OaSchema::typed(SchemaType::Object));
        }
        let mut properties = IndexMap::new();
        let mut required = Vec::new();
        for (field_name, field) in &input.fields {
            let mut schema = self.from_type(&field.ty, &[])?;
            if !schema.is_nullable() {
                required.push(field_name.to_string());
            }
            if let Some(default) = &field.default_value {
                merge_default(&mut schema, &value_to_json(default));
            }
            if let Some(description) = field.description.as_deref() {
                schema = describe(schema, description.to_string());
            }
            properties.insert(field_name.to_string(), schema);
        }
        self.visiting_inputs.remove(&name);
        Ok(OaSchema {
            required,
            description: input.description.as_deref().map(str::to_string),
            ..OaSchema::object(properties)
        })
    }

    fn from_composite(
        &mut self,
        type_name: &str,
        selection_set: &[Selection],
    ) -> Result<OaSchema, CompileError> {
        let mut shape = ObjectShape::default();
        self.add_selection_set(&mut shape, false, type_name, selection_set)?;
        Ok(shape.into_schema())
    }

    fn add_selection_set(
        &mut self,
        shape: &mut ObjectShape,
        optional: bool,
        type_name: &str,
        selection_set: &[Selection],
    ) -> Result<(), CompileError> {
        for selection in selection_set {
            match selection {
                Selection::Field(field) => {
                    let key = field.alias.as_ref().unwrap_or(&field.name).to_string();
                    let mut schema =
                        self.from_field(type_name, field.name.as_str(), &field.selection_set)?;
                    let description = DirectiveReader::new(self.schema)
                        .description(&field.directives)?
                        .and_then(|directive| directive.description)
                        .or_else(|| self.field_description(type_name, field.name.as_str()));
                    if let Some(description) = description {
                        schema = describe(schema, description);
                    }
                    shape.properties.insert(key.clone(), schema);
                    if !optional && !is_conditional(&field.directives) {
                        shape.required.insert(key);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let fragments = self.fragments;
                    let fragment = fragments
                        .get(&spread.fragment_name)
                        .ok_or_else(|| CompileError::UnknownFragment(spread.fragment_name.to_string()))?;
                    let condition = fragment.type_condition.as_str();
                    let spread_optional = optional
                        || is_conditional(&spread.directives)
                        || !is_sub_type(self.schema, type_name, condition);
                    if !spread_optional && self.referenceable.contains(&fragment.name) {
                        let reference = self.from_fragment(fragment)?;
                        if !shape.all_of.contains(&reference) {
                            shape.all_of.push(reference);
                        }
                    } else {
                        self.add_selection_set(
                            shape,
                            spread_optional,
                            condition,
                            &fragment.selection_set,
                        )?;
                    }
                }
                Selection::InlineFragment(inline) => {
                    let condition = inline
                        .type_condition
                        .as_ref()
                        .map(|name| name.as_str())
                        .unwrap_or(type_name);
                    let inline_optional = optional
                        || is_conditional(&inline.directives)
                        || !is_sub_type(self.schema, type_name, condition);
                    self.add_selection_set(shape, inline_optional, condition, &inline.selection_set)?;
                }
            }
        }
        Ok(())
    }

    fn from_field(
        &mut self,
        type_name: &str,
        field_name: &str,
        selection_set: &[Selection],
    ) -> Result<SchemaOrRef, CompileError> {
        if field_name == "__typename" {
            return self.typename_schema(type_name);
        }
        let field_type = self
            .field_type(type_name, field_name)
            .ok_or_else(|| CompileError::UnknownField {
                type_name: type_name.to_string(),
                field: field_name.to_string(),
            })?;
        self.from_type(&field_type, selection_set)
    }

    fn field_type(&self, type_name: &str, field_name: &str) -> Option<ast::Type> {
        match self.schema.types.get(type_name)? {
            ExtendedType::Object(object) => object.fields.get(field_name).map(|f| f.ty.clone()),
            ExtendedType::Interface(iface) => iface.fields.get(field_name).map(|f| f.ty.clone()),
            ExtendedType::Union(union_) => union_
                .members
                .iter()
                .find_map(|member| self.field_type(member.name.as_str(), field_name)),
            _ => None,
        }
    }

    fn field_description(&self, type_name: &str, field_name: &str) -> Option<String> {
        let definition = match self.schema.types.get(type_name)? {
            ExtendedType::Object(object) => object.fields.get(field_name)?,
            ExtendedType::Interface(iface) => iface.fields.get(field_name)?,
            _ => return None,
        };
        definition.description.as_deref().map(str::to_string)
    }

    fn typename_schema(&mut self, type_name: &str) -> Result<SchemaOrRef, CompileError> {
        let schema = self.schema;
        self.reference(format!("{type_name}.__typename"), |_| {
            Ok(OaSchema {
                schema_type: Some(SchemaType::String),
                enum_values: possible_types(schema, type_name)
                    .into_iter()
                    .map(|name| Value::String(name.to_string()))
                    .collect(),
                ..OaSchema::default()
            })
        })
    }

    fn from_fragment(&mut self, fragment: &FragmentDefinition) -> Result<SchemaOrRef, CompileError> {
        let condition = fragment.type_condition.as_str();
        self.reference(format!("{condition}.{}", fragment.name), |converter| {
            let mut schema = converter.from_composite(condition, &fragment.selection_set)?;
            schema.description = DirectiveReader::new(converter.schema)
                .description(&fragment.directives)?
                .and_then(|directive| directive.description);
            Ok(schema)
        })
    }

    fn reference(
        &mut self,
        key: String,
        create: impl FnOnce(&mut Self) -> Result<OaSchema, CompileError>,
    ) -> Result<SchemaOrRef, CompileError> {
        if !self.registry.contains(&key) {
            let schema = create(self)?;
            self.registry.insert(key.clone(), schema);
        }
        Ok(SchemaOrRef::component(&key))
    }
}

fn root_kind(operation_type: OperationType) -> &'static str {
    match operation_type {
        OperationType::Query => "query",
        OperationType::Mutation => "mutation",
        OperationType::Subscription => "subscription",
    }
}

/// Mark a schema nullable. A `$ref` cannot carry siblings, so it is wrapped
/// into `allOf` first.
pub fn nullable(schema: SchemaOrRef) -> SchemaOrRef {
    let mut schema = schema.into_schema();
    schema.nullable = Some(true);
    schema.into()
}

fn describe(schema: SchemaOrRef, description: String) -> SchemaOrRef {
    let mut schema = schema.into_schema();
    schema.description = Some(description);
    schema.into()
}

/// Merge a GraphQL default value into a schema.
///
/// Object defaults are pushed down into matching properties. They are dropped
/// on shared components, whose shape must stay the same for every user.
pub fn merge_default(schema: &mut SchemaOrRef, default: &Value) {
    match schema {
        SchemaOrRef::Ref { .. } => {
            if !default.is_object() {
                let reference = schema.clone();
                *schema = OaSchema {
                    default_value: Some(default.clone()),
                    all_of: vec![reference],
                    ..OaSchema::default()
                }
                .into();
            }
        }
        SchemaOrRef::Schema(inline) => match default {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if let Some(property) = inline.properties.get_mut(key) {
                        merge_default(property, value);
                    }
                }
            }
            other => inline.default_value = Some(other.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphql::ast::{fragment_map, operations};
    use crate::graphql::fragments::FragmentAnalyzer;
    use apollo_compiler::ast::Document;
    use serde_json::json;

    const SCHEMA: &str = r#"
        interface I { i1: String! }
        type B implements I { b1: Int! b2: String! i1: String! }
        type A1 { a1: Int! a2: String b: B! }
        type A2 implements I { a1: Int! a2: Boolean! i1: String! }
        union A = A1 | A2
        enum Color { RED GREEN }
        scalar Date
        input Filter { color: Color = RED, limit: Int! = 10, nested: Filter, from: Date }
        type Query { a: A! b: B! i: I! colors(filter: Filter): [Color!] today: Date }
    "#;

    fn convert(document: &str, scalars: &dyn ScalarProvider) -> (Vec<OperationTypes>, SchemaComponents) {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let doc = Document::parse(document, "doc.graphql").unwrap();
        let fragments = fragment_map(&doc);
        let referenceable = FragmentAnalyzer::new(&schema, &fragments).referenceable();
        let mut registry = ComponentRegistry::new();
        let mut converter =
            TypeConverter::new(&schema, scalars, &fragments, &referenceable, &mut registry);
        let types = operations(&doc)
            .map(|op| converter.from_operation(op).unwrap())
            .collect();
        (types, registry.into_schemas())
    }

    fn json_of(schema: &SchemaOrRef) -> Value {
        serde_json::to_value(schema).unwrap()
    }

    #[test]
    fn narrows_inline_fragments_on_unions() {
        let (types, components) = convert(
            r#"query getA($foo: Boolean!) {
                a {
                    __typename
                    ... on A1 { ... @include(if: $foo) { a1 } ... on A1 { a2 } }
                    ... { ... on A2 { i1 } }
                }
            }"#,
            &NoCustomScalars,
        );
        assert_eq!(json_of(&types[0].variables["foo"]), json!({"type": "boolean"}));
        assert_eq!(
            json_of(&types[0].result),
            json!({
                "type": "object",
                "properties": {
                    "a": {
                        "type": "object",
                        "properties": {
                            "__typename": {"$ref": "#/components/schemas/A.__typename"},
                            "a1": {"type": "integer", "format": "int32"},
                            "a2": {"type": "string", "nullable": true},
                            "i1": {"type": "string"}
                        },
                        "required": ["__typename"]
                    }
                },
                "required": ["a"]
            })
        );
        assert_eq!(
            serde_json::to_value(&components["A.__typename"]).unwrap(),
            json!({"type": "string", "enum": ["A1", "A2"]})
        );
    }

    #[test]
    fn matching_inline_fragments_stay_required() {
        let (types, _) = convert(
            r#"query getB($foo: Boolean!) {
                b { ... on B { b1 } ... on B @include(if: $foo) { b2 } }
            }"#,
            &NoCustomScalars,
        );
        let result = json_of(&types[0].result);
        assert_eq!(result["properties"]["b"]["required"], json!(["b1"]));
    }

    #[test]
    fn shares_referenceable_fragments() {
        let (types, components) = convert(
            r#"
            query one { a { ...AFields } }
            query two { a { ...AFields } b { ...BFields } }
            fragment AFields on A { __typename ... on A1 { a1 } }
            fragment BFields on B { b1 }
            "#,
            &NoCustomScalars,
        );
        let reference = json!({"allOf": [{"$ref": "#/components/schemas/A.AFields"}], "type": "object"});
        assert_eq!(json_of(&types[0].result)["properties"]["a"], reference);
        assert_eq!(json_of(&types[1].result)["properties"]["a"], reference);
        assert!(components.contains_key("A.AFields"));
        assert!(components.contains_key("B.BFields"));
        assert_eq!(components.keys().filter(|k| k.starts_with("A.")).count(), 2);
    }

    #[test]
    fn inlines_conditional_spreads() {
        let (types, components) = convert(
            r#"
            query one($show: Boolean!) { b { ...BFields @include(if: $show) } }
            fragment BFields on B { b1 }
            "#,
            &NoCustomScalars,
        );
        let b = &json_of(&types[0].result)["properties"]["b"];
        assert_eq!(b["properties"]["b1"], json!({"type": "integer", "format": "int32"}));
        assert!(b.get("required").is_none());
        assert!(!components.contains_key("B.BFields"));
    }

    #[test]
    fn merges_defaults_and_wraps_references() {
        let scalars = |name: &str| (name == "Date").then(|| OaSchema::with_format(SchemaType::String, "date"));
        let (types, components) = convert(
            r#"query q($filter: Filter = {limit: 5}, $color: Color = GREEN, $day: Date) {
                colors(filter: $filter) today
            }"#,
            &scalars,
        );
        let variables = &types[0].variables;
        assert_eq!(
            json_of(&variables["color"]),
            json!({"default": "GREEN", "allOf": [{"$ref": "#/components/schemas/Color"}], "nullable": true})
        );
        assert_eq!(
            json_of(&variables["day"]),
            json!({"allOf": [{"$ref": "#/components/schemas/Date"}], "nullable": true})
        );
        let filter = json_of(&variables["filter"]);
        assert_eq!(filter["properties"]["limit"], json!({"type": "integer", "format": "int32", "default": 5}));
        assert_eq!(filter["required"], json!(["limit"]));
        assert_eq!(filter["properties"]["nested"], json!({"type": "object", "nullable": true}));
        assert_eq!(
            serde_json::to_value(&components["Date"]).unwrap(),
            json!({"type": "string", "format": "date"})
        );
        assert_eq!(
            json_of(&types[0].result)["properties"]["colors"],
            json!({"type": "array", "items": {"$ref": "#/components/schemas/Color"}, "nullable": true})
        );
    }

    #[test]
    fn unknown_scalars_are_fatal() {
        let schema = Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap();
        let doc = Document::parse("query q { today }", "doc.graphql").unwrap();
        let fragments = fragment_map(&doc);
        let referenceable = IndexSet::new();
        let mut registry = ComponentRegistry::new();
        let mut converter =
            TypeConverter::new(&schema, &NoCustomScalars, &fragments, &referenceable, &mut registry);
        let op = operations(&doc).next().unwrap();
        let err = converter.result_from_operation(op).unwrap_err();
        assert_eq!(err.to_string(), "Unknown custom scalar: Date");
    }
}
