use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Prefix of every pointer into `components.schemas`.
pub const COMPONENT_REF_PREFIX: &str = "#/components/schemas/";

/// An OpenAPI 3.0 `type` keyword value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl SchemaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Integer => "integer",
            SchemaType::Boolean => "boolean",
            SchemaType::Array => "array",
            SchemaType::Object => "object",
        }
    }
}

/// A reference or inline schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaOrRef {
    Ref {
        #[serde(rename = "$ref")]
        ref_path: String,
    },
    Schema(Box<Schema>),
}

impl SchemaOrRef {
    /// A `$ref` to the named entry of `components.schemas`.
    pub fn component(name: &str) -> Self {
        SchemaOrRef::Ref {
            ref_path: format!("{COMPONENT_REF_PREFIX}{name}"),
        }
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, SchemaOrRef::Ref { .. })
    }

    pub fn as_schema(&self) -> Option<&Schema> {
        match self {
            SchemaOrRef::Schema(schema) => Some(schema),
            SchemaOrRef::Ref { .. } => None,
        }
    }

    pub fn is_nullable(&self) -> bool {
        self.as_schema()
            .is_some_and(|schema| schema.nullable == Some(true))
    }

    pub fn schema_type(&self) -> Option<SchemaType> {
        self.as_schema().and_then(|schema| schema.schema_type)
    }

    pub fn has_default(&self) -> bool {
        self.as_schema()
            .is_some_and(|schema| schema.default_value.is_some())
    }

    /// Returns an inline schema, wrapping a `$ref` into `allOf: [$ref]` so that
    /// sibling keywords can be attached without touching the component.
    pub fn into_schema(self) -> Schema {
        match self {
            SchemaOrRef::Schema(schema) => *schema,
            reference @ SchemaOrRef::Ref { .. } => Schema {
                all_of: vec![reference],
                ..Schema::default()
            },
        }
    }
}

impl From<Schema> for SchemaOrRef {
    fn from(schema: Schema) -> Self {
        SchemaOrRef::Schema(Box::new(schema))
    }
}

/// An OpenAPI 3.0 schema object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub nullable: Option<bool>,

    // Object properties
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, SchemaOrRef>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    #[serde(
        rename = "additionalProperties",
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<AdditionalProperties>,

    // Array items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaOrRef>>,

    // Composition
    #[serde(rename = "allOf", default, skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<SchemaOrRef>,

    #[serde(rename = "oneOf", default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<SchemaOrRef>,

    #[serde(rename = "anyOf", default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<SchemaOrRef>,

    // Enum values
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<serde_json::Value>,

    // Numeric constraints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    // String constraints
    #[serde(rename = "minLength", skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(rename = "maxLength", skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    // Array constraints
    #[serde(rename = "minItems", skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(rename = "maxItems", skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,

    /// Operation variable a request body schema (or body property) is bound to.
    #[serde(
        rename = "x-graphql-variable-name",
        skip_serializing_if = "Option::is_none"
    )]
    pub variable_name: Option<String>,
}

impl Schema {
    pub fn typed(schema_type: SchemaType) -> Self {
        Schema {
            schema_type: Some(schema_type),
            ..Schema::default()
        }
    }

    pub fn with_format(schema_type: SchemaType, format: &str) -> Self {
        Schema {
            schema_type: Some(schema_type),
            format: Some(format.to_string()),
            ..Schema::default()
        }
    }

    pub fn array_of(items: SchemaOrRef) -> Self {
        Schema {
            schema_type: Some(SchemaType::Array),
            items: Some(Box::new(items)),
            ..Schema::default()
        }
    }

    pub fn object(properties: IndexMap<String, SchemaOrRef>) -> Self {
        Schema {
            schema_type: Some(SchemaType::Object),
            properties,
            ..Schema::default()
        }
    }
}

/// `additionalProperties` can be a boolean or a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    Bool(bool),
    Schema(Box<SchemaOrRef>),
}
