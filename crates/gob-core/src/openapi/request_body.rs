use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::media_type::MediaType;
use super::schema::SchemaOrRef;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// Body assembled from the `@OABody` variables of an operation.
///
/// `required` stays `false` on compiled bodies: whether a body may be omitted
/// is decided per variable by the body schema's `required` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub content: IndexMap<String, MediaType>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

impl RequestBody {
    pub fn new(
        description: Option<String>,
        content_type: &str,
        schema: impl Into<SchemaOrRef>,
    ) -> Self {
        Self {
            description,
            content: IndexMap::new(),
            required: false,
        }
        .with_content(content_type, schema)
    }

    /// Accept the body under another media type too.
    pub fn with_content(mut self, content_type: &str, schema: impl Into<SchemaOrRef>) -> Self {
        self.content
            .insert(content_type.to_string(), MediaType::with_schema(schema));
        self
    }

    /// Media types that carry a schema, in declaration order.
    pub fn schemas(&self) -> impl Iterator<Item = (&str, &SchemaOrRef)> {
        self.content.iter().filter_map(|(content_type, media)| {
            media
                .schema
                .as_ref()
                .map(|schema| (content_type.as_str(), schema))
        })
    }
}
