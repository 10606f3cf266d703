use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::media_type::MediaType;
use super::request_body::JSON_CONTENT_TYPE;
use super::schema::SchemaOrRef;

/// A response of a published operation. Every response the compiler writes is
/// JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub description: String,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub content: IndexMap<String, MediaType>,
}

impl Response {
    pub fn json(description: impl Into<String>, schema: impl Into<SchemaOrRef>) -> Self {
        let mut content = IndexMap::new();
        content.insert(JSON_CONTENT_TYPE.to_string(), MediaType::with_schema(schema));
        Self {
            description: description.into(),
            content,
        }
    }

    /// Schema of the `application/json` content.
    pub fn json_schema(&self) -> Option<&SchemaOrRef> {
        self.content
            .get(JSON_CONTENT_TYPE)
            .and_then(|media| media.schema.as_ref())
    }
}
