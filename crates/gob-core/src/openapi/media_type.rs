use serde::{Deserialize, Serialize};

use super::schema::SchemaOrRef;

/// Content of a request or response under one media type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaType {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaOrRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,
}

impl MediaType {
    pub fn with_schema(schema: impl Into<SchemaOrRef>) -> Self {
        MediaType {
            schema: Some(schema.into()),
            example: None,
        }
    }
}
