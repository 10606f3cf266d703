use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::schema::Schema;
use super::security::SecurityScheme;

/// Named schemas registered while converting GraphQL types.
pub type SchemaComponents = IndexMap<String, Schema>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub schemas: SchemaComponents,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub security_schemes: IndexMap<String, SecurityScheme>,
}

impl Components {
    /// `None` when there is nothing to publish.
    pub fn from_security_schemes(schemes: &IndexMap<String, SecurityScheme>) -> Option<Self> {
        (!schemes.is_empty()).then(|| Self {
            schemas: SchemaComponents::new(),
            security_schemes: schemes.clone(),
        })
    }

    /// Add compiled schemas. A compiled schema replaces a same-named one
    /// already in the base document.
    pub fn merge_schemas(&mut self, schemas: &SchemaComponents) {
        for (name, schema) in schemas {
            self.schemas.insert(name.clone(), schema.clone());
        }
    }
}
