use std::collections::HashSet;

use super::components::SchemaComponents;
use super::media_type::MediaType;
use super::operation::Operation;
use super::schema::{AdditionalProperties, COMPONENT_REF_PREFIX, Schema, SchemaOrRef};
use crate::error::ResolveError;

/// Inlines `$ref` pointers into `components.schemas`, producing schemas a
/// validator can walk without a component table. Circular references are
/// reported instead of expanded forever.
pub struct RefResolver<'a> {
    schemas: &'a SchemaComponents,
    visiting: HashSet<String>,
}

impl<'a> RefResolver<'a> {
    pub fn new(schemas: &'a SchemaComponents) -> Self {
        Self {
            schemas,
            visiting: HashSet::new(),
        }
    }

    /// Resolve parameter and request body schemas of an operation in place.
    pub fn resolve_operation(&mut self, op: &mut Operation) -> Result<(), ResolveError> {
        for parameter in &mut op.parameters {
            parameter.schema = SchemaOrRef::from(self.resolve(&parameter.schema)?);
        }
        if let Some(body) = op.request_body.as_mut() {
            for media in body.content.values_mut() {
                self.resolve_media_type(media)?;
            }
        }
        for response in op.responses.values_mut() {
            for media in response.content.values_mut() {
                self.resolve_media_type(media)?;
            }
        }
        Ok(())
    }

    fn resolve_media_type(&mut self, media: &mut MediaType) -> Result<(), ResolveError> {
        if let Some(schema) = media.schema.as_ref() {
            media.schema = Some(SchemaOrRef::from(self.resolve(schema)?));
        }
        Ok(())
    }

    /// Resolve a schema into an inline schema with no remaining `$ref` nodes.
    pub fn resolve(&mut self, schema_or_ref: &SchemaOrRef) -> Result<Schema, ResolveError> {
        match schema_or_ref {
            SchemaOrRef::Ref { ref_path } => {
                if !self.visiting.insert(ref_path.clone()) {
                    return Err(ResolveError::CircularRef(ref_path.clone()));
                }
                let target = self.lookup(ref_path)?;
                let resolved = self.resolve_schema(target);
                self.visiting.remove(ref_path);
                resolved
            }
            SchemaOrRef::Schema(schema) => self.resolve_schema(schema),
        }
    }

    fn resolve_schema(&mut self, schema: &Schema) -> Result<Schema, ResolveError> {
        let mut resolved = schema.clone();

        for (name, prop) in &schema.properties {
            resolved
                .properties
                .insert(name.clone(), SchemaOrRef::from(self.resolve(prop)?));
        }

        if let Some(items) = schema.items.as_deref() {
            resolved.items = Some(Box::new(SchemaOrRef::from(self.resolve(items)?)));
        }

        resolved.all_of = self.resolve_all(&schema.all_of)?;
        resolved.one_of = self.resolve_all(&schema.one_of)?;
        resolved.any_of = self.resolve_all(&schema.any_of)?;

        if let Some(AdditionalProperties::Schema(inner)) = &schema.additional_properties {
            resolved.additional_properties = Some(AdditionalProperties::Schema(Box::new(
                SchemaOrRef::from(self.resolve(inner)?),
            )));
        }

        Ok(resolved)
    }

    fn resolve_all(&mut self, schemas: &[SchemaOrRef]) -> Result<Vec<SchemaOrRef>, ResolveError> {
        schemas
            .iter()
            .map(|s| self.resolve(s).map(SchemaOrRef::from))
            .collect()
    }

    fn lookup(&self, ref_path: &str) -> Result<&'a Schema, ResolveError> {
        let name = parse_ref_name(ref_path)?;
        self.schemas
            .get(name)
            .ok_or_else(|| ResolveError::RefTargetNotFound(ref_path.to_string()))
    }
}

/// Parse a `$ref` path like `#/components/schemas/Foo` and extract the name.
pub fn parse_ref_name(ref_path: &str) -> Result<&str, ResolveError> {
    ref_path
        .strip_prefix(COMPONENT_REF_PREFIX)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ResolveError::InvalidRefFormat(ref_path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::schema::SchemaType;

    fn components() -> SchemaComponents {
        let mut schemas = SchemaComponents::new();
        let mut color = Schema::typed(SchemaType::String);
        color.enum_values = vec![serde_json::json!("RED"), serde_json::json!("BLUE")];
        schemas.insert("Color".to_string(), color);
        schemas
    }

    #[test]
    fn inlines_nested_refs() {
        let schemas = components();
        let mut resolver = RefResolver::new(&schemas);
        let wrapper = SchemaOrRef::from(Schema {
            all_of: vec![SchemaOrRef::component("Color")],
            nullable: Some(true),
            ..Schema::default()
        });
        let resolved = resolver.resolve(&wrapper).unwrap();
        let inner = resolved.all_of[0].as_schema().unwrap();
        assert_eq!(inner.enum_values.len(), 2);
    }

    #[test]
    fn reports_missing_targets() {
        let schemas = components();
        let mut resolver = RefResolver::new(&schemas);
        let result = resolver.resolve(&SchemaOrRef::component("Shape"));
        assert!(matches!(result, Err(ResolveError::RefTargetNotFound(_))));
    }

    #[test]
    fn detects_cycles() {
        let mut schemas = SchemaComponents::new();
        let mut node = Schema::typed(SchemaType::Object);
        node.properties
            .insert("next".to_string(), SchemaOrRef::component("Node"));
        schemas.insert("Node".to_string(), node);
        let mut resolver = RefResolver::new(&schemas);
        let result = resolver.resolve(&SchemaOrRef::component("Node"));
        assert!(matches!(result, Err(ResolveError::CircularRef(_))));
    }

    #[test]
    fn rejects_foreign_pointers() {
        assert!(parse_ref_name("#/components/responses/Foo").is_err());
        assert_eq!(
            parse_ref_name("#/components/schemas/A.__typename").unwrap(),
            "A.__typename"
        );
    }
}
