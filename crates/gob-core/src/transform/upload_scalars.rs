use crate::graphql::converter::ScalarProvider;
use crate::openapi::components::SchemaComponents;
use crate::openapi::schema::{Schema, SchemaType};

pub const UPLOAD_SCALAR: &str = "Upload";
pub const UPLOADS_SCALAR: &str = "Uploads";

/// A single uploaded file.
pub fn upload_schema() -> Schema {
    Schema::with_format(SchemaType::String, "binary")
}

/// A list of uploaded files sent under one field.
pub fn uploads_schema() -> Schema {
    Schema::array_of(upload_schema().into())
}

/// Scalar schemas for `Upload` and `Uploads`.
pub fn upload_scalars() -> SchemaComponents {
    let mut scalars = SchemaComponents::new();
    scalars.insert(UPLOAD_SCALAR.to_string(), upload_schema());
    scalars.insert(UPLOADS_SCALAR.to_string(), uploads_schema());
    scalars
}

/// Serves the upload scalars before falling back to another provider.
#[derive(Debug, Clone, Default)]
pub struct WithUploads<P>(pub P);

impl<P: ScalarProvider> ScalarProvider for WithUploads<P> {
    fn scalar_schema(&self, name: &str) -> Option<Schema> {
        match name {
            UPLOAD_SCALAR => Some(upload_schema()),
            UPLOADS_SCALAR => Some(uploads_schema()),
            _ => self.0.scalar_schema(name),
        }
    }
}
