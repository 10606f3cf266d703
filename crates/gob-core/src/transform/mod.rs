pub mod custom_properties;
pub mod document;
pub mod operations;
pub mod upload_scalars;

pub use custom_properties::remove_custom_properties;
pub use document::{DocumentTransform, build_document, build_document_with};
pub use operations::operations_from_document;
pub use upload_scalars::{WithUploads, upload_scalars};
