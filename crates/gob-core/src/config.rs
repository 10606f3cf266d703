use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::openapi::components::{Components, SchemaComponents};
use crate::openapi::security::SecurityScheme;
use crate::openapi::spec::{Info, OpenApiSpec, Server, Tag};
use crate::transform::upload_scalars;

/// Top-level project configuration loaded from `.gob.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GobConfig {
    /// GraphQL schema (SDL) the operations are compiled against.
    pub schema: String,
    /// GraphQL document holding the annotated operations.
    pub document: String,
    pub output: String,
    pub format: OutputFormat,
    pub info: Info,
    pub servers: Vec<Server>,
    pub tags: Vec<Tag>,
    pub security_schemes: IndexMap<String, SecurityScheme>,
    /// Schemas for custom scalars, keyed by scalar name.
    pub custom_scalars: SchemaComponents,
    /// Provide `Upload` and `Uploads` without declaring them.
    pub upload_scalars: bool,
    pub publish: PublishConfig,
    pub bridge: BridgeSettings,
}

impl Default for GobConfig {
    fn default() -> Self {
        Self {
            schema: "schema.graphql".to_string(),
            document: "operations.graphql".to_string(),
            output: "openapi.yaml".to_string(),
            format: OutputFormat::Yaml,
            info: Info::default(),
            servers: Vec::new(),
            tags: Vec::new(),
            security_schemes: IndexMap::new(),
            custom_scalars: SchemaComponents::new(),
            upload_scalars: true,
            publish: PublishConfig::default(),
            bridge: BridgeSettings::default(),
        }
    }
}

impl GobConfig {
    /// Custom scalar schemas, including the upload scalars when enabled.
    /// Declared scalars win over the built-in upload ones.
    pub fn scalar_schemas(&self) -> SchemaComponents {
        let mut scalars = if self.upload_scalars {
            upload_scalars()
        } else {
            SchemaComponents::new()
        };
        for (name, schema) in &self.custom_scalars {
            scalars.insert(name.clone(), schema.clone());
        }
        scalars
    }

    /// Document the compiled paths and components are merged into.
    pub fn base_document(&self) -> OpenApiSpec {
        let components = Components::from_security_schemes(&self.security_schemes);
        OpenApiSpec {
            info: self.info.clone(),
            servers: self.servers.clone(),
            tags: self.tags.clone(),
            components,
            ..OpenApiSpec::default()
        }
    }
}

/// Serialization of the written API document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

/// Options for the published document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Drop the `x-graphql-*` annotations from the written document.
    pub strip_custom_properties: bool,
}

/// Request handling options used when mounting the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub validate_request: bool,
    pub validate_response: bool,
    /// Largest accepted JSON or url-encoded request body, in bytes.
    pub max_body_size: usize,
    /// Largest accepted non-file multipart field, in bytes.
    pub max_field_size: u64,
    pub max_file_size: Option<u64>,
    pub max_files: Option<usize>,
}

/// Body size limit applied when none is configured (100 KiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 100 * 1024;

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            validate_request: true,
            validate_response: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_field_size: 1_000_000,
            max_file_size: None,
            max_files: None,
        }
    }
}

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = ".gob.yaml";

/// Load config from a YAML file. Returns `None` if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<Option<GobConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config {}: {}", path.display(), e))?;
    let config: GobConfig = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("failed to parse config {}: {}", path.display(), e))?;
    Ok(Some(config))
}

/// Generate the default config file content.
pub fn default_config_content() -> &'static str {
    r#"# gob configuration
schema: schema.graphql
document: operations.graphql
output: openapi.yaml
format: yaml            # yaml | json

info:
  title: GraphQL Bridge API
  version: 1.0.0

servers: []
  # - url: https://api.example.com

upload_scalars: true    # provide Upload and Uploads as binary strings
custom_scalars: {}
  # DateTime:
  #   type: string
  #   format: date-time

publish:
  strip_custom_properties: false

bridge:
  validate_request: true
  validate_response: false
  max_body_size: 102400
  max_field_size: 1000000
  # max_file_size: 10485760
  # max_files: 10
"#
}
