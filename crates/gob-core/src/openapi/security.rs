use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecuritySchemeType {
    ApiKey,
    Http,
    OAuth2,
    OpenIdConnect,
}

/// A scheme declared in the project config and published under
/// `components.securitySchemes`. `@OAOperation(security:)` refers to it by name.
///
/// OAuth flows stay raw JSON; nothing downstream reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityScheme {
    #[serde(rename = "type")]
    pub scheme_type: SecuritySchemeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Header, query or cookie name of an `apiKey` scheme.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bearer_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flows: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_id_connect_url: Option<String>,
}

/// Scheme name to required scopes. `{}` lets a request through unauthenticated.
pub type SecurityRequirement = IndexMap<String, Vec<String>>;

/// Requirement on a single scheme.
pub fn requirement(scheme: &str, scopes: &[String]) -> SecurityRequirement {
    IndexMap::from([(scheme.to_string(), scopes.to_vec())])
}

/// The empty requirement.
pub fn anonymous() -> SecurityRequirement {
    SecurityRequirement::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_config_scheme_in_camel_case() {
        let scheme: SecurityScheme = serde_yaml_ng::from_str(
            "type: http\nscheme: bearer\nbearerFormat: JWT\n",
        )
        .unwrap();
        assert_eq!(scheme.scheme_type, SecuritySchemeType::Http);
        assert_eq!(scheme.bearer_format.as_deref(), Some("JWT"));
    }

    #[test]
    fn anonymous_requirement_serializes_as_empty_object() {
        let requirements = vec![anonymous(), requirement("OAuth2", &["read".to_string()])];
        assert_eq!(
            serde_json::to_value(&requirements).unwrap(),
            serde_json::json!([{}, {"OAuth2": ["read"]}])
        );
    }
}
