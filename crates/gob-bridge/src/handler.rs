use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, Request};
use axum::response::{IntoResponse, Response};
use gob_core::OperationDescriptor;
use gob_core::graphql::BodyContentType;
use gob_core::openapi::components::SchemaComponents;
use gob_core::openapi::operation::{HttpMethod, Operation};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body_util::LengthLimitError;
use indexmap::IndexMap;
use log::{debug, warn};
use serde_json::{Map, Value};

use crate::BridgeConfig;
use crate::error::{BridgeError, InvalidResponseError, SchemaError};
use crate::executor::{ExecutionRequest, ExecutionResult, Executor};
use crate::multipart::{
    boundary, content_length_with_preamble, process_request, upload_preamble, with_preamble,
};
use crate::validate::{OperationSchemas, RawParameters};

/// What a response transformer sees once an operation has run.
#[derive(Debug)]
pub struct ResponseContext<'a> {
    pub result: &'a ExecutionResult,
    pub request: &'a ExecutionRequest,
    pub operation: &'a Operation,
    pub method: HttpMethod,
    pub path: &'a str,
}

/// A response that replaces the default handling entirely, validation
/// included.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl IntoResponse for TransformedResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        match self.content_type.map(HeaderValue::try_from) {
            Some(Ok(content_type)) => {
                response.headers_mut().insert(CONTENT_TYPE, content_type);
            }
            Some(Err(error)) => warn!("ignoring invalid response content type: {error}"),
            None => {
                response.headers_mut().remove(CONTENT_TYPE);
            }
        }
        response
    }
}

/// Hook deciding the response for a result. Returning `None` keeps the
/// default handling.
#[derive(Clone)]
pub struct ResponseTransformer(
    Arc<dyn Fn(&ResponseContext<'_>) -> Option<TransformedResponse> + Send + Sync>,
);

impl ResponseTransformer {
    pub fn new(
        transform: impl Fn(&ResponseContext<'_>) -> Option<TransformedResponse> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(transform))
    }

    pub fn apply(&self, context: &ResponseContext<'_>) -> Option<TransformedResponse> {
        (self.0)(context)
    }
}

impl fmt::Debug for ResponseTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseTransformer")
    }
}

/// Serves one compiled operation.
pub struct OperationHandler {
    descriptor: OperationDescriptor,
    schemas: OperationSchemas,
    executor: Arc<dyn Executor>,
    config: BridgeConfig,
    supported_content_types: Vec<String>,
}

impl OperationHandler {
    pub fn new(
        descriptor: OperationDescriptor,
        components: &SchemaComponents,
        executor: Arc<dyn Executor>,
        config: BridgeConfig,
    ) -> Result<Self, SchemaError> {
        let schemas = OperationSchemas::new(descriptor.api_operation(), components)?;
        let supported_content_types = descriptor
            .api_operation()
            .request_body
            .iter()
            .flat_map(|body| body.content.keys().cloned())
            .collect();
        Ok(Self {
            descriptor,
            schemas,
            executor,
            config,
            supported_content_types,
        })
    }

    pub fn descriptor(&self) -> &OperationDescriptor {
        &self.descriptor
    }

    pub async fn handle(&self, request: Request) -> Response {
        match self.respond(request).await {
            Ok(response) => response,
            Err(error) => {
                match &error {
                    BridgeError::Executor(_) | BridgeError::InvalidResponse(_) => {
                        warn!("operation `{}` failed: {error}", self.descriptor.name());
                    }
                    BridgeError::Upload(upload) => {
                        warn!(
                            "multipart request for `{}` rejected: {}",
                            self.descriptor.name(),
                            upload.message()
                        );
                    }
                    _ => debug!("request for `{}` rejected: {error}", self.descriptor.name()),
                }
                error.into_response()
            }
        }
    }

    /// Body encoding of a request, if the operation accepts it.
    fn body_kind(&self, headers: &HeaderMap) -> Option<BodyContentType> {
        let media_type = headers
            .get(CONTENT_TYPE)?
            .to_str()
            .ok()?
            .parse::<mime::Mime>()
            .ok()?;
        let essence = media_type.essence_str();
        self.supported_content_types
            .iter()
            .any(|supported| supported == essence)
            .then(|| BodyContentType::from_media_type(essence))
            .flatten()
    }

    async fn respond(&self, request: Request) -> Result<Response, BridgeError> {
        let (mut parts, body) = request.into_parts();
        let path_params = Path::<HashMap<String, String>>::from_request_parts(&mut parts, &())
            .await
            .map(|Path(params)| params)
            .unwrap_or_default();
        let query: Vec<(String, String)> = parts
            .uri
            .query()
            .and_then(|query| serde_urlencoded::from_str(query).ok())
            .unwrap_or_default();

        let kind = self.body_kind(&parts.headers);
        let mut body = Some(body);
        let parsed_body = match kind {
            Some(BodyContentType::Json) => {
                let bytes = read_body(body.take(), self.config.max_body_size).await?;
                let value = if bytes.is_empty() {
                    Value::Object(Map::new())
                } else {
                    serde_json::from_slice(&bytes).map_err(|_| BridgeError::InvalidJson)?
                };
                Some(value)
            }
            Some(BodyContentType::FormData) => {
                let bytes = read_body(body.take(), self.config.max_body_size).await?;
                let fields: Vec<(String, String)> = serde_urlencoded::from_bytes(&bytes)
                    .map_err(|error| BridgeError::InvalidForm(error.to_string()))?;
                Some(
                    self.schemas
                        .coerce_form(BodyContentType::FormData.media_type(), fields),
                )
            }
            _ => None,
        };

        if self.descriptor.method().has_body()
            && !self.supported_content_types.is_empty()
            && kind.is_none()
        {
            return Err(BridgeError::UnsupportedMediaType(
                self.supported_content_types.clone(),
            ));
        }

        let parameters = self.schemas.coerce_parameters(RawParameters {
            path: &path_params,
            query: &query,
            headers: &parts.headers,
        });

        if self.config.validate_request {
            let body = kind
                .zip(parsed_body.as_ref())
                .map(|(kind, value)| (kind.media_type(), value));
            let violations = self.schemas.validate_request(&parameters, body);
            if !violations.is_empty() {
                return Err(BridgeError::InvalidRequest(violations));
            }
        }

        let mut variables = Map::new();
        for parameter in self.schemas.parameters() {
            if let Some(value) = parameters.get(parameter.location, &parameter.name) {
                let variable = self.descriptor.variable_for_parameter(&parameter.name);
                variables.insert(variable.to_string(), value.clone());
            }
        }

        if let Some(value) = &parsed_body {
            let whole_body = kind == Some(BodyContentType::Json)
                && self.descriptor.request_body_is_single_input();
            self.body_variables(value, whole_body, &mut variables);
        }

        let mut uploads = IndexMap::new();
        let mut pending = None;
        if let (Some(BodyContentType::MultipartFormData), Some(body)) = (kind, body.take()) {
            let content_type = parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default();
            let boundary = boundary(content_type)?;
            let preamble = upload_preamble(
                &boundary,
                self.descriptor.source(),
                self.descriptor.request_body_variable_map(),
            );
            let declared = parts
                .headers
                .get(CONTENT_LENGTH)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse::<u64>().ok());
            parts.headers.insert(
                CONTENT_LENGTH,
                HeaderValue::from(content_length_with_preamble(declared, &preamble)),
            );

            let stream = with_preamble(preamble, body.into_data_stream());
            let processed = process_request(stream, boundary, self.config.limits).await?;
            if let Some(Value::Object(multipart_variables)) = processed.operations.get("variables") {
                for (name, value) in multipart_variables {
                    variables.insert(name.clone(), value.clone());
                }
            }
            uploads = processed.uploads.variables(None);
            pending = Some((processed.task, processed.uploads));
        }

        let request = ExecutionRequest {
            document: self.descriptor.source().to_string(),
            variables,
            uploads,
            headers: parts.headers,
        };
        debug!(
            "executing `{}` with variables {:?}",
            self.descriptor.name(),
            request.variables.keys().collect::<Vec<_>>()
        );
        let result = self.executor.execute(request.clone()).await;

        if let Some((task, uploads)) = pending {
            tokio::spawn(async move {
                if let Err(error) = task.finish().await {
                    debug!("upload stream ended with an error: {error}");
                }
                uploads.release();
            });
        }

        let result = result.map_err(|error| BridgeError::Executor(error.to_string()))?;
        self.result_response(&request, result)
    }

    /// Copy body values into variables. Values missing from the body stay
    /// absent; `whole_body` uses the entire body when the key is missing.
    fn body_variables(&self, body: &Value, whole_body: bool, variables: &mut Map<String, Value>) {
        for (variable, key) in self.descriptor.request_body_variable_map() {
            let value = body
                .get(key)
                .or_else(|| key.strip_suffix("[]").and_then(|key| body.get(key)));
            match value {
                Some(value) => {
                    variables.insert(variable.clone(), value.clone());
                }
                None if whole_body => {
                    variables.insert(variable.clone(), body.clone());
                }
                None => {}
            }
        }
    }

    fn result_response(
        &self,
        request: &ExecutionRequest,
        result: ExecutionResult,
    ) -> Result<Response, BridgeError> {
        if let Some(transformer) = &self.config.response_transformer {
            let context = ResponseContext {
                result: &result,
                request,
                operation: self.descriptor.api_operation(),
                method: self.descriptor.method(),
                path: self.descriptor.path(),
            };
            if let Some(response) = transformer.apply(&context) {
                return Ok(response.into_response());
            }
        }

        if self.config.validate_response {
            let violations = self.schemas.validate_response(result.data.as_ref());
            if !violations.is_empty() || result.has_errors() {
                let message = if violations.is_empty() {
                    "GraphQL Error"
                } else {
                    "The response was not valid."
                };
                return Err(InvalidResponseError {
                    message: message.to_string(),
                    validation_errors: violations,
                    graphql_errors: result.errors,
                }
                .into());
            }
        }

        if result.has_errors() {
            return Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(result)).into_response());
        }
        Ok(Json(result.data.unwrap_or(Value::Null)).into_response())
    }
}

/// Buffer a JSON or form body, refusing more than `limit` bytes.
async fn read_body(body: Option<axum::body::Body>, limit: usize) -> Result<Bytes, BridgeError> {
    let Some(body) = body else {
        return Ok(Bytes::new());
    };
    axum::body::to_bytes(body, limit).await.map_err(|error| {
        let error = error.into_inner();
        if error.is::<LengthLimitError>() {
            BridgeError::BodyTooLarge(limit)
        } else {
            BridgeError::UnreadableBody(error.to_string())
        }
    })
}
