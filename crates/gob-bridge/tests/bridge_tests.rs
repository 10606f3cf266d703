use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use gob_bridge::{
    BoxError, BridgeConfig, ExecutionRequest, ExecutionResult, Executor, FileUpload,
    ResponseTransformer, TransformedResponse, Upload, bridge_router, bridge_router_from_document,
};
use gob_core::Compiler;
use gob_core::openapi::spec::OpenApiSpec;
use gob_core::transform::{build_document, upload_scalars};
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

const SCHEMA: &str = r#"
    scalar Upload
    type Book { id: ID! title: String! pages: Int }
    input BookInput { title: String! pages: Int }
    type Query {
      book(id: ID!): Book
      books(limit: Int, author: String): [Book!]!
    }
    type Mutation {
      addBook(book: BookInput!): Book
      rename(id: ID!, title: String!): Book
      attach(id: ID!, cover: Upload!): Int
    }
"#;

const OPERATIONS: &str = r#"
    query book($id: ID!) @OAOperation(path: "/books/{id}") {
      book(id: $id) { id title pages }
    }
    query books($limit: Int, $author: String @OAParam(in: HEADER, name: "X-Author"))
      @OAOperation(path: "/books") {
      books(limit: $limit, author: $author) { id title }
    }
    mutation addBook($book: BookInput! @OABody) @OAOperation(path: "/books") {
      addBook(book: $book) { id title }
    }
    mutation rename($id: ID!, $title: String! @OABody)
      @OAOperation(path: "/books/{id}/title", method: PUT) {
      rename(id: $id, title: $title) { id title }
    }
    mutation attach($id: ID!, $cover: Upload! @OABody(contentType: MULTIPART_FORM_DATA))
      @OAOperation(path: "/books/{id}/cover") {
      attach(id: $id, cover: $cover)
    }
"#;

const BOUNDARY: &str = "gob-boundary";

fn compile() -> gob_core::Compilation {
    Compiler::from_sdl(SCHEMA, "schema.graphql")
        .unwrap()
        .with_scalars(upload_scalars())
        .compile_str(OPERATIONS, "operations.graphql")
        .unwrap()
}

fn router(executor: impl Executor + 'static, config: BridgeConfig) -> Router {
    let compilation = compile();
    bridge_router(&compilation.operations, &compilation.components, executor, config).unwrap()
}

/// Answers every request with the same result and keeps the requests.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<ExecutionRequest>>>,
}

impl Recorder {
    fn answering(&self, result: Value) -> impl Executor + 'static {
        let seen = Arc::clone(&self.seen);
        move |request: ExecutionRequest| {
            let seen = Arc::clone(&seen);
            let result = result.clone();
            async move {
                seen.lock().unwrap().push(request);
                Ok::<_, BoxError>(serde_json::from_value::<ExecutionResult>(result).unwrap())
            }
        }
    }

    fn last(&self) -> ExecutionRequest {
        self.seen.lock().unwrap().last().cloned().expect("executor was not called")
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn get_with_path_and_query_parameters() {
    let recorder = Recorder::default();
    let app = router(
        recorder.answering(json!({"data": {"book": {"id": "7", "title": "Dune", "pages": 412}}})),
        BridgeConfig::default(),
    );

    let (status, body) = send(app, get("/books/7")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"book": {"id": "7", "title": "Dune", "pages": 412}}));

    let request = recorder.last();
    assert_eq!(request.variables, json!({"id": "7"}).as_object().cloned().unwrap());
    assert!(request.document.starts_with("query book($id: ID!)"));
    assert!(!request.document.contains("@OAOperation"));
}

#[tokio::test]
async fn query_and_header_parameters_are_coerced() {
    let recorder = Recorder::default();
    let app = router(recorder.answering(json!({"data": {"books": []}})), BridgeConfig::default());

    let request = Request::get("/books?limit=2")
        .header("X-Author", "Herbert")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"books": []}));

    let variables = recorder.last().variables;
    assert_eq!(variables["limit"], json!(2));
    assert_eq!(variables["author"], json!("Herbert"));
    assert!(!variables.contains_key("x-author"));
}

#[tokio::test]
async fn invalid_parameters_are_rejected_before_execution() {
    let recorder = Recorder::default();
    let app = router(recorder.answering(json!({"data": {"books": []}})), BridgeConfig::default());

    let (status, body) = send(app, get("/books?limit=many")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"errors": [{
            "path": "limit",
            "errorCode": "type.openapi.requestValidation",
            "message": "must be integer",
            "location": "query",
        }]})
    );
    assert_eq!(recorder.calls(), 0);
}

#[tokio::test]
async fn request_validation_can_be_disabled() {
    let recorder = Recorder::default();
    let config = BridgeConfig {
        validate_request: false,
        ..BridgeConfig::default()
    };
    let app = router(recorder.answering(json!({"data": {"books": []}})), config);

    let (status, _) = send(app, get("/books?limit=many")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recorder.last().variables["limit"], json!("many"));
}

#[tokio::test]
async fn single_input_body_is_the_variable() {
    let recorder = Recorder::default();
    let app = router(
        recorder.answering(json!({"data": {"addBook": {"id": "1", "title": "Dune"}}})),
        BridgeConfig::default(),
    );

    let (status, body) = send(
        app,
        json_request("POST", "/books", r#"{"title": "Dune", "pages": 412}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["addBook"]["title"], "Dune");
    assert_eq!(
        recorder.last().variables["book"],
        json!({"title": "Dune", "pages": 412})
    );
}

#[tokio::test]
async fn body_violations_are_reported() {
    let recorder = Recorder::default();
    let app = router(recorder.answering(json!({"data": null})), BridgeConfig::default());

    let (status, body) = send(app, json_request("POST", "/books", r#"{"pages": "many"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let errors = body["errors"].as_array().unwrap();
    assert!(errors.contains(&json!({
        "path": "title",
        "errorCode": "required.openapi.requestValidation",
        "message": "must have required property 'title'",
        "location": "body",
    })));
    assert!(errors.contains(&json!({
        "path": "pages",
        "errorCode": "type.openapi.requestValidation",
        "message": "must be integer",
        "location": "body",
    })));
    assert_eq!(recorder.calls(), 0);
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let recorder = Recorder::default();
    let app = router(recorder.answering(json!({"data": null})), BridgeConfig::default());

    let (status, body) = send(app, json_request("POST", "/books", "{title")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({"errors": [{"message": "SyntaxError: Unable to parse JSON body"}]})
    );
}

#[tokio::test]
async fn oversized_bodies_are_refused() {
    let recorder = Recorder::default();
    let config = BridgeConfig {
        max_body_size: 64,
        ..BridgeConfig::default()
    };
    let app = router(recorder.answering(json!({"data": null})), config);

    let title = "x".repeat(100);
    let (status, body) = send(
        app.clone(),
        json_request("POST", "/books", &format!(r#"{{"title": "{title}"}}"#)),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        body,
        json!({"errors": [{"message": "Request body exceeds the 64 byte size limit."}]})
    );
    assert_eq!(recorder.calls(), 0);

    let (status, _) = send(app, json_request("POST", "/books", r#"{"title": "Dune"}"#)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unsupported_content_types_are_refused() {
    let recorder = Recorder::default();
    let app = router(recorder.answering(json!({"data": null})), BridgeConfig::default());

    let request = Request::post("/books")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("Dune"))
        .unwrap();
    let (status, body) = send(app.clone(), request).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        body,
        json!({"errors": [{"message": "Only \"application/json\" supported"}]})
    );

    let (status, body) = send(app, json_request("POST", "/books/1/cover", "{}")).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        body,
        json!({"errors": [{"message": "Only \"multipart/form-data\" supported"}]})
    );
    assert_eq!(recorder.calls(), 0);
}

#[tokio::test]
async fn wrapped_body_variables_join_path_parameters() {
    let recorder = Recorder::default();
    let app = router(
        recorder.answering(json!({"data": {"rename": {"id": "3", "title": "Emma"}}})),
        BridgeConfig::default(),
    );

    let (status, _) = send(
        app,
        json_request("PUT", "/books/3/title", r#"{"title": "Emma"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let variables = recorder.last().variables;
    assert_eq!(variables["id"], "3");
    assert_eq!(variables["title"], "Emma");
}

#[tokio::test]
async fn graphql_errors_answer_500() {
    let recorder = Recorder::default();
    let result = json!({"data": {"book": null}, "errors": [{"message": "boom"}]});
    let app = router(recorder.answering(result.clone()), BridgeConfig::default());

    let (status, body) = send(app, get("/books/1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, result);
}

#[tokio::test]
async fn responses_are_validated_when_enabled() {
    let config = BridgeConfig {
        validate_response: true,
        ..BridgeConfig::default()
    };

    let recorder = Recorder::default();
    let app = router(
        recorder.answering(json!({"data": {"book": {"id": "1", "title": 5, "pages": null}}})),
        config.clone(),
    );
    let (status, body) = send(app, get("/books/1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errors"], json!([{"message": "The response was not valid."}]));
    assert_eq!(
        body["validationErrors"],
        json!([{
            "path": "book.title",
            "errorCode": "type.openapi.responseValidation",
            "message": "must be string",
        }])
    );
    assert_eq!(body["graphqlErrors"], json!([]));

    let recorder = Recorder::default();
    let app = router(
        recorder.answering(json!({"data": {"book": null}, "errors": [{"message": "boom"}]})),
        config.clone(),
    );
    let (status, body) = send(app, get("/books/1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errors"], json!([{"message": "GraphQL Error"}]));
    assert_eq!(body["graphqlErrors"], json!([{"message": "boom"}]));

    let recorder = Recorder::default();
    let app = router(
        recorder.answering(json!({"data": {"book": {"id": "1", "title": "Dune", "pages": null}}})),
        config,
    );
    let (status, _) = send(app, get("/books/1")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn transformer_overrides_the_response() {
    let transformer = ResponseTransformer::new(|context| {
        let missing = context.operation.operation_id.as_deref() == Some("book")
            && context
                .result
                .data
                .as_ref()
                .is_some_and(|data| data["book"].is_null());
        missing.then(|| TransformedResponse {
            status: StatusCode::NOT_FOUND,
            content_type: Some("text/plain".to_string()),
            body: Bytes::from(format!("no book at {}", context.path)),
        })
    });
    let config = BridgeConfig {
        validate_response: true,
        ..BridgeConfig::default()
    }
    .with_response_transformer(transformer);

    let recorder = Recorder::default();
    let app = router(recorder.answering(json!({"data": {"book": null}})), config);
    let response = app.oneshot(get("/books/9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes, Bytes::from("no book at /books/{id}"));
}

#[tokio::test]
async fn executor_failures_answer_500() {
    let failing = |_: ExecutionRequest| async { Err::<ExecutionResult, BoxError>("upstream down".into()) };
    let app = router(failing, BridgeConfig::default());
    let (status, body) = send(app, get("/books/1")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({"errors": [{"message": "executor failed: upstream down"}]})
    );
}

async fn attach_cover(
    kept: Arc<Mutex<Vec<FileUpload>>>,
    request: ExecutionRequest,
) -> Result<ExecutionResult, BoxError> {
    assert_eq!(request.variables["id"], "5");
    assert_eq!(request.variables["cover"], Value::Null);
    let slot = request
        .uploads
        .get("cover")
        .and_then(Upload::as_single)
        .ok_or("cover upload missing")?;
    let file = slot.wait().await?.ok_or("cover not sent")?;
    let bytes = file.bytes().await?;
    kept.lock().unwrap().push(file.clone());
    Ok(ExecutionResult::data(json!({
        "attach": bytes.len(),
        "name": file.filename(),
    })))
}

#[tokio::test]
async fn multipart_uploads_reach_the_executor() {
    let kept: Arc<Mutex<Vec<FileUpload>>> = Arc::default();
    let executor = {
        let kept = Arc::clone(&kept);
        move |request: ExecutionRequest| attach_cover(Arc::clone(&kept), request)
    };
    let app = router(executor, BridgeConfig::default());

    let form = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"cover\"; filename=\"cover.png\"\r\nContent-Type: image/png\r\n\r\nPNG\r\n--{BOUNDARY}--\r\n"
    );
    let request = Request::post("/books/5/cover")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, form.len())
        .body(Body::from(form))
        .unwrap();
    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"attach": 3, "name": "cover.png"}));

    let file = kept.lock().unwrap()[0].clone();
    assert_eq!(file.content_type(), Some("image/png"));
    for _ in 0..100 {
        if file.is_released() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(file.is_released());
}

#[tokio::test]
async fn mounts_from_a_written_document() {
    let document = build_document(OpenApiSpec::default(), &compile());
    let recorder = Recorder::default();
    let app = bridge_router_from_document(
        &document,
        recorder.answering(json!({"data": {"books": [{"id": "1", "title": "Dune"}]}})),
        BridgeConfig::default(),
    )
    .unwrap();

    let (status, body) = send(app.clone(), get("/books?limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["books"][0]["title"], "Dune");

    let (status, _) = send(app, get("/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
