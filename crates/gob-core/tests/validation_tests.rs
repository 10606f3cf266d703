use gob_core::{CompileError, Compiler, ValidationErrors};

const SCHEMA: &str = r#"
type Query {
  item(id: Int!, other: Int): String
}

type Mutation {
  mutate(id: ID!, data: String): String
  annotate(note: String, tag: String): String
}

type Subscription {
  ticks: Int
}
"#;

fn validate(document: &str) -> Result<(), ValidationErrors> {
    let compiler = Compiler::from_sdl(SCHEMA, "schema.graphql").unwrap();
    let document = compiler.parse_document(document, "doc.graphql").unwrap();
    compiler.validate(&document)
}

fn messages(document: &str) -> Vec<String> {
    validate(document)
        .expect_err("document should be rejected")
        .errors
        .into_iter()
        .map(|error| error.message)
        .collect()
}

#[test]
fn accepts_well_formed_routes() {
    let result = validate(
        r#"
        query item($itemId: Int! @OAParam(name: "id"), $other: Int @OAParam(in: HEADER))
          @OAOperation(path: "/items/{id}") {
          item(id: $itemId, other: $other)
        }
        mutation mutate($id: ID!, $data: String @OABody) @OAOperation(path: "/items/{id}") {
          mutate(id: $id, data: $data)
        }
        "#,
    );
    assert!(result.is_ok(), "{result:?}");
}

#[test]
fn routes_differing_only_in_variable_names_collide() {
    let errors = validate(
        r#"
        mutation first($id: ID!) @OAOperation(path: "/mutate/{id}") { mutate(id: $id) }
        mutation second($firstId: ID!) @OAOperation(path: "/mutate/{firstId}") { mutate(id: $firstId) }
        "#,
    )
    .unwrap_err();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors.errors[0].message,
        r#"Route "POST /mutate/{firstId}" of operation "second" has already been defined by operation "first"."#
    );
    let location = errors.errors[0].location.as_deref().unwrap();
    assert!(location.starts_with("doc.graphql:3:"), "{location}");
}

#[test]
fn reports_unmapped_path_variables() {
    assert_eq!(
        messages(r#"query q($x: Int!) @OAOperation(path: "/items/{x}/{y}/{z}") { item(id: $x) }"#),
        vec![
            r#"Not all path variables in "/items/{x}/{y}/{z}" are mapped to variables - Missing mappings are: "y", "z"."#
        ]
    );
}

#[test]
fn reports_path_variables_mapped_twice() {
    assert_eq!(
        messages(
            r#"query q($id: Int!, $other: Int! @OAParam(name: "id")) @OAOperation(path: "/items/{id}") { item(id: $id, other: $other) }"#
        ),
        vec![r#"Path variables in "/items/{id}" are mapped to more than one variable: "id"."#]
    );
}

#[test]
fn path_variables_must_be_non_null() {
    assert_eq!(
        messages(r#"query q($id: Int) @OAOperation(path: "/items/{id}") { item(id: 1, other: $id) }"#),
        vec![r#"Variable "$id" of type "Int" must be defined as "Int!", as it is used within "/items/{id}"."#]
    );
}

#[test]
fn path_variables_cannot_be_bodies() {
    assert_eq!(
        messages(r#"mutation m($id: ID! @OABody) @OAOperation(path: "/mutate/{id}") { mutate(id: $id) }"#),
        vec![r#"Variable "$id" of type "ID!" cannot be used with "@OABody", as it is used within "/mutate/{id}"."#]
    );
}

#[test]
fn parameter_locations_must_match_the_path() {
    assert_eq!(
        messages(
            r#"query q($id: Int! @OAParam(in: QUERY)) @OAOperation(path: "/items/{id}") { item(id: $id) }"#
        ),
        vec![r#"Location "query" is invalid for "$id" of type "Int!", because "id" is part of the path "/items/{id}"."#]
    );
    assert_eq!(
        messages(r#"query q($id: Int! @OAParam(in: PATH)) @OAOperation(path: "/items") { item(id: $id) }"#),
        vec![r#"Location "path" is invalid for "$id" of type "Int!", because "id" was expected in "/items"."#]
    );
}

#[test]
fn operations_need_the_routing_directive() {
    assert_eq!(
        messages("query plain { item(id: 1) }"),
        vec![r#"Missing required directive "@OAOperation" on operation "plain"."#]
    );
    assert_eq!(
        messages("subscription ticks { ticks }"),
        vec![r#"Subscription operation "ticks" cannot be published as a route."#]
    );
}

#[test]
fn body_paths_must_be_unique() {
    assert_eq!(
        messages(
            r#"mutation m($note: String @OABody(path: "x"), $tag: String @OABody(path: "x")) @OAOperation(path: "/m") { annotate(note: $note, tag: $tag) }"#
        ),
        vec![r#"Only unique "@OABody" definitions allowed."#]
    );
}

#[test]
fn multipart_only_mixes_with_nullable_bodies() {
    assert_eq!(
        messages(
            r#"mutation m($id: ID! @OABody, $data: String @OABody(contentType: MULTIPART_FORM_DATA)) @OAOperation(path: "/m") { mutate(id: $id, data: $data) }"#
        ),
        vec![
            r#"Operation "m" mixes "@OABody" content types "JSON", "MULTIPART_FORM_DATA"; only nullable variables may be combined with "MULTIPART_FORM_DATA"."#
        ]
    );
    let mixed = validate(
        r#"mutation m($note: String @OABody, $tag: String @OABody(contentType: MULTIPART_FORM_DATA)) @OAOperation(path: "/m") { annotate(note: $note, tag: $tag) }"#,
    );
    assert!(mixed.is_ok(), "{mixed:?}");
}

#[test]
fn errors_accumulate_in_document_order() {
    let errors = validate(
        r#"
        query plain { item(id: 1) }
        query q($x: Int!) @OAOperation(path: "/items/{y}") { item(id: $x) }
        query broken @OAOperation(path: "/broken") { nope }
        "#,
    )
    .unwrap_err();
    assert!(errors.len() >= 3, "{errors}");
    let rendered = errors.to_string();
    assert!(rendered.starts_with("Schema validation error(s): "), "{rendered}");
    assert!(rendered.contains(r#"Missing required directive "@OAOperation" on operation "plain". Source: doc.graphql:"#));
    assert!(rendered.contains(r#"Missing mappings are: "y"."#));
}

#[test]
fn compile_refuses_invalid_documents() {
    let compiler = Compiler::from_sdl(SCHEMA, "schema.graphql").unwrap();
    let err = compiler
        .compile_str("query plain { item(id: 1) }", "doc.graphql")
        .unwrap_err();
    match err {
        CompileError::Validation(errors) => assert_eq!(errors.len(), 1),
        other => panic!("expected validation errors, got {other:?}"),
    }
}

#[test]
fn unknown_custom_scalars_abort_the_compile() {
    let compiler = Compiler::from_sdl(
        "scalar DateTime type Query { now: DateTime! }",
        "schema.graphql",
    )
    .unwrap();
    let err = compiler
        .compile_str(r#"query now @OAOperation(path: "/now") { now }"#, "doc.graphql")
        .unwrap_err();
    assert_eq!(err.to_string(), "Unknown custom scalar: DateTime");
}
