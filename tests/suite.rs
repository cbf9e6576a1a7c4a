// Integration suite for the dispatcher; drives full requests through routing,
// schema acquisition, execution, and error translation.
mod support;

use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use gqlmux::{
    DebugFlag, Dispatcher, EndpointDescriptor, EndpointRegistry, Principal, ResolverError,
    SecurityContext, Settings,
};
use http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use std::fs;
use std::sync::Arc;
use support::{FALLTHROUGH_BODY, Harness, MemorySources, body_json, post, request};
use tempfile::TempDir;

const HELLO_SDL: &str = "type Query { hello: String }";

fn hello_endpoint(path: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(path, "hello.graphql").with_root_value(|_| json!({"hello": "world"}))
}

fn hello_harness() -> Harness {
    Harness::new(
        vec![hello_endpoint("/graphql")],
        MemorySources::default().with("hello.graphql", HELLO_SDL),
    )
}

const ORDERS_SDL: &str = r#"
    type Order { id: ID! total: Int }
    type Query {
        orders: [Order!]!
        failing: String
        refused: String
        greet(name: String!): String
    }
    type Mutation { bump(by: Int!): Int }
"#;

fn orders_endpoint() -> EndpointDescriptor {
    EndpointDescriptor::new("/orders", "orders.graphql")
        .with_root_value(|_| json!({"orders": [{"id": "o1", "total": 3}, {"id": "o2"}]}))
        .with_resolver("Query", "failing", |_| {
            Err(anyhow!("connection refused").context("loading orders").into())
        })
        .with_resolver("Query", "refused", |_| Err(ResolverError::user("not allowed")))
        .with_resolver("Query", "greet", |call| {
            let name = call.arguments.get("name").and_then(Value::as_str).unwrap_or_default();
            Ok(json!(format!("hi {name}")))
        })
        .with_resolver("Mutation", "bump", |call| {
            let by = call.arguments.get("by").and_then(Value::as_i64).unwrap_or_default();
            Ok(json!(by + 1))
        })
}

fn orders_harness() -> Harness {
    Harness::new(
        vec![orders_endpoint()],
        MemorySources::default().with("orders.graphql", ORDERS_SDL),
    )
}

// The canonical request: a hello query against a one-field schema.
#[tokio::test]
async fn answers_hello_world() -> Result<()> {
    let harness = hello_harness();
    let response = harness
        .send(post("/graphql", r#"{"query":"{ hello }"}"#))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[http::header::CONTENT_TYPE], "application/json");
    assert_eq!(body_json(&response), json!({"data": {"hello": "world"}}));
    assert_eq!(harness.next.calls(), 0);
    assert!(harness.reporter.notices().is_empty());
    Ok(())
}

// Requests for unknown paths or with other methods reach the next handler untouched.
#[tokio::test]
async fn passes_through_foreign_requests() -> Result<()> {
    let harness = hello_harness();

    let unknown = harness
        .send(post("/elsewhere", r#"{"query":"{ hello }"}"#))
        .await;
    assert_eq!(unknown.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(unknown.body().as_ref(), FALLTHROUGH_BODY);

    let get = harness.send(request(Method::GET, "/graphql", "")).await;
    assert_eq!(get.status(), StatusCode::IM_A_TEAPOT);

    let nested = harness
        .send(post("/graphql/extra", r#"{"query":"{ hello }"}"#))
        .await;
    assert_eq!(nested.status(), StatusCode::IM_A_TEAPOT);

    assert_eq!(harness.next.calls(), 3);
    assert_eq!(harness.sources.reads(), 0);
    Ok(())
}

#[tokio::test]
async fn answers_preflight_without_touching_the_schema() -> Result<()> {
    let harness = hello_harness();
    let response = harness
        .send(request(Method::OPTIONS, "/graphql", ""))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[http::header::ALLOW], "GET, POST, OPTIONS");
    assert!(response.body().is_empty());
    assert_eq!(harness.sources.reads(), 0);
    assert_eq!(harness.next.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn rejects_malformed_bodies() -> Result<()> {
    let harness = hello_harness();
    let response = harness.send(post("/graphql", "{not json")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(&response),
        json!({"error": "Failed decoding request body"})
    );
    Ok(())
}

// Query syntax errors are execution outcomes: 200, errors, no data.
#[tokio::test]
async fn reports_query_syntax_errors_in_the_envelope() -> Result<()> {
    let harness = hello_harness();
    let (status, body) = harness.post_query("/graphql", json!({"query": "{ hello"})).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("data").is_none(), "{body}");
    let errors = body["errors"].as_array().context("errors array")?;
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["locations"].is_array());
    assert_eq!(harness.reporter.notices().len(), 1);
    assert!(harness.reporter.causes().is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_fields_fail_validation() -> Result<()> {
    let harness = hello_harness();
    let (status, body) = harness
        .post_query("/graphql", json!({"query": "{ goodbye }"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("data").is_none());
    assert_eq!(body["errors"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn schema_syntax_errors_name_the_source() -> Result<()> {
    let harness = Harness::new(
        vec![EndpointDescriptor::new("/broken", "broken.graphql")],
        MemorySources::default().with("broken.graphql", "type Query {"),
    );
    let (status, body) = harness
        .post_query("/broken", json!({"query": "{ hello }"}))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().context("error message")?;
    assert!(
        message.starts_with("Failed processing schema from broken.graphql"),
        "{message}"
    );
    Ok(())
}

#[tokio::test]
async fn missing_schema_sources_are_server_errors() -> Result<()> {
    let harness = Harness::new(
        vec![EndpointDescriptor::new("/missing", "missing.graphql")],
        MemorySources::default(),
    );
    let response = harness
        .send(post("/missing", r#"{"query":"{ hello }"}"#))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}

// Internal resolver failures reach clients as a generic message and the
// operator sink in full, exactly once.
#[tokio::test]
async fn hides_internal_failures_from_clients() -> Result<()> {
    let harness = orders_harness();
    let (status, body) = harness
        .post_query("/orders", json!({"query": "{ failing orders { id } }"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["failing"], Value::Null);
    assert_eq!(body["data"]["orders"], json!([{"id": "o1"}, {"id": "o2"}]));

    let errors = body["errors"].as_array().context("errors array")?;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["message"], "Internal server error");
    assert_eq!(errors[0]["path"], json!(["failing"]));
    assert!(errors[0].get("debugMessage").is_none());
    assert!(errors[0].get("trace").is_none());

    let causes = harness.reporter.causes();
    assert_eq!(causes.len(), 1);
    assert_eq!(causes[0].message, "loading orders");
    assert_eq!(causes[0].chain, vec!["connection refused".to_string()]);

    let notices = harness.reporter.notices();
    assert_eq!(notices.len(), 1);
    assert!(
        notices[0].starts_with("GraphQL response contained errors: Internal server error (line 1"),
        "{}",
        notices[0]
    );
    Ok(())
}

#[tokio::test]
async fn user_errors_are_returned_verbatim() -> Result<()> {
    let harness = orders_harness();
    let (status, body) = harness
        .post_query("/orders", json!({"query": "{ refused }"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"][0]["message"], "not allowed");
    assert!(harness.reporter.causes().is_empty());
    Ok(())
}

#[tokio::test]
async fn debug_flags_control_extended_fields() -> Result<()> {
    let cases = [
        (DebugFlag::NONE, false, false),
        (DebugFlag::INCLUDE_DEBUG_MESSAGE, true, false),
        (DebugFlag::INCLUDE_TRACE, false, true),
        (DebugFlag::INCLUDE_DEBUG_MESSAGE | DebugFlag::INCLUDE_TRACE, true, true),
    ];
    for (flag, debug_message, trace) in cases {
        let mut harness = orders_harness();
        harness.dispatcher = harness.dispatcher.with_debug_flag(flag);
        let (_, body) = harness
            .post_query("/orders", json!({"query": "{ failing }"}))
            .await;
        let error = &body["errors"][0];
        assert_eq!(error["message"], "Internal server error");
        assert_eq!(error.get("debugMessage").is_some(), debug_message, "{flag:?}");
        assert_eq!(error.get("trace").is_some(), trace, "{flag:?}");
        if debug_message {
            assert_eq!(error["debugMessage"], "loading orders");
            let notices = harness.reporter.notices();
            assert!(notices[0].ends_with(" loading orders"), "{}", notices[0]);
        }
        if trace {
            assert_eq!(error["trace"], json!(["loading orders", "connection refused"]));
        }
        assert_eq!(harness.reporter.causes().len(), 1);
    }
    Ok(())
}

#[tokio::test]
async fn honours_variables_and_operation_names() -> Result<()> {
    let harness = orders_harness();
    let (status, body) = harness
        .post_query(
            "/orders",
            json!({
                "query": "query A { greet(name: \"a\") } query B($n: String!) { greet(name: $n) }",
                "variables": {"n": "Zed"},
                "operationName": "B"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"data": {"greet": "hi Zed"}}));
    Ok(())
}

#[tokio::test]
async fn executes_mutations() -> Result<()> {
    let harness = orders_harness();
    let (_, body) = harness
        .post_query("/orders", json!({"query": "mutation { bump(by: 41) }"}))
        .await;
    assert_eq!(body, json!({"data": {"bump": 42}}));
    Ok(())
}

#[tokio::test]
async fn accepts_document_bodies() -> Result<()> {
    let harness = hello_harness();
    let (_, body) = harness
        .post_query("/graphql", json!({"document": "{ hello }"}))
        .await;
    assert_eq!(body, json!({"data": {"hello": "world"}}));

    let (status, body) = harness
        .post_query(
            "/graphql",
            json!({"query": "{ hello }", "document": "{ missing }"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"data": {"hello": "world"}}));
    Ok(())
}

#[tokio::test]
async fn first_registration_wins() -> Result<()> {
    let shadowed = EndpointDescriptor::new("/graphql", "hello.graphql")
        .with_root_value(|_| json!({"hello": "shadowed"}));
    let harness = Harness::new(
        vec![hello_endpoint("/graphql"), shadowed],
        MemorySources::default().with("hello.graphql", HELLO_SDL),
    );
    assert_eq!(harness.dispatcher.registry().duplicate_paths(), vec!["/graphql"]);
    let (_, body) = harness
        .post_query("/graphql", json!({"query": "{ hello }"}))
        .await;
    assert_eq!(body, json!({"data": {"hello": "world"}}));
    Ok(())
}

#[tokio::test]
async fn caches_documents_until_invalidated() -> Result<()> {
    let harness = hello_harness();
    let store = Arc::clone(harness.dispatcher.store());
    assert!(store.invalidate("first")?);

    for _ in 0..3 {
        let (_, body) = harness
            .post_query("/graphql", json!({"query": "{ hello }"}))
            .await;
        assert_eq!(body, json!({"data": {"hello": "world"}}));
    }
    assert_eq!(harness.sources.reads(), 1);

    harness
        .sources
        .put("hello.graphql", "type Query { hello: String goodbye: String }");
    assert!(!store.invalidate("first")?);
    let (_, body) = harness
        .post_query("/graphql", json!({"query": "{ goodbye }"}))
        .await;
    assert!(body.get("errors").is_some(), "cached document should not know the new field");

    assert!(store.invalidate("second")?);
    let (_, body) = harness
        .post_query("/graphql", json!({"query": "{ hello goodbye }"}))
        .await;
    assert_eq!(body, json!({"data": {"hello": "world", "goodbye": null}}));
    assert_eq!(harness.sources.reads(), 2);
    Ok(())
}

#[tokio::test]
async fn invalidation_drops_every_endpoint_document() -> Result<()> {
    let harness = Harness::new(
        vec![
            hello_endpoint("/a"),
            EndpointDescriptor::new("/b", "other.graphql")
                .with_root_value(|_| json!({"other": "b", "added": "fresh"})),
        ],
        MemorySources::default()
            .with("hello.graphql", HELLO_SDL)
            .with("other.graphql", "type Query { other: String }"),
    );
    let store = Arc::clone(harness.dispatcher.store());
    assert!(store.invalidate("first")?);

    for _ in 0..2 {
        let (_, body) = harness.post_query("/a", json!({"query": "{ hello }"})).await;
        assert_eq!(body, json!({"data": {"hello": "world"}}));
        let (_, body) = harness.post_query("/b", json!({"query": "{ other }"})).await;
        assert_eq!(body, json!({"data": {"other": "b"}}));
    }
    assert_eq!(harness.sources.reads(), 2);

    harness
        .sources
        .put("other.graphql", "type Query { other: String added: String }");
    assert!(store.invalidate("second")?);

    let (_, body) = harness
        .post_query("/b", json!({"query": "{ other added }"}))
        .await;
    assert_eq!(body, json!({"data": {"other": "b", "added": "fresh"}}));
    assert_eq!(harness.sources.reads(), 3);
    Ok(())
}

#[tokio::test]
async fn disabled_cache_reads_every_request() -> Result<()> {
    let harness = Harness::with_cache(
        vec![hello_endpoint("/graphql")],
        MemorySources::default().with("hello.graphql", HELLO_SDL),
        false,
    );
    for _ in 0..3 {
        harness
            .post_query("/graphql", json!({"query": "{ hello }"}))
            .await;
    }
    assert_eq!(harness.sources.reads(), 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_parse() -> Result<()> {
    let harness = Arc::new(hello_harness());
    let mut tasks = Vec::new();
    for _ in 0..16 {
        let harness = Arc::clone(&harness);
        tasks.push(tokio::spawn(async move {
            harness
                .post_query("/graphql", json!({"query": "{ hello }"}))
                .await
        }));
    }
    for task in tasks {
        let (status, body) = task.await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"data": {"hello": "world"}}));
    }
    assert_eq!(harness.sources.reads(), 1);
    Ok(())
}

struct HeaderSecurity;

impl SecurityContext for HeaderSecurity {
    fn prime(&self, request: &Request<Bytes>) -> Option<Principal> {
        let user = request.headers().get("x-user")?.to_str().ok()?;
        Some(Principal::new(user).with_role("reader"))
    }
}

// The primed principal is visible to resolvers of that request only.
#[tokio::test]
async fn principals_are_request_scoped() -> Result<()> {
    let endpoint = EndpointDescriptor::new("/me", "me.graphql")
        .with_resolver("Query", "me", |call| {
            Ok(match &call.context.principal {
                Some(principal) if principal.has_role("reader") => json!(principal.identifier),
                _ => Value::Null,
            })
        });
    let mut harness = Harness::new(
        vec![endpoint],
        MemorySources::default().with("me.graphql", "type Query { me: String }"),
    );
    harness.dispatcher = harness.dispatcher.with_security(Arc::new(HeaderSecurity));

    let mut authenticated = post("/me", r#"{"query":"{ me }"}"#);
    authenticated
        .headers_mut()
        .insert("x-user", http::HeaderValue::from_static("ada"));
    let response = harness.send(authenticated).await;
    assert_eq!(body_json(&response), json!({"data": {"me": "ada"}}));

    let response = harness.send(post("/me", r#"{"query":"{ me }"}"#)).await;
    assert_eq!(body_json(&response), json!({"data": {"me": null}}));
    Ok(())
}

// Settings name resource roots; endpoints point at resource:// schema URIs.
#[tokio::test]
async fn wires_a_dispatcher_from_settings() -> Result<()> {
    let resources = TempDir::new()?;
    let cache_dir = TempDir::new()?;
    fs::create_dir_all(resources.path().join("schema"))?;
    fs::write(resources.path().join("schema/shop.graphql"), HELLO_SDL)?;

    let settings = Settings::from_value(json!({
        "enableSchemaCache": true,
        "debug": {"includeDebugMessage": true},
        "cacheDirectory": cache_dir.path(),
        "resourceRoots": {"Shop": resources.path()},
        "endpoints": [{"path": "/shop", "schema": "resource://Shop/schema/shop.graphql"}]
    }))?;
    assert_eq!(settings.debug_flag(), DebugFlag::INCLUDE_DEBUG_MESSAGE);

    let registry = EndpointRegistry::new(vec![
        EndpointDescriptor::new("/shop", "resource://Shop/schema/shop.graphql")
            .with_root_value(|_| json!({"hello": "shop"})),
    ]);
    let dispatcher = Dispatcher::from_settings(&settings, registry)?;
    let next = support::Fallthrough::default();

    let response = dispatcher
        .process(post("/shop", r#"{"query":"{ hello }"}"#), &next)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(&response), json!({"data": {"hello": "shop"}}));

    let entries = fs::read_dir(cache_dir.path())?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "entry"))
        .count();
    assert_eq!(entries, 1);
    Ok(())
}

#[test]
fn settings_reject_invalid_options() -> Result<()> {
    let err = Settings::from_value(json!({"enableSchemaCache": "yes"}))
        .expect_err("wrong type rejected");
    assert!(format!("{err:#}").contains("settings failed validation"));
    let err = Settings::from_value(json!({"endpoints": [{"path": "no-slash"}]}))
        .expect_err("relative path rejected");
    assert!(format!("{err:#}").contains("settings failed validation"));
    Ok(())
}
