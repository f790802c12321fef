use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{body_json, header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tessera::application::Services;
use tessera::application::session::HeaderSession;
use tessera::cache::{CacheConfig, ManualClock, build_read_through};
use tessera::infra::http::{HttpState, build_router};
use tessera::upstream::{RetryPolicy, UpstreamClient};

const START_MS: i64 = 1_700_000_000_000;

struct TestApp {
    router: Router,
    services: Services,
    clock: Arc<ManualClock>,
}

impl TestApp {
    async fn new(server: &MockServer) -> Self {
        let clock = Arc::new(ManualClock::new(START_MS));
        let config = CacheConfig {
            key_prefix: Some("it".to_string()),
            ..CacheConfig::default()
        };
        let cache = build_read_through(&config, clock.clone());
        let upstream = UpstreamClient::new(
            &format!("{}/api", server.uri()),
            Duration::from_secs(5),
            RetryPolicy::new(3, Duration::from_millis(5)),
        )
        .expect("upstream client");
        let services = Services::new(
            &config,
            cache,
            upstream,
            Arc::new(HeaderSession::default()),
        );
        let router = build_router(HttpState::new(services.clone()));
        Self {
            router,
            services,
            clock,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).expect("request"))
            .await
    }

    async fn get_with_token(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
    }

    async fn send_json(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).expect("request"))
            .await
    }

    async fn settle_revalidations(&self) {
        for _ in 0..200 {
            if self.services.cache.pending_revalidations() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("background revalidation did not finish");
    }
}

#[tokio::test]
async fn post_list_is_cached_until_a_create_invalidates_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .and(query_param("page", "1"))
        .and(query_param("limit", "10"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "posts": [{ "id": "1", "title": "First" }] })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "posts": [
                { "id": "2", "title": "Second" },
                { "id": "1", "title": "First" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/posts"))
        .and(header_eq("authorization", "Bearer writer"))
        .and(body_json(json!({ "title": "Second" })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({ "id": "2", "title": "Second" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (status, first) = app.get("/api/posts").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["fromCache"], json!(false));
    assert_eq!(first["data"]["posts"].as_array().map(Vec::len), Some(1));
    assert_eq!(first["cachedAt"], json!(START_MS));

    // Same canonical key: defaults applied, order and padding ignored.
    let (_, second) = app.get("/api/posts?limit=10&page=01").await;
    assert_eq!(second["fromCache"], json!(true));
    assert_eq!(second["data"], first["data"]);

    let (status, created) = app
        .send_json("POST", "/api/posts", Some("writer"), json!({ "title": "Second" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], json!("2"));

    let (_, after) = app.get("/api/posts").await;
    assert_eq!(after["fromCache"], json!(false));
    assert_eq!(after["data"]["posts"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn mutations_require_a_session_and_valid_body() {
    let server = MockServer::start().await;
    let app = TestApp::new(&server).await;

    let (status, body) = app
        .send_json("POST", "/api/posts", None, json!({ "title": "x" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("unauthorized"));

    let (status, body) = app
        .send_json("POST", "/api/jobs", Some("writer"), json!({ "company": "acme" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));

    let (status, _) = app
        .send_json("DELETE", "/api/jobs/42", None, Value::Null)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty(), "no upstream I/O before validation");
}

#[tokio::test]
async fn delete_evicts_item_and_reports_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "42", "title": "Rustacean" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/jobs/42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (_, first) = app.get("/api/jobs/42").await;
    assert_eq!(first["fromCache"], json!(false));
    let (_, cached) = app.get("/api/jobs/42").await;
    assert_eq!(cached["fromCache"], json!(true));

    let (status, body) = app
        .send_json("DELETE", "/api/jobs/42", Some("writer"), Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (_, refetched) = app.get("/api/jobs/42").await;
    assert_eq!(refetched["fromCache"], json!(false));
}

#[tokio::test]
async fn update_evicts_item_and_every_list_variant() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts/7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "7", "title": "Draft" })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/posts/7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "7", "title": "Final" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .and(query_param("tag", "rust"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "posts": [{ "id": "7", "title": "Draft" }] })),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .and(query_param("tag", "rust"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "posts": [{ "id": "7", "title": "Final" }] })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/posts/7"))
        .and(header_eq("authorization", "Bearer editor"))
        .and(body_json(json!({ "title": "Final" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "7", "title": "Final" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/posts/7"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (_, item) = app.get("/api/posts/7").await;
    assert_eq!(item["fromCache"], json!(false));
    let (_, list) = app.get("/api/posts?tag=rust").await;
    assert_eq!(list["fromCache"], json!(false));
    let (_, item) = app.get("/api/posts/7").await;
    assert_eq!(item["fromCache"], json!(true));
    let (_, list) = app.get("/api/posts?tag=rust").await;
    assert_eq!(list["fromCache"], json!(true));

    let (status, body) = app
        .send_json("PUT", "/api/posts/7", Some("editor"), json!({ "body": "no title" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("bad_request"));

    let (status, updated) = app
        .send_json("PATCH", "/api/posts/7", Some("editor"), json!({ "title": "Final" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], json!("Final"));

    let (_, item) = app.get("/api/posts/7").await;
    assert_eq!(item["fromCache"], json!(false));
    assert_eq!(item["data"]["title"], json!("Final"));
    let (_, list) = app.get("/api/posts?tag=rust").await;
    assert_eq!(list["fromCache"], json!(false));
    assert_eq!(list["data"]["posts"][0]["title"], json!("Final"));
}

#[tokio::test]
async fn stale_entries_are_served_then_revalidated_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobs": ["v1"] })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobs": ["v2"] })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (_, fresh) = app.get("/api/jobs").await;
    assert_eq!(fresh["data"]["jobs"], json!(["v1"]));

    app.clock.advance(Duration::from_secs(121));

    let (_, stale_a) = app.get("/api/jobs").await;
    let (_, stale_b) = app.get("/api/jobs").await;
    assert_eq!(stale_a["fromCache"], json!(true));
    assert_eq!(stale_a["data"]["jobs"], json!(["v1"]));
    assert_eq!(stale_b["data"]["jobs"], json!(["v1"]));

    app.settle_revalidations().await;

    let (_, refreshed) = app.get("/api/jobs").await;
    assert_eq!(refreshed["fromCache"], json!(true));
    assert_eq!(refreshed["data"]["jobs"], json!(["v2"]));
    assert!(refreshed.get("revalidatedAt").is_some());
}

#[tokio::test]
async fn profiles_are_cached_per_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .and(header_eq("authorization", "Bearer alice-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "alice" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .and(header_eq("authorization", "Bearer bob-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "bob" })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (status, alice) = app.get_with_token("/api/profile", "alice-token").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(alice, json!({ "name": "alice" }));
    let (_, alice_again) = app.get_with_token("/api/profile", "alice-token").await;
    assert_eq!(alice_again, json!({ "name": "alice" }));

    let (_, bob) = app.get_with_token("/api/profile", "bob-token").await;
    assert_eq!(bob, json!({ "name": "bob" }));

    let alice_key = app.services.profile.key_for("alice-token");
    let bob_key = app.services.profile.key_for("bob-token");
    assert_ne!(alice_key, bob_key);
    assert!(!alice_key.contains("alice-token"));

    let (status, body) = app.get("/api/profile").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("unauthorized"));
}

#[tokio::test]
async fn profile_update_evicts_only_that_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "alice" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "alicia" })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    app.get_with_token("/api/profile", "alice-token").await;
    let (status, updated) = app
        .send_json("PATCH", "/api/profile", Some("alice-token"), json!({ "name": "alicia" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], json!("alicia"));

    // Evicted, so this read goes upstream again.
    app.get_with_token("/api/profile", "alice-token").await;
}

#[tokio::test]
async fn mercure_tokens_are_cached_and_forgettable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/mercure/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "hub-jwt" })))
        .expect(2)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (status, body) = app.get_with_token("/api/mercure/token", "sess").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "token": "hub-jwt" }));
    app.get_with_token("/api/mercure/token", "sess").await;

    let (status, body) = app
        .send(
            Request::delete("/api/mercure/token")
                .header(header::AUTHORIZATION, "Bearer sess")
                .body(Body::empty())
                .expect("request"),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    app.get_with_token("/api/mercure/token", "sess").await;
}

#[tokio::test]
async fn quiz_landing_is_keyed_by_locale_and_evicted_on_create() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/quiz/landing"))
        .and(query_param("locale", "fr-fr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "title": "Bonjour" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/quiz"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "q1" })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (_, first) = app.get("/api/quiz/landing?locale=fr_FR").await;
    assert_eq!(first["fromCache"], json!(false));
    let (_, second) = app.get("/api/quiz/landing?locale=FR-fr").await;
    assert_eq!(second["fromCache"], json!(true));

    let (status, _) = app
        .send_json("POST", "/api/quiz", Some("writer"), json!({ "title": "New" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, after) = app.get("/api/quiz/landing?locale=fr-fr").await;
    assert_eq!(after["fromCache"], json!(false));
}

#[tokio::test]
async fn transient_upstream_failures_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts/7"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/posts/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "7" })))
        .expect(1)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (status, body) = app.get("/api/posts/7").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!({ "id": "7" }));
}

#[tokio::test]
async fn upstream_errors_map_to_client_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "message": "Post not found" })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/jobs/down"))
        .respond_with(ResponseTemplate::new(500).set_body_string("stack trace here"))
        .expect(3)
        .mount(&server)
        .await;

    let app = TestApp::new(&server).await;

    let (status, body) = app.get("/api/posts/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("not_found"));
    assert_eq!(body["error"]["message"], json!("Post not found"));

    let (status, body) = app.get("/api/jobs/down").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], json!("upstream_unavailable"));
    assert!(!body.to_string().contains("stack trace"));
}

#[tokio::test]
async fn health_reports_disabled_distributed_cache() {
    let server = MockServer::start().await;
    let app = TestApp::new(&server).await;

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "distributedCache": "disabled" }));

    let (status, body) = app.get("/api/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("not_found"));
}
