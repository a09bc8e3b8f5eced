//! End-to-end tests for the HTTP gateway against a mock relay.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;
use sharecast_api::{create_router, AppState};
use sharecast_core::config::RelayConfig;
use sharecast_core::RelayClient;
use sharecast_hub::{
    InMemoryPresenceStore, InMemorySnapshotStore, LocalChannelRegistry, SnapshotStore,
    StreamBroadcaster, StreamPoller,
};
use sharecast_proxy::SignalingProxy;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, header as header_eq, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OFFER: &str = "v=0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=setup:actpass\r\na=rtpmap:96 H264/90000\r\n";
const ANSWER: &str = "v=0\r\ns=-\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=setup:passive\r\na=rtpmap:96 H264/90000\r\n";

struct TestApp {
    router: Router,
    poller: Arc<StreamPoller>,
}

fn build_app(relay_url: &str) -> TestApp {
    let relay = Arc::new(
        RelayClient::new(&RelayConfig {
            api_url: relay_url.to_string(),
            request_timeout_seconds: 5,
        })
        .expect("relay client"),
    );
    let snapshots: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
    let broadcaster = Arc::new(StreamBroadcaster::new(
        Arc::new(LocalChannelRegistry::new()),
        snapshots.clone(),
    ));
    let poller = Arc::new(StreamPoller::new(
        relay.clone(),
        snapshots,
        broadcaster.clone(),
    ));

    let state = AppState {
        presence: Arc::new(InMemoryPresenceStore::new(Duration::from_secs(30))),
        broadcaster,
        proxy: SignalingProxy::new(relay),
    };

    TestApp {
        router: create_router(state),
        poller,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    (status, headers, String::from_utf8(bytes.to_vec()).expect("utf8 body"))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

fn post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/sdp")
        .body(Body::from(body.to_string()))
        .expect("request")
}

#[tokio::test]
async fn test_health() {
    let app = build_app("http://127.0.0.1:9");
    let (status, _, body) = send(&app.router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");
}

#[tokio::test(start_paused = true)]
async fn test_presence_join_list_and_expire() {
    let app = build_app("http://127.0.0.1:9");

    let (status, _, body) = send(&app.router, post("/presence?room=demo&identity=A&action=join", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).expect("json"), serde_json::json!({"success": true}));

    let (_, _, body) = send(&app.router, get("/presence?room=demo")).await;
    assert_eq!(
        serde_json::from_str::<Value>(&body).expect("json"),
        serde_json::json!({"room": "demo", "participants": ["A"], "count": 1})
    );

    tokio::time::advance(Duration::from_secs(31)).await;

    let (_, _, body) = send(&app.router, get("/presence?room=demo")).await;
    assert_eq!(
        serde_json::from_str::<Value>(&body).expect("json"),
        serde_json::json!({"room": "demo", "participants": [], "count": 0})
    );
}

#[tokio::test]
async fn test_presence_leave() {
    let app = build_app("http://127.0.0.1:9");
    send(&app.router, post("/presence?room=demo&identity=A", "")).await;
    send(&app.router, post("/presence?room=demo&identity=A&action=leave", "")).await;

    let (_, _, body) = send(&app.router, get("/presence?room=demo")).await;
    let json: Value = serde_json::from_str(&body).expect("json");
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn test_presence_missing_params() {
    let app = build_app("http://127.0.0.1:9");

    let (status, _, body) = send(&app.router, post("/presence?room=demo", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json: Value = serde_json::from_str(&body).expect("json");
    assert_eq!(json["status"], 400);

    let (status, _, _) = send(&app.router, get("/presence")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sse_replays_current_streams_on_connect() {
    let relay = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/streams/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"code":0,"streams":[{"id":"x1","app":"demo","name":"s1","publish":{"active":true}}]}"#,
        ))
        .mount(&relay)
        .await;

    let app = build_app(&relay.uri());
    app.poller.poll_once().await.expect("poll");

    let response = app
        .router
        .clone()
        .oneshot(get("/streams/sse?room=demo"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).expect("content type"),
        "text/event-stream"
    );

    let mut body = response.into_body().into_data_stream();
    let mut text = String::new();
    while text.matches("\n\n").count() < 2 {
        let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("chunk");
        text.push_str(std::str::from_utf8(&chunk).expect("utf8"));
    }

    let frames: Vec<Value> = text
        .split("\n\n")
        .filter(|f| !f.is_empty())
        .map(|f| serde_json::from_str(f.strip_prefix("data: ").expect("data frame")).expect("json"))
        .collect();

    assert_eq!(frames[0]["type"], "connected");
    assert_eq!(frames[0]["roomName"], "demo");
    assert!(frames[0]["clientId"].as_str().expect("client id").starts_with("demo-"));

    assert_eq!(frames[1]["type"], "streams_update");
    assert_eq!(frames[1]["roomName"], "demo");
    assert_eq!(
        frames[1]["streams"],
        serde_json::json!([{"id":"x1","app":"demo","name":"s1","publish":{"active":true}}])
    );
}

#[tokio::test]
async fn test_sse_requires_room() {
    let app = build_app("http://127.0.0.1:9");
    let (status, _, _) = send(&app.router, get("/streams/sse")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_streams_passthrough() {
    let relay = MockServer::start().await;
    let raw = r#"{"code":0,"server":"vid-1","streams":[]}"#;
    Mock::given(method("GET"))
        .and(path("/api/v1/streams/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(raw),
        )
        .mount(&relay)
        .await;

    let app = build_app(&relay.uri());
    let (status, headers, body) = send(&app.router, get("/streams")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, raw);
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).expect("cors"), "*");
}

#[tokio::test]
async fn test_whip_forwards_and_optimizes() {
    let relay = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rtc/v1/whip/"))
        .and(query_param("app", "demo"))
        .and(query_param("stream", "alice"))
        .and(header_eq("X-Low-Latency", "true"))
        .and(body_string_contains("a=x-google-flag:low-latency"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("content-type", "application/sdp")
                .set_body_string(ANSWER),
        )
        .expect(1)
        .mount(&relay)
        .await;

    let app = build_app(&relay.uri());
    let mut request = post("/whip?app=demo&stream=alice", OFFER);
    request
        .headers_mut()
        .insert("X-Prefer-Low-Latency", "true".parse().expect("header"));

    let (status, headers, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers.get(header::CONTENT_TYPE).expect("content type"), "application/sdp");
    assert!(body.contains("a=rtcp-fb:96 nack pli\r\n"));
}

#[tokio::test]
async fn test_whep_relay_error_is_verbatim() {
    let relay = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rtc/v1/whep/"))
        .respond_with(ResponseTemplate::new(404).set_body_string("stream not found: demo/ghost"))
        .mount(&relay)
        .await;

    let app = build_app(&relay.uri());
    let (status, _, body) = send(&app.router, post("/whep?app=demo&stream=ghost", OFFER)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "stream not found: demo/ghost");
}

#[tokio::test]
async fn test_whip_input_errors() {
    let app = build_app("http://127.0.0.1:9");

    let (status, _, _) = send(&app.router, post("/whip?app=demo", OFFER)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(&app.router, post("/whip?app=demo&stream=alice", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("SDP"));
}

#[tokio::test]
async fn test_whip_unreachable_relay_is_bad_gateway() {
    let app = build_app("http://127.0.0.1:9");
    let (status, _, _) = send(&app.router, post("/whip?app=demo&stream=alice", OFFER)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_preflight_is_answered_locally() {
    let app = build_app("http://127.0.0.1:9");
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/whip?app=demo&stream=alice")
        .header(header::ORIGIN, "https://viewer.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .expect("request");

    let (status, headers, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).expect("origin"), "*");

    let methods = headers
        .get(header::ACCESS_CONTROL_ALLOW_METHODS)
        .expect("methods")
        .to_str()
        .expect("ascii");
    assert!(methods.contains("POST"));
    assert!(!methods.contains("GET"));

    let allowed = headers
        .get(header::ACCESS_CONTROL_ALLOW_HEADERS)
        .expect("headers")
        .to_str()
        .expect("ascii");
    assert!(allowed.contains("x-prefer-low-latency"));
}

#[tokio::test]
async fn test_streams_preflight_allows_get() {
    let app = build_app("http://127.0.0.1:9");
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/streams")
        .header(header::ORIGIN, "https://viewer.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .body(Body::empty())
        .expect("request");

    let (status, headers, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK);
    let methods = headers
        .get(header::ACCESS_CONTROL_ALLOW_METHODS)
        .expect("methods")
        .to_str()
        .expect("ascii");
    assert!(methods.contains("GET"));
    assert!(!methods.contains("POST"));
}

#[tokio::test]
async fn test_stop_always_succeeds() {
    let relay = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&relay)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&relay)
        .await;

    let app = build_app(&relay.uri());
    let (status, _, body) = send(&app.router, post("/stop?stream=alice", "")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        serde_json::from_str::<Value>(&body).expect("json"),
        serde_json::json!({"success": true, "message": "Stream alice stop requested"})
    );

    let (status, _, _) = send(&app.router, post("/stop", "")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
