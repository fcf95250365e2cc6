use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, Response, StatusCode},
    routing::any,
};
use claude_tap::capture::CaptureStore;
use claude_tap::config::{ProxyConfig, ServerConfig, UpstreamConfig};
use claude_tap::proxy::{self, AppState};

async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn spawn_proxy(upstream_origin: String) -> (SocketAddr, Arc<CaptureStore>) {
    let store = Arc::new(CaptureStore::new());
    let config = ProxyConfig {
        server: ServerConfig {
            listen_addr: "127.0.0.1:0".to_string(),
        },
        upstream: UpstreamConfig {
            origin: upstream_origin,
        },
    };
    let state = Arc::new(AppState {
        client: reqwest::Client::new(),
        config,
        store: store.clone(),
    });
    let addr = spawn(proxy::router(state)).await;
    (addr, store)
}

#[tokio::test]
async fn test_passthrough_fidelity_and_get_not_captured() {
    let upstream_body = r#"{"object":"list","data":[{"id":"claude-3-5-haiku"}]}"#;
    let upstream = Router::new().route(
        "/{*path}",
        any(move || async move {
            let mut resp = Response::new(Body::from(upstream_body));
            *resp.status_mut() = StatusCode::IM_A_TEAPOT;
            resp.headers_mut()
                .insert("content-type", "application/json".parse().unwrap());
            resp
        }),
    );
    let upstream_addr = spawn(upstream).await;
    let (proxy_addr, store) = spawn_proxy(format!("http://{}", upstream_addr)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/proxy/v1/models", proxy_addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 418);
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(bytes.as_ref(), upstream_body.as_bytes());

    // GET requests never create an exchange.
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_messages_post_captured_with_telemetry() {
    let upstream_body =
        r#"{"id":"msg_01","model":"claude-3-5-haiku","content":[{"type":"text","text":"Hi"}],"usage":{"input_tokens":10,"output_tokens":20}}"#;
    let upstream = Router::new().route(
        "/v1/messages",
        any(move || async move {
            let mut resp = Response::new(Body::from(upstream_body));
            resp.headers_mut()
                .insert("content-type", "application/json".parse().unwrap());
            resp
        }),
    );
    let upstream_addr = spawn(upstream).await;
    let (proxy_addr, store) = spawn_proxy(format!("http://{}", upstream_addr)).await;

    let request_body =
        r#"{"model":"claude-3-5-haiku","messages":[],"metadata":{"user_id":"sess-1"}}"#;
    let resp = reqwest::Client::new()
        .post(format!("http://{}/proxy/v1/messages", proxy_addr))
        .body(request_body)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 200);
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(bytes.as_ref(), upstream_body.as_bytes());

    let entries = store.snapshot(None, None);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.method, "POST");
    assert_eq!(entry.path, "/v1/messages");
    assert_eq!(entry.model.as_deref(), Some("claude-3-5-haiku"));
    assert_eq!(entry.session_id.as_deref(), Some("sess-1"));
    assert_eq!(entry.raw_request_body.as_deref(), Some(request_body));
    assert_eq!(entry.response_status, Some(200));
    assert_eq!(entry.input_tokens, Some(10));
    assert_eq!(entry.output_tokens, Some(20));
    assert!(entry.elapsed_ms.is_some());
    assert!(!entry.streaming);

    // The stored text is the canonical re-serialization of the same JSON.
    let stored: serde_json::Value =
        serde_json::from_str(entry.response_text.as_deref().unwrap()).unwrap();
    let original: serde_json::Value = serde_json::from_str(upstream_body).unwrap();
    assert_eq!(stored, original);
}

#[tokio::test]
async fn test_capture_even_with_malformed_request_body() {
    let upstream = Router::new().route(
        "/v1/messages",
        any(|| async { Response::new(Body::from("{}")) }),
    );
    let upstream_addr = spawn(upstream).await;
    let (proxy_addr, store) = spawn_proxy(format!("http://{}", upstream_addr)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/proxy/v1/messages", proxy_addr))
        .body("this is not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let entries = store.snapshot(None, None);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].model.is_none());
    assert!(entries[0].session_id.is_none());
    assert_eq!(
        entries[0].raw_request_body.as_deref(),
        Some("this is not json")
    );
}

#[tokio::test]
async fn test_non_json_response_stored_verbatim() {
    let upstream = Router::new().route(
        "/v1/messages",
        any(|| async { Response::new(Body::from("overloaded, try later")) }),
    );
    let upstream_addr = spawn(upstream).await;
    let (proxy_addr, store) = spawn_proxy(format!("http://{}", upstream_addr)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/proxy/v1/messages", proxy_addr))
        .body("{}")
        .send()
        .await
        .unwrap();
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(bytes.as_ref(), b"overloaded, try later");

    let entry = &store.snapshot(None, None)[0];
    assert_eq!(entry.response_text.as_deref(), Some("overloaded, try later"));
    assert_eq!(entry.input_tokens, None);
    assert_eq!(entry.output_tokens, None);
}

#[tokio::test]
async fn test_header_hygiene() {
    let seen: Arc<Mutex<Option<HeaderMap>>> = Arc::new(Mutex::new(None));
    let seen_in_handler = seen.clone();
    let upstream = Router::new().route(
        "/{*path}",
        any(move |req: Request<Body>| {
            let seen = seen_in_handler.clone();
            async move {
                *seen.lock().unwrap() = Some(req.headers().clone());
                let mut resp = Response::new(Body::from("{}"));
                // Bogus encoding header the proxy must not relay.
                resp.headers_mut()
                    .insert("content-encoding", "gzip".parse().unwrap());
                resp
            }
        }),
    );
    let upstream_addr = spawn(upstream).await;
    let (proxy_addr, _store) = spawn_proxy(format!("http://{}", upstream_addr)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/proxy/v1/messages", proxy_addr))
        .header("x-api-key", "sk-ant-test")
        .header("accept-encoding", "gzip, br")
        .header("proxy-authorization", "Basic xyz")
        .header("te", "trailers")
        .body("{}")
        .send()
        .await
        .unwrap();

    assert!(resp.headers().get("content-encoding").is_none());

    let outbound = seen.lock().unwrap().clone().unwrap();
    assert_eq!(outbound.get("x-api-key").unwrap(), "sk-ant-test");
    assert!(outbound.get("accept-encoding").is_none());
    assert!(outbound.get("proxy-authorization").is_none());
    assert!(outbound.get("te").is_none());
    assert_eq!(
        outbound.get("host").unwrap(),
        format!("{}", upstream_addr).as_str()
    );
}

#[tokio::test]
async fn test_upstream_unreachable_returns_502() {
    // Bind then drop to get a port with nothing listening on it.
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    let (proxy_addr, store) = spawn_proxy(format!("http://{}", dead_addr)).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{}/proxy/v1/messages", proxy_addr))
        .body(r#"{"model":"m1","messages":[]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 502);
    let text = resp.text().await.unwrap();
    assert!(text.contains("Proxy error"));

    let entries = store.snapshot(None, None);
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.response_status, Some(502));
    assert!(entry.response_text.as_deref().unwrap().contains("Proxy error"));
    assert!(entry.elapsed_ms.is_some());
}

#[tokio::test]
async fn test_request_outside_prefix_is_not_forwarded() {
    let upstream = Router::new().route(
        "/{*path}",
        any(|| async { Response::new(Body::from("should never be reached")) }),
    );
    let upstream_addr = spawn(upstream).await;
    let (proxy_addr, store) = spawn_proxy(format!("http://{}", upstream_addr)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{}/api/logs", proxy_addr))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 404);
    assert!(store.is_empty());
}
