use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, Response, StatusCode, Uri, header},
    routing::any,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::capture::{CaptureStore, ExchangeHandle};
use crate::config::ProxyConfig;
use crate::headers::{sanitize_request_headers, sanitize_response_headers};
use crate::tee::TeeStream;
use crate::telemetry;

/// Local prefix the proxy is mounted under; stripped before forwarding.
pub const PROXY_PREFIX: &str = "/proxy";

/// The single capturable endpoint (query string ignored).
pub const MESSAGES_PATH: &str = "/v1/messages";

pub struct AppState {
    pub client: reqwest::Client,
    pub config: ProxyConfig,
    pub store: Arc<CaptureStore>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{*path}", any(forward))
        .with_state(state)
}

/// Upstream path (with query string) for a local URI, or `None` when the
/// request is outside the proxy prefix.
fn upstream_path(uri: &Uri) -> Option<String> {
    let rest = uri.path().strip_prefix(PROXY_PREFIX)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    let path = if rest.is_empty() { "/" } else { rest };
    Some(match uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path.to_string(),
    })
}

/// Capture is enabled only for POSTs to the messages-creation endpoint.
fn is_capturable(method: &Method, api_path: &str) -> bool {
    let path = api_path.split('?').next().unwrap_or(api_path);
    method == Method::POST && path == MESSAGES_PATH
}

fn text_response(status: StatusCode, body: String) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response
}

fn relay_response(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Forward one request to the upstream, verbatim, capturing telemetry
/// alongside for qualifying exchanges.
///
/// Only upstream transport failure is ever surfaced to the caller (as 502);
/// malformed JSON anywhere degrades to absent fields and the upstream's own
/// error statuses are relayed untouched.
async fn forward(State(state): State<Arc<AppState>>, req: Request<Body>) -> Response<Body> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    let Some(api_path) = upstream_path(&parts.uri) else {
        return text_response(StatusCode::NOT_FOUND, "Not found".to_string());
    };

    debug!(method = %parts.method, path = %api_path, "Proxying request");

    // Request bodies are buffered whole: the proxy needs its own copy for
    // logging, and they are boundable in memory.
    let body_bytes: Option<Bytes> = if parts.method == Method::GET || parts.method == Method::HEAD {
        None
    } else {
        match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) if bytes.is_empty() => None,
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                None
            }
        }
    };

    let exchange: Option<ExchangeHandle> = if is_capturable(&parts.method, &api_path) {
        let raw_body = body_bytes
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned());
        Some(state.store.begin(parts.method.as_str(), &api_path, raw_body))
    } else {
        None
    };

    let url = format!("{}{}", state.config.upstream.origin, api_path);
    let outbound_headers = sanitize_request_headers(&parts.headers, state.config.upstream.host());

    let mut outbound = state
        .client
        .request(parts.method.clone(), &url)
        .headers(outbound_headers);
    if let Some(bytes) = body_bytes {
        outbound = outbound.body(bytes);
    }

    let upstream = match outbound.send().await {
        Ok(response) => response,
        Err(e) => {
            let message = format!("Proxy error: {}", e);
            error!(error = %e, url = %url, "Upstream request failed");
            if let Some(exchange) = &exchange {
                exchange.set_elapsed(started.elapsed());
                exchange.set_response_status(StatusCode::BAD_GATEWAY.as_u16());
                exchange.set_response_text(message.clone());
            }
            return text_response(StatusCode::BAD_GATEWAY, message);
        }
    };

    let status = upstream.status();
    let relayed_headers = sanitize_response_headers(upstream.headers());
    let is_stream = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);

    if !is_stream {
        let body = match upstream.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let message = format!("Proxy error: {}", e);
                error!(error = %e, "Failed to read upstream response body");
                if let Some(exchange) = &exchange {
                    exchange.set_elapsed(started.elapsed());
                    exchange.set_response_status(StatusCode::BAD_GATEWAY.as_u16());
                    exchange.set_response_text(message.clone());
                }
                return text_response(StatusCode::BAD_GATEWAY, message);
            }
        };

        if let Some(exchange) = &exchange {
            exchange.set_elapsed(started.elapsed());
            exchange.set_response_status(status.as_u16());

            let text = String::from_utf8_lossy(&body);
            match serde_json::from_str::<serde_json::Value>(&text) {
                Ok(value) => {
                    let (input, output) = telemetry::extract_json_usage(&value);
                    exchange.set_tokens(input, output);
                    exchange.set_response_text(value.to_string());
                }
                Err(_) => exchange.set_response_text(text.into_owned()),
            }
        }

        // The caller gets the original bytes, not the re-serialized form.
        return relay_response(status, relayed_headers, Body::from(body));
    }

    // Streaming: status is known now, elapsed only once the stream drains.
    let body = match &exchange {
        Some(exchange) => {
            exchange.set_streaming();
            exchange.set_response_status(status.as_u16());
            Body::from_stream(TeeStream::new(
                Box::pin(upstream.bytes_stream()),
                exchange.clone(),
                started,
            ))
        }
        None => Body::from_stream(upstream.bytes_stream()),
    };

    relay_response(status, relayed_headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_path_strips_prefix() {
        let uri: Uri = "/proxy/v1/messages".parse().unwrap();
        assert_eq!(upstream_path(&uri).as_deref(), Some("/v1/messages"));
    }

    #[test]
    fn test_upstream_path_keeps_query() {
        let uri: Uri = "/proxy/v1/models?limit=5".parse().unwrap();
        assert_eq!(upstream_path(&uri).as_deref(), Some("/v1/models?limit=5"));
    }

    #[test]
    fn test_upstream_path_outside_prefix() {
        let uri: Uri = "/api/logs".parse().unwrap();
        assert_eq!(upstream_path(&uri), None);

        // "/proxyfoo" must not be treated as inside the prefix.
        let uri: Uri = "/proxyfoo/v1/messages".parse().unwrap();
        assert_eq!(upstream_path(&uri), None);
    }

    #[test]
    fn test_upstream_path_bare_prefix() {
        let uri: Uri = "/proxy".parse().unwrap();
        assert_eq!(upstream_path(&uri).as_deref(), Some("/"));
    }

    #[test]
    fn test_is_capturable() {
        assert!(is_capturable(&Method::POST, "/v1/messages"));
        assert!(is_capturable(&Method::POST, "/v1/messages?beta=true"));
        assert!(!is_capturable(&Method::GET, "/v1/messages"));
        assert!(!is_capturable(&Method::POST, "/v1/models"));
        assert!(!is_capturable(&Method::POST, "/v1/messages/count_tokens"));
    }
}
