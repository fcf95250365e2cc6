use axum::http::{HeaderMap, HeaderValue, header};
use std::collections::HashSet;

lazy_static::lazy_static! {
    /// Hop-by-hop and proxy-specific headers that must never reach the upstream.
    static ref STRIP_REQUEST_HEADERS: HashSet<&'static str> = [
        "host",
        "connection",
        "keep-alive",
        "transfer-encoding",
        "te",
        "upgrade",
        "proxy-authorization",
        "proxy-connection",
    ]
    .into_iter()
    .collect();
}

/// Rewrite an inbound header set into the outbound set sent upstream.
///
/// Drops the hop-by-hop set, rewrites `host` to the upstream's host and
/// removes `accept-encoding` so the upstream never compresses the body
/// (the proxy relays plain bytes and reads them for telemetry). Everything
/// else passes through unchanged, credentials included.
pub fn sanitize_request_headers(inbound: &HeaderMap, upstream_host: &str) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len());

    for (name, value) in inbound {
        if STRIP_REQUEST_HEADERS.contains(name.as_str()) {
            continue;
        }
        if name == header::ACCEPT_ENCODING {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    if let Ok(host) = HeaderValue::from_str(upstream_host) {
        outbound.insert(header::HOST, host);
    }

    outbound
}

/// Strip headers invalidated by the relay from an upstream response.
///
/// `content-length` no longer holds once the body is re-framed by the tee,
/// and `content-encoding` was never negotiated because `accept-encoding`
/// is stripped on the way out.
pub fn sanitize_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut relayed = HeaderMap::with_capacity(upstream.len());

    for (name, value) in upstream {
        if name == header::CONTENT_ENCODING || name == header::CONTENT_LENGTH {
            continue;
        }
        relayed.append(name.clone(), value.clone());
    }

    relayed
}
