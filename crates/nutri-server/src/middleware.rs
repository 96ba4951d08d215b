use std::{
    any::Any,
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{
        header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use nutri_db::{Readiness, Store};
use serde::Serialize;
use uuid::Uuid;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Cookies sent with the request, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Cookies(HashMap<String, String>);

impl Cookies {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Client address and scheme as seen through the trusted proxy hops.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub ip: Option<IpAddr>,
    pub secure: bool,
}

/// How many reverse-proxy hops in front of the server are trusted to set
/// `X-Forwarded-*` headers.
#[derive(Debug, Clone, Copy)]
pub struct ProxyTrust {
    pub hops: usize,
}

/// Whether unhandled error messages are echoed to clients.
#[derive(Debug, Clone, Copy)]
pub struct ErrorPolicy {
    pub expose_details: bool,
}

/// Marker attached to a response by a handler that failed unexpectedly.
/// [`render_unhandled_errors`] turns it into the uniform 500 body.
#[derive(Debug, Clone)]
pub struct UnhandledError(pub Arc<str>);

impl IntoResponse for UnhandledError {
    fn into_response(self) -> Response {
        let mut res = StatusCode::INTERNAL_SERVER_ERROR.into_response();
        res.extensions_mut().insert(self);
        res
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: &'static str,
    pub error: Option<String>,
}

/// Axum middleware that extracts or generates a request ID.
///
/// If the incoming request has an `x-request-id` header, that value is used.
/// Otherwise a new `UUIDv4` is generated. The ID is:
/// - Inserted into request extensions as [`RequestId`]
/// - Set on the response as the `x-request-id` header
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Parses every `Cookie` header into a [`Cookies`] extension.
pub async fn parse_cookies(mut req: Request, next: Next) -> Response {
    let cookies = cookies_from_headers(req.headers());
    req.extensions_mut().insert(cookies);
    next.run(req).await
}

/// Resolves the client address behind [`ProxyTrust::hops`] proxies into a
/// [`ClientInfo`] extension.
pub async fn resolve_client(
    State(trust): State<ProxyTrust>,
    mut req: Request,
    next: Next,
) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let headers = req.headers();
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let forwarded_proto = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok());

    let info = ClientInfo {
        ip: client_ip(peer, forwarded_for, trust.hops),
        secure: trust.hops > 0
            && forwarded_proto
                .and_then(|v| v.split(',').next())
                .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https")),
    };
    req.extensions_mut().insert(info);

    next.run(req).await
}

/// Terminal error stage: converts any [`UnhandledError`] response into
/// `500 {"message": "Internal server error", "error": ...}`.
pub async fn render_unhandled_errors(
    State(policy): State<ErrorPolicy>,
    req: Request,
    next: Next,
) -> Response {
    let res = next.run(req).await;
    let Some(UnhandledError(message)) = res.extensions().get::<UnhandledError>().cloned() else {
        return res;
    };

    tracing::error!(error = %message, "server error");

    let (parts, _) = res.into_parts();
    let body = ErrorResponse {
        message: "Internal server error",
        error: policy.expose_details.then(|| message.to_string()),
    };
    let mut rendered = (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
    for (name, value) in &parts.headers {
        if name != CONTENT_TYPE && name != CONTENT_LENGTH {
            rendered.headers_mut().append(name, value.clone());
        }
    }
    rendered
}

/// Panic handler for `CatchPanicLayer`; routes panics through the same
/// rendering as other unhandled errors.
#[allow(clippy::needless_pass_by_value)]
pub fn panic_to_unhandled(payload: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "handler panicked".to_string()
    };
    UnhandledError(message.into()).into_response()
}

/// Refuses requests with 503 until the store reports ready. A degraded store
/// is re-probed first, at most once per [`nutri_db::store::PROBE_INTERVAL`].
pub async fn require_store_ready(State(store): State<Store>, req: Request, next: Next) -> Response {
    let readiness = store.recover_if_due().await;
    if readiness == Readiness::Ready {
        return next.run(req).await;
    }

    tracing::warn!(%readiness, path = %req.uri().path(), "rejecting request: store not ready");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            message: "Service unavailable",
            error: Some(format!("store is {readiness}")),
        }),
    )
        .into_response()
}

fn cookies_from_headers(headers: &HeaderMap) -> Cookies {
    let mut cookies = HashMap::new();
    for header in headers.get_all(COOKIE) {
        let Ok(raw) = header.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            // First occurrence wins, as browsers send the most specific cookie first.
            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    Cookies(cookies)
}

/// Walks from the socket peer back through `X-Forwarded-For` (right to
/// left), stopping after `hops` trusted proxies.
fn client_ip(peer: Option<IpAddr>, forwarded_for: Option<&str>, hops: usize) -> Option<IpAddr> {
    let forwarded = forwarded_for
        .into_iter()
        .flat_map(|v| v.split(',').rev())
        .filter_map(|addr| addr.trim().parse::<IpAddr>().ok());
    let chain: Vec<IpAddr> = peer.into_iter().chain(forwarded).collect();
    let index = hops.min(chain.len().saturating_sub(1));
    chain.get(index).copied()
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().expect("ip")
    }

    #[test]
    fn cookies_parse_pairs_and_strip_quotes() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("userId=abc; theme=\"dark\"; broken; =nameless"),
        );
        let cookies = cookies_from_headers(&headers);
        assert_eq!(cookies.get("userId"), Some("abc"));
        assert_eq!(cookies.get("theme"), Some("dark"));
        assert_eq!(cookies.get("broken"), None);
    }

    #[test]
    fn cookies_merge_multiple_headers_first_wins() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("a=2; b=3"));
        let cookies = cookies_from_headers(&headers);
        assert_eq!(cookies.get("a"), Some("1"));
        assert_eq!(cookies.get("b"), Some("3"));
    }

    #[test]
    fn client_ip_trusts_one_hop() {
        let peer = Some(ip("10.0.0.1"));
        assert_eq!(
            client_ip(peer, Some("203.0.113.9, 198.51.100.7"), 1),
            Some(ip("198.51.100.7"))
        );
    }

    #[test]
    fn client_ip_without_trust_uses_peer() {
        let peer = Some(ip("10.0.0.1"));
        assert_eq!(client_ip(peer, Some("203.0.113.9"), 0), peer);
    }

    #[test]
    fn client_ip_falls_back_to_furthest_known_address() {
        let peer = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(client_ip(peer, None, 1), peer);
        assert_eq!(client_ip(peer, Some("garbage"), 3), peer);
        assert_eq!(client_ip(None, None, 1), None);
    }

    #[test]
    fn panic_payloads_become_unhandled_errors() {
        let res = panic_to_unhandled(Box::new("boom"));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let err = res.extensions().get::<UnhandledError>().expect("marker");
        assert_eq!(&*err.0, "boom");

        let res = panic_to_unhandled(Box::new(String::from("owned boom")));
        let err = res.extensions().get::<UnhandledError>().expect("marker");
        assert_eq!(&*err.0, "owned boom");
    }
}
