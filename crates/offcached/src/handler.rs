//! Turns incoming HTTP requests into fetch interceptions

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use offcache::{is_hop_by_hop, ControllerConfig, Network, OfflineCacheController, Url};
use tracing::warn;

/// Maximum request body forwarded to the network (16MB)
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// Shared state of the proxy routes
pub type Controller<N> = Arc<OfflineCacheController<N>>;

/// Fallback route: every request goes through [`OfflineCacheController::on_fetch`]
///
/// Unusable targets get 400, oversized bodies 413, and a failed fetch an
/// empty 502.
pub async fn intercept<N: Network + 'static>(
    State(controller): State<Controller<N>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let url = match target_url(controller.config(), &parts.uri) {
        Some(url) => url,
        None => {
            warn!(request_target = %parts.uri, "Rejected request target");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let body = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(e) => {
            warn!(url = %url, error = %e, "Rejected request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let mut fetch = offcache::Request::new(parts.method.as_str(), url);
    fetch.headers = parts
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    fetch.body = body.to_vec();

    match controller.on_fetch(&fetch).await {
        Ok(response) => into_http(response, parts.method == Method::HEAD),
        Err(e) => {
            // No substitute content: the caller sees a failed load.
            warn!(method = %fetch.method, url = %fetch.url, error = %e, "Fetch failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Origin-form targets stay on the origin; absolute-form targets are taken
/// as-is. Only http and https are served.
fn target_url(config: &ControllerConfig, uri: &Uri) -> Option<Url> {
    let url = if uri.scheme().is_some() {
        Url::parse(&uri.to_string()).ok()?
    } else {
        let path = uri.path();
        if !path.starts_with('/') {
            return None;
        }

        // Set rather than joined: `//host/x` is a path here, not a new authority.
        let mut url = config.origin_url().ok()?;
        url.set_path(path);
        url.set_query(uri.query());
        url
    };

    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

/// Build the wire response. Connection-level headers are dropped; for HEAD
/// an upstream Content-Length is kept since the body is empty.
fn into_http(response: offcache::Response, head: bool) -> Response {
    let status = match StatusCode::from_u16(response.status) {
        Ok(status) => status,
        Err(_) => {
            warn!(status = response.status, "Upstream status out of range");
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;

    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        let keep = !is_hop_by_hop(name) || (head && name.eq_ignore_ascii_case("content-length"));
        if !keep {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            if name == CONTENT_LENGTH {
                headers.insert(name, value);
            } else {
                headers.append(name, value);
            }
        }
    }

    out
}
