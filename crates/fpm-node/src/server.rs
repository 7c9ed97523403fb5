//! Control API on the farm LAN.
//!
//! `GET /self` and `POST /power`, both answered with signed responses, plus
//! `GET /metrics`.

use crate::orchestrator::PowerOrchestrator;
use fpm_core::{unix_now, ErrorKind, InboundRequest, PowerError, Result};
use fpm_crypto::signed::{self, SIGNATURE_HEADER, SIGNER_HEADER, TIMESTAMP_HEADER};
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use warp::http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use warp::http::StatusCode;
use warp::reply::Response;
use warp::Filter;

/// Largest accepted `/power` body.
pub const MAX_BODY_BYTES: u64 = 16 * 1024;

fn with_state<T: Clone + Send>(
    state: T,
) -> impl Filter<Extract = (T,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn status_for(err: &PowerError) -> StatusCode {
    match err {
        PowerError::Validation(_) => StatusCode::BAD_REQUEST,
        PowerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        PowerError::Forbidden(_) => StatusCode::FORBIDDEN,
        PowerError::Connection(_) | PowerError::Ledger(_) | PowerError::Stream(_) => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(code: StatusCode, msg: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "code": code.as_u16(),
        "msg": msg
    })
}

/// JSON response signed by this node.
fn signed_json(
    orch: &PowerOrchestrator,
    path: &str,
    status: StatusCode,
    value: &serde_json::Value,
) -> Response {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let headers = signed::sign_response(orch.identity(), orch.node().0, path, unix_now(), &body);

    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in headers.pairs() {
        if let Ok(value) = HeaderValue::from_str(value) {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), value);
        }
    }
    response
}

fn error_reply(orch: &PowerOrchestrator, path: &str, err: &PowerError) -> Response {
    let code = status_for(err);
    match err.kind() {
        ErrorKind::Authorization => {
            tracing::warn!(path, code = code.as_u16(), error = %err, "request rejected")
        }
        ErrorKind::Validation => {
            tracing::info!(path, code = code.as_u16(), error = %err, "request rejected")
        }
        _ => tracing::error!(path, code = code.as_u16(), error = %err, "request failed"),
    }
    signed_json(orch, path, code, &error_body(code, &err.to_string()))
}

async fn handle_self(orch: Arc<PowerOrchestrator>) -> std::result::Result<Response, Infallible> {
    let reply = match orch.self_info().await {
        Ok(info) => match serde_json::to_value(&info) {
            Ok(value) => signed_json(&orch, "/self", StatusCode::OK, &value),
            Err(e) => error_reply(&orch, "/self", &PowerError::Fatal(e.to_string())),
        },
        Err(e) => error_reply(&orch, "/self", &e),
    };
    Ok(reply)
}

/// Header value as text. Values that are not visible ASCII read as absent
/// and fail signature verification.
fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn handle_power(
    orch: Arc<PowerOrchestrator>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> std::result::Result<Response, Infallible> {
    let request = InboundRequest {
        method: "POST".to_string(),
        path: "/power".to_string(),
        signer: header_text(&headers, SIGNER_HEADER),
        timestamp: header_text(&headers, TIMESTAMP_HEADER),
        signature: header_text(&headers, SIGNATURE_HEADER),
        body: body.to_vec(),
    };

    let reply = match orch.power(&request).await {
        Ok(()) => signed_json(
            &orch,
            "/power",
            StatusCode::ACCEPTED,
            &serde_json::json!({"status": "accepted"}),
        ),
        Err(e) => {
            orch.metrics().reject(status_for(&e).as_u16());
            error_reply(&orch, "/power", &e)
        }
    };
    Ok(reply)
}

pub fn routes(
    orch: Arc<PowerOrchestrator>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    let self_route = warp::path("self")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(orch.clone()))
        .and_then(handle_self);

    let power_route = warp::path("power")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(orch.clone()))
        .and(warp::header::headers_cloned())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and_then(handle_power);

    let metrics_route = warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(orch))
        .map(|orch: Arc<PowerOrchestrator>| match orch.metrics().export() {
            Ok(output) => warp::reply::with_status(
                warp::reply::with_header(output, "Content-Type", "text/plain; version=0.0.4"),
                StatusCode::OK,
            ),
            Err(e) => warp::reply::with_status(
                warp::reply::with_header(
                    format!("metrics export failed: {}", e),
                    "Content-Type",
                    "text/plain",
                ),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        });

    self_route
        .or(power_route)
        .or(metrics_route)
        .recover(handle_rejection)
}

async fn handle_rejection(
    err: warp::Rejection,
) -> std::result::Result<impl warp::Reply, Infallible> {
    let (code, msg) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        tracing::error!(rejection = ?err, "unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&error_body(code, msg)),
        code,
    ))
}

/// Bind the control API. The returned future serves until `shutdown` flips,
/// then drains in-flight requests.
pub fn bind(
    orch: Arc<PowerOrchestrator>,
    listen: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, impl Future<Output = ()> + Send + 'static)> {
    let signal = async move {
        let _ = shutdown.wait_for(|stopped| *stopped).await;
    };
    warp::serve(routes(orch))
        .try_bind_with_graceful_shutdown(listen, signal)
        .map_err(|e| PowerError::Fatal(format!("failed to bind {}: {}", listen, e)))
}
