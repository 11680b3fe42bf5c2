//! HTTP surface: maps REST commands onto backend envelopes.
//!
//! `GET|POST /engine/{*command}` forwards the command with its query
//! parameters as the message body. GET requests whose URL matches a
//! cache rule are served from the response cache while fresh; every
//! other request goes to the next pool connection in round-robin order.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, warn};

use fluxgate_protocol::{ConnectionPool, ConnectionWrapper, EmitOptions, ProtocolError};
use fluxgate_response_cache::{CachedResponse, ResponseCache};

/// Marker header set on responses served from the cache.
pub const CACHE_HEADER: &str = "x-fluxgate-cache";

/// Shared gateway state.
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConnectionPool>,
    pub cache: Arc<ResponseCache>,
    /// Defaults every wrapper carries: dataset and transport timeout.
    pub defaults: EmitOptions,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/engine/{*command}", get(handle_command).post(handle_command))
        .with_state(state)
}

async fn handle_command(
    State(state): State<AppState>,
    Path(command): Path<String>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let url = uri.to_string();
    let cache_key = format!("{method} {url}");
    let rule_ttl = state
        .cache
        .get_rule(method.as_str(), &url)
        .map(|rule| rule.ttl());

    if rule_ttl.is_some() {
        if let Some(cached) = state.cache.get(&cache_key).await {
            debug!(key = %cache_key, "serving response from cache");
            return backend_response(cached, true);
        }
    }

    let body = serde_json::Value::Object(
        params
            .into_iter()
            .map(|(key, value)| (key, serde_json::Value::String(value)))
            .collect(),
    );

    let wrapper = ConnectionWrapper::new(state.pool.get(), state.defaults.clone());
    debug!(command = %command, backend = %wrapper.host_name(), "forwarding command");

    match wrapper.emit_message(&command, body, None).await {
        Ok(envelope) => {
            let response = CachedResponse {
                status_code: envelope.status_code.unwrap_or(200),
                body: envelope.body,
            };
            if let Some(ttl) = rule_ttl {
                state.cache.set(&cache_key, response.clone(), ttl).await;
            }
            backend_response(response, false)
        }
        Err(err) => error_response(err),
    }
}

fn backend_response(response: CachedResponse, from_cache: bool) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::OK);
    let mut http = (status, Json(response.body)).into_response();
    if from_cache {
        http.headers_mut()
            .insert(CACHE_HEADER, HeaderValue::from_static("hit"));
    }
    http
}

/// A request that fails at the backend still resolves the client call
/// with a typed status; nothing is left pending.
fn error_response(err: ProtocolError) -> Response {
    match err {
        ProtocolError::Timeout { elapsed_ms } => {
            warn!(elapsed_ms, "backend request timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({ "error": "backend request timed out" })),
            )
                .into_response()
        }
        ProtocolError::Backend {
            status_code,
            envelope,
        } => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(envelope.body)).into_response()
        }
        err => {
            warn!(error = %err, "backend request failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
