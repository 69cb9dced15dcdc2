//! Security middleware for the `/api` routes
//!
//! Builds a [`SecurityRequest`] from the incoming request, runs the
//! security pipeline, and forwards the sanitized request with the caller's
//! claims in its extensions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, FromRequestParts, OriginalUri, RawPathParams, Request, State},
    http::{header, request::Parts, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value};
use tracing::debug;

use crate::models::security::SecurityValidationContext;
use crate::security::request::SecurityRequest;
use crate::server::handlers::ApiError;
use crate::server::state::ServerState;

/// Largest request body the guard will buffer
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const UNKNOWN_CLIENT: &str = "unknown";

/// Path parameters of a guarded route, sanitized
///
/// Handlers behind the guard read route parameters from here instead of
/// `Path`, which still holds the raw values.
#[derive(Debug, Clone, Default)]
pub struct CleanParams(Map<String, Value>);

impl CleanParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }
}

/// Action implied by an HTTP method
pub fn action_for(method: &Method) -> String {
    match *method {
        Method::GET | Method::HEAD => "read".to_string(),
        Method::POST => "create".to_string(),
        Method::PUT | Method::PATCH => "update".to_string(),
        Method::DELETE => "delete".to_string(),
        ref other => other.as_str().to_ascii_lowercase(),
    }
}

/// Resource is the first path segment after `/api`
pub fn context_for(method: &Method, path: &str) -> SecurityValidationContext {
    let resource = path
        .strip_prefix("/api")
        .unwrap_or(path)
        .split('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("")
        .to_string();
    SecurityValidationContext::new(resource, action_for(method))
}

/// First `X-Forwarded-For` hop, else the peer address
fn client_ip(parts: &Parts) -> String {
    if let Some(forwarded) = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return forwarded.to_string();
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Path as received, before `nest` stripped the prefix
fn original_path(parts: &Parts) -> String {
    parts
        .extensions
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string())
}

fn query_value(query: Option<&str>) -> Value {
    let map: Map<String, Value> = query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .map(|(k, v)| (k, Value::String(v)))
                .collect()
        })
        .unwrap_or_default();
    Value::Object(map)
}

/// `uri` with its query replaced by the sanitized query values
fn sanitized_uri(uri: &Uri, query: &Value) -> Option<Uri> {
    if uri.query().is_none() {
        return Some(uri.clone());
    }
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Some(map) = query.as_object() {
        for (key, value) in map {
            match value.as_str() {
                Some(value) => serializer.append_pair(key, value),
                None => serializer.append_pair(key, &value.to_string()),
            };
        }
    }
    format!("{}?{}", uri.path(), serializer.finish()).parse().ok()
}

/// Validate a request before it reaches an `/api` handler
pub async fn security_guard(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large")
                .into_response()
        }
    };
    let has_body = !bytes.is_empty();
    let body_value = if has_body {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => value,
            Err(e) => {
                return ApiError::new(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid JSON body: {}", e),
                )
                .into_response()
            }
        }
    } else {
        Value::Object(Map::new())
    };

    let params: Map<String, Value> = match RawPathParams::from_request_parts(&mut parts, &()).await
    {
        Ok(raw) => raw
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect(),
        Err(_) => Map::new(),
    };

    let path = original_path(&parts);
    let mut req = SecurityRequest::new(parts.method.as_str(), path.as_str(), client_ip(&parts))
        .with_body(body_value)
        .with_query(query_value(parts.uri.query()));
    for (name, value) in parts.headers.iter() {
        if let Ok(value) = value.to_str() {
            req = req.with_header(name.as_str(), value);
        }
    }
    if let Some(cookies) = req.header("cookie").map(str::to_string) {
        req.parse_cookies(&cookies);
    }
    req.params = Value::Object(params);

    let context = context_for(&parts.method, &path);
    if let Err(e) = state.pipeline.validate_request(&mut req, &context).await {
        return ApiError::from(e).into_response();
    }
    debug!(
        "Request {} {} allowed for {}:{}",
        req.method, req.path, context.resource, context.action
    );

    let body = if has_body {
        parts.headers.remove(header::CONTENT_LENGTH);
        Body::from(req.body.to_string())
    } else {
        Body::empty()
    };
    let Some(uri) = sanitized_uri(&parts.uri, &req.query) else {
        return ApiError::new(StatusCode::BAD_REQUEST, "Invalid query string").into_response();
    };
    parts.uri = uri;
    if let Value::Object(params) = &req.params {
        parts.extensions.insert(CleanParams(params.clone()));
    }
    if let Some(claims) = req.identity.clone() {
        parts.extensions.insert(claims);
    }

    let response = next.run(Request::from_parts(parts, body)).await;
    let status = response.status();
    state
        .pipeline
        .record_outcome(&req, !status.is_client_error() && !status.is_server_error());
    response
}
