//! CDL Gateway HTTP API
//!
//! - `POST /`: accept an analysis request and publish it to its queue
//! - `GET /status/`: plain HTML health page
//! - `GET /cluster/status`: broker cluster health snapshot
//! - `GET /metrics`: Prometheus exposition

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cg_broker::QueuePublisher;
use cg_common::ClusterStatus;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub mod error;
pub mod routing;

pub use error::{ApiError, ApiResult};
pub use routing::{Category, Route, RouteTable, RoutingError};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const HEALTH_PAGE: &str = "<html><body><h1>CDL Gateway - Health Check OK</h1></body></html>";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub publisher: Arc<dyn QueuePublisher>,
    pub routes: Arc<RouteTable>,
    pub metrics: Option<PrometheusHandle>,
}

/// Successful publish
#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub message: &'static str,
    pub status: u16,
    pub request_id: Option<String>,
    pub queue: String,
}

/// Caller address: the first `X-Forwarded-For` entry, else the peer address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        if forwarded.is_some() {
            return Ok(ClientIp(forwarded));
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientIp(peer))
    }
}

/// Create the router with all endpoints.
///
/// Every response carries `x-request-id`, taken from the request or
/// generated when absent.
pub fn create_router(
    publisher: Arc<dyn QueuePublisher>,
    routes: RouteTable,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = AppState {
        publisher,
        routes: Arc::new(routes),
        metrics,
    };
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/", post(publish_handler))
        .route("/status/", get(health_handler))
        .route("/cluster/status", get(cluster_status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id)),
        )
}

async fn publish_handler(
    State(state): State<AppState>,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<PublishResponse>> {
    let Json(mut body) = payload.map_err(|e| ApiError::Validation(e.body_text()))?;
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (category, route) = state.routes.resolve(&body)?;

    if let Some(object) = body.as_object_mut() {
        if let Some(id) = &request_id {
            object.insert("request_id".to_string(), Value::String(id.clone()));
        }
        if category.includes_client_ip() {
            object.insert(
                "client_ip".to_string(),
                client_ip.map(Value::String).unwrap_or(Value::Null),
            );
        }
    }

    if let Err(e) = state.publisher.publish(&route.queue, route.priority, &body).await {
        error!(
            request_id = request_id.as_deref().unwrap_or("-"),
            queue = %route.queue,
            error = %e,
            "Error processing request"
        );
        return Err(e.into());
    }

    info!(
        request_id = request_id.as_deref().unwrap_or("-"),
        queue = %route.queue,
        priority = route.priority,
        "Message sent successfully"
    );
    Ok(Json(PublishResponse {
        message: "success",
        status: 200,
        request_id,
        queue: route.queue,
    }))
}

async fn health_handler() -> Html<&'static str> {
    Html(HEALTH_PAGE)
}

async fn cluster_status_handler(State(state): State<AppState>) -> Json<ClusterStatus> {
    Json(state.publisher.cluster_status())
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}
