//! Admin control-plane API (§4.H): JSON over HTTP, backed directly by `BackendService`.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    core::{
        backend::{BackendConfig, CreateBackendDto, Protocol},
        service::{BackendService, ServiceError},
    },
    ports::repository::HistoryQuery,
};

pub fn router(service: Arc<BackendService>) -> Router {
    Router::new()
        .route("/config/v1/backends", post(create_backend).get(list_backends))
        .route("/config/v1/backends/{id}/history", get(backend_history))
        .with_state(service)
}

/// Request body for `POST /config/v1/backends`.
#[derive(Debug, Deserialize)]
struct CreateBackendRequest {
    #[serde(rename = "pathPrefix")]
    path_prefix: String,
    #[serde(rename = "targetUrls")]
    target_urls: Vec<String>,
    #[serde(rename = "rateLimit", default)]
    rate_limit: u32,
    #[serde(rename = "authType", default = "default_auth_type")]
    auth_type: String,
}

fn default_auth_type() -> String {
    "none".to_string()
}

/// §11: the literal `{"id", "message", "status": "success"}` shape.
#[derive(Debug, Serialize)]
struct CreateBackendResponse {
    id: Uuid,
    message: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct EndpointView {
    url: String,
    #[serde(rename = "isHealthy")]
    is_healthy: bool,
}

#[derive(Debug, Serialize)]
struct BackendView {
    id: Uuid,
    #[serde(rename = "pathPrefix")]
    path_prefix: String,
    protocol: Protocol,
    #[serde(rename = "rateLimit")]
    rate_limit: u32,
    #[serde(rename = "authType")]
    auth_type: String,
    #[serde(rename = "lastUpdated")]
    last_updated: DateTime<Utc>,
    endpoints: Vec<EndpointView>,
}

impl From<&Arc<BackendConfig>> for BackendView {
    fn from(config: &Arc<BackendConfig>) -> Self {
        Self {
            id: config.id,
            path_prefix: config.path_prefix.clone(),
            protocol: config.protocol,
            rate_limit: config.rate_limit,
            auth_type: config.auth_type.clone(),
            last_updated: config.last_updated,
            endpoints: config
                .endpoints_snapshot()
                .into_iter()
                .map(|e| EndpointView {
                    url: e.raw_url,
                    is_healthy: e.is_healthy,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryRow {
    #[serde(rename = "isHealthy")]
    is_healthy: bool,
    #[serde(rename = "latencyNanos")]
    latency_nanos: i64,
    #[serde(rename = "recordedAt")]
    recorded_at: DateTime<Utc>,
}

async fn create_backend(
    State(service): State<Arc<BackendService>>,
    Json(body): Json<CreateBackendRequest>,
) -> Response {
    let dto = CreateBackendDto {
        path_prefix: body.path_prefix,
        target_urls: body.target_urls,
        rate_limit: body.rate_limit,
        auth_type: body.auth_type,
    };

    match service.create(dto).await {
        Ok(config) => (
            StatusCode::CREATED,
            Json(CreateBackendResponse {
                id: config.id,
                message: "backend created".to_string(),
                status: "success",
            }),
        )
            .into_response(),
        Err(ServiceError::Validation(e)) => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(ServiceError::Storage(e)) => {
            tracing::error!(error = %e, "failed to persist new backend");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to persist backend").into_response()
        }
    }
}

async fn list_backends(State(service): State<Arc<BackendService>>) -> Json<Vec<BackendView>> {
    let views = service.get_all().iter().map(BackendView::from).collect();
    Json(views)
}

async fn backend_history(
    State(service): State<Arc<BackendService>>,
    Path(id): Path<Uuid>,
) -> Response {
    let query = HistoryQuery {
        config_id: id,
        since: None,
        limit: None,
    };
    match service.get_history(query).await {
        Ok(rows) => Json(
            rows.into_iter()
                .map(|r| HistoryRow {
                    is_healthy: r.is_healthy,
                    latency_nanos: r.latency_nanos,
                    recorded_at: r.recorded_at,
                })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, %id, "failed to fetch health history");
            (StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch health history").into_response()
        }
    }
}
