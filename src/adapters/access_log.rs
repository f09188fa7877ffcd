//! Access log middleware (§4.I): wraps the data-path handler, captures the final status
//! code (defaulting to `200`), and records one row per request keyed by the matched config
//! identifier or the `NO_MATCH` sentinel (§11).
use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    response::Response,
};

use crate::core::Gateway;

/// Re-runs the routing lookup after `next` returns rather than threading the matched config
/// through request extensions, keeping this middleware independent of how `HttpHandler`
/// structures its own internals.
pub async fn access_log_middleware(
    State(gateway): State<Arc<Gateway>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let remote_addr = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let start = Instant::now();
    let response = next.run(req).await;
    let latency = start.elapsed();

    let status = response.status().as_u16();
    let config_id = gateway.find_matching_route(&path).map(|cfg| cfg.id);

    gateway
        .access_recorder()
        .record_access_log(config_id, &method, &path, &remote_addr, status, latency)
        .await;

    response
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use hyper::Request as HyperRequest;
    use std::{sync::Mutex, time::Duration};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::core::{
        backend::{BackendConfig, CreateBackendDto},
        gateway::AccessRecorder,
    };

    struct RecordingRecorder(Mutex<Vec<(Option<Uuid>, u16)>>);

    #[async_trait]
    impl AccessRecorder for RecordingRecorder {
        async fn record_access_log(
            &self,
            config_id: Option<Uuid>,
            _method: &str,
            _path: &str,
            _remote_addr: &str,
            status: u16,
            _latency: Duration,
        ) {
            self.0.lock().unwrap().push((config_id, status));
        }
    }

    struct NoopReporter;

    #[async_trait]
    impl crate::core::gateway::HealthReporter for NoopReporter {
        async fn set_health_status(
            &self,
            _config_id: Uuid,
            _endpoint_url: &str,
            _is_healthy: bool,
            _latency: Duration,
        ) {
        }
    }

    #[tokio::test]
    async fn records_matched_config_id() {
        let gateway = Arc::new(Gateway::new());
        let recorder = Arc::new(RecordingRecorder(Mutex::new(Vec::new())));
        gateway.complete(Arc::new(NoopReporter), recorder.clone());

        let config = Arc::new(
            BackendConfig::new(CreateBackendDto {
                path_prefix: "/a/".to_string(),
                target_urls: vec!["http://u1/".to_string()],
                rate_limit: 0,
                auth_type: "none".to_string(),
            })
            .unwrap(),
        );
        let config_id = config.id;
        gateway.reload_backends(vec![config]);

        let app = Router::new()
            .route("/a/things", get(|| async { StatusCode::OK }))
            .layer(middleware::from_fn_with_state(
                gateway.clone(),
                access_log_middleware,
            ))
            .with_state(gateway);

        let req = HyperRequest::builder()
            .uri("/a/things")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let rows = recorder.0.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], (Some(config_id), 200));
    }

    #[tokio::test]
    async fn records_no_match_sentinel_on_route_miss() {
        let gateway = Arc::new(Gateway::new());
        let recorder = Arc::new(RecordingRecorder(Mutex::new(Vec::new())));
        gateway.complete(Arc::new(NoopReporter), recorder.clone());

        let app = Router::new()
            .route("/z/", get(|| async { StatusCode::NOT_FOUND }))
            .layer(middleware::from_fn_with_state(
                gateway.clone(),
                access_log_middleware,
            ))
            .with_state(gateway);

        let req = HyperRequest::builder()
            .uri("/z/")
            .body(Body::empty())
            .unwrap();
        app.oneshot(req).await.unwrap();

        let rows = recorder.0.lock().unwrap();
        assert_eq!(rows[0], (None, 404));
    }
}
