//! Health checker adapter (§4.E): one unconditioned GET probe per endpoint, on a fixed tick,
//! with no threshold smoothing — every probe result is reported to the gateway's
//! `HealthReporter` regardless of whether it changes the endpoint's current state.
use std::{sync::Arc, time::Duration, time::Instant};

use eyre::Result;

use crate::{core::Gateway, ports::http_client::HttpClient};

pub struct HealthChecker {
    gateway: Arc<Gateway>,
    http_client: Arc<dyn HttpClient>,
    interval: Duration,
    timeout: Duration,
    latency_ceiling: Duration,
}

impl HealthChecker {
    pub fn new(
        gateway: Arc<Gateway>,
        http_client: Arc<dyn HttpClient>,
        interval: Duration,
        timeout: Duration,
        latency_ceiling: Duration,
    ) -> Self {
        Self {
            gateway,
            http_client,
            interval,
            timeout,
            latency_ceiling,
        }
    }

    /// Run forever, probing every registered endpoint once per tick. Each backend's endpoints
    /// are probed concurrently with each other; backends themselves are probed sequentially per
    /// tick, which is fine at operator-scale config counts (§5).
    pub async fn run(&self) -> Result<()> {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            latency_ceiling_ms = self.latency_ceiling.as_millis() as u64,
            "starting health checker"
        );

        loop {
            tokio::time::sleep(self.interval).await;
            self.run_once().await;
        }
    }

    async fn run_once(&self) {
        let configs = self.gateway.snapshot_configs();
        for config in configs {
            let endpoints = config.endpoints_snapshot();
            let mut probes = Vec::with_capacity(endpoints.len());
            for endpoint in endpoints {
                if endpoint.parsed_url.is_none() {
                    tracing::warn!(
                        endpoint_url = endpoint.raw_url,
                        "skipping health probe: endpoint URL does not parse"
                    );
                    continue;
                }
                probes.push(self.probe_endpoint(config.id, endpoint.raw_url));
            }
            futures_util::future::join_all(probes).await;
        }
    }

    /// Probe a single endpoint: GET, healthy iff status is 200 or 401 and latency is within the
    /// ceiling (§9 Open Question: a 401 still proves the endpoint is alive and routing, so it
    /// counts as healthy even though it isn't authenticated).
    async fn probe_endpoint(&self, config_id: uuid::Uuid, endpoint_url: String) {
        let request = match hyper::Request::builder()
            .method("GET")
            .uri(&endpoint_url)
            .body(axum::body::Body::empty())
        {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(endpoint_url, error = %e, "could not build health probe request");
                return;
            }
        };

        let start = Instant::now();
        let probe = tokio::time::timeout(self.timeout, self.http_client.send_request(request));

        let (is_healthy, latency) = match probe.await {
            Ok(Ok(response)) => {
                let latency = start.elapsed();
                let status = response.status().as_u16();
                let healthy = (status == 200 || status == 401) && latency <= self.latency_ceiling;
                (healthy, latency)
            }
            Ok(Err(e)) => {
                tracing::debug!(endpoint_url, error = %e, "health probe transport error");
                (false, start.elapsed())
            }
            Err(_) => {
                tracing::debug!(endpoint_url, "health probe timed out");
                (false, self.timeout)
            }
        };

        crate::metrics::set_backend_health_status(&endpoint_url, is_healthy);
        self.gateway
            .health_reporter()
            .set_health_status(config_id, &endpoint_url, is_healthy, latency)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::body::Body as AxumBody;

    use super::*;
    use crate::{
        core::{
            backend::{BackendConfig, CreateBackendDto},
            gateway::AccessRecorder,
        },
        ports::http_client::{HttpClientError, HttpClientResult},
    };

    struct FixedStatusClient {
        status: u16,
    }

    #[async_trait]
    impl HttpClient for FixedStatusClient {
        async fn send_request(
            &self,
            _req: hyper::Request<AxumBody>,
        ) -> HttpClientResult<hyper::Response<AxumBody>> {
            hyper::Response::builder()
                .status(self.status)
                .body(AxumBody::empty())
                .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))
        }
    }

    struct NoopRecorder;

    #[async_trait]
    impl AccessRecorder for NoopRecorder {
        async fn record_access_log(
            &self,
            _config_id: Option<uuid::Uuid>,
            _method: &str,
            _path: &str,
            _remote_addr: &str,
            _status: u16,
            _latency: Duration,
        ) {
        }
    }

    struct RecordingReporter(Mutex<Vec<(uuid::Uuid, bool)>>);

    #[async_trait]
    impl crate::core::gateway::HealthReporter for RecordingReporter {
        async fn set_health_status(
            &self,
            config_id: uuid::Uuid,
            _endpoint_url: &str,
            is_healthy: bool,
            _latency: Duration,
        ) {
            self.0.lock().unwrap().push((config_id, is_healthy));
        }
    }

    #[tokio::test]
    async fn probe_reports_healthy_on_200() {
        let gateway = Arc::new(Gateway::new());
        let reporter = Arc::new(RecordingReporter(Mutex::new(Vec::new())));
        gateway.complete(reporter.clone(), Arc::new(NoopRecorder));

        let config = Arc::new(
            BackendConfig::new(CreateBackendDto {
                path_prefix: "/a/".to_string(),
                target_urls: vec!["http://u1/".to_string()],
                rate_limit: 0,
                auth_type: "none".to_string(),
            })
            .unwrap(),
        );
        gateway.reload_backends(vec![config.clone()]);

        let checker = HealthChecker::new(
            gateway.clone(),
            Arc::new(FixedStatusClient { status: 200 }),
            Duration::from_secs(5),
            Duration::from_secs(2),
            Duration::from_millis(500),
        );
        checker.run_once().await;

        assert_eq!(reporter.0.lock().unwrap(), vec![(config.id, true)]);
    }

    #[tokio::test]
    async fn probe_reports_healthy_on_401() {
        let gateway = Arc::new(Gateway::new());
        let reporter = Arc::new(RecordingReporter(Mutex::new(Vec::new())));
        gateway.complete(reporter.clone(), Arc::new(NoopRecorder));

        let config = Arc::new(
            BackendConfig::new(CreateBackendDto {
                path_prefix: "/a/".to_string(),
                target_urls: vec!["http://u1/".to_string()],
                rate_limit: 0,
                auth_type: "none".to_string(),
            })
            .unwrap(),
        );
        gateway.reload_backends(vec![config.clone()]);

        let checker = HealthChecker::new(
            gateway.clone(),
            Arc::new(FixedStatusClient { status: 401 }),
            Duration::from_secs(5),
            Duration::from_secs(2),
            Duration::from_millis(500),
        );
        checker.run_once().await;

        assert_eq!(reporter.0.lock().unwrap(), vec![(config.id, true)]);
    }

    #[tokio::test]
    async fn probe_reports_unhealthy_on_500() {
        let gateway = Arc::new(Gateway::new());
        let reporter = Arc::new(RecordingReporter(Mutex::new(Vec::new())));
        gateway.complete(reporter.clone(), Arc::new(NoopRecorder));

        let config = Arc::new(
            BackendConfig::new(CreateBackendDto {
                path_prefix: "/a/".to_string(),
                target_urls: vec!["http://u1/".to_string()],
                rate_limit: 0,
                auth_type: "none".to_string(),
            })
            .unwrap(),
        );
        gateway.reload_backends(vec![config.clone()]);

        let checker = HealthChecker::new(
            gateway.clone(),
            Arc::new(FixedStatusClient { status: 500 }),
            Duration::from_secs(5),
            Duration::from_secs(2),
            Duration::from_millis(500),
        );
        checker.run_once().await;

        assert_eq!(reporter.0.lock().unwrap(), vec![(config.id, false)]);
    }
}
