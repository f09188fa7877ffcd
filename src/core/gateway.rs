//! Gateway: the routing table (§4.C) plus the narrow interfaces that resolve the cyclic
//! dependency between it and the backend service (§9).
//!
//! Construction order (see `main.rs`): the gateway is built empty (`Gateway::new`), handed to
//! the service as a `RouteReloader`, and only *after* the service exists is the gateway
//! completed with a `HealthReporter`/`AccessRecorder` pointing back at that same service
//! (`Gateway::complete`). Adapters (health checker, access log middleware) depend only on
//! `Arc<Gateway>`, never on the concrete service type, keeping `core::gateway` and
//! `core::service` from depending on each other's concrete types.
use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::core::backend::BackendConfig;

/// Implemented by the backend service; called by the health checker after every probe.
#[async_trait]
pub trait HealthReporter: Send + Sync {
    async fn set_health_status(
        &self,
        config_id: Uuid,
        endpoint_url: &str,
        is_healthy: bool,
        latency: Duration,
    );
}

/// Implemented by the backend service; called by the access log middleware after every request.
#[async_trait]
pub trait AccessRecorder: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn record_access_log(
        &self,
        config_id: Option<Uuid>,
        method: &str,
        path: &str,
        remote_addr: &str,
        status: u16,
        latency: Duration,
    );
}

/// Implemented by the gateway; held by the service to push a new routing snapshot after any
/// control-plane mutation (§3 invariant 5: persist → cache insert → gateway reload).
pub trait RouteReloader: Send + Sync {
    fn reload_backends(&self, configs: Vec<Arc<BackendConfig>>);
}

/// The live routing table plus narrow back-references into the service.
pub struct Gateway {
    routes: RwLock<Arc<HashMap<Uuid, Arc<BackendConfig>>>>,
    reporter: OnceLock<Arc<dyn HealthReporter>>,
    recorder: OnceLock<Arc<dyn AccessRecorder>>,
}

impl Gateway {
    /// Construct an empty shell. Must be completed with [`Gateway::complete`] before any
    /// health-reporting or access-logging path runs.
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Arc::new(HashMap::new())),
            reporter: OnceLock::new(),
            recorder: OnceLock::new(),
        }
    }

    /// Inject the service-backed reporter/recorder, completing construction.
    pub fn complete(&self, reporter: Arc<dyn HealthReporter>, recorder: Arc<dyn AccessRecorder>) {
        let _ = self.reporter.set(reporter);
        let _ = self.recorder.set(recorder);
    }

    pub fn health_reporter(&self) -> Arc<dyn HealthReporter> {
        self.reporter
            .get()
            .cloned()
            .expect("Gateway::complete must run before health reporting is used")
    }

    pub fn access_recorder(&self) -> Arc<dyn AccessRecorder> {
        self.recorder
            .get()
            .cloned()
            .expect("Gateway::complete must run before access logging is used")
    }

    /// Longest-prefix-match lookup (§4.C). Linear scan: fine at operator-scale config counts.
    pub fn find_matching_route(&self, path: &str) -> Option<Arc<BackendConfig>> {
        let routes = self.routes.read().expect("routes lock poisoned");
        routes
            .values()
            .filter(|cfg| path.starts_with(cfg.path_prefix.as_str()))
            .max_by_key(|cfg| cfg.path_prefix.len())
            .cloned()
    }

    /// Snapshot of every live config, for the health checker's fan-out and the admin `GetAll`.
    pub fn snapshot_configs(&self) -> Vec<Arc<BackendConfig>> {
        let routes = self.routes.read().expect("routes lock poisoned");
        routes.values().cloned().collect()
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<Arc<BackendConfig>> {
        let routes = self.routes.read().expect("routes lock poisoned");
        routes.get(&id).cloned()
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteReloader for Gateway {
    /// Atomically replace the whole routing map. Calling this twice with the same slice
    /// leaves the table observationally unchanged (§8 property 4).
    fn reload_backends(&self, configs: Vec<Arc<BackendConfig>>) {
        let mut map = HashMap::with_capacity(configs.len());
        for cfg in configs {
            map.insert(cfg.id, cfg);
        }
        let mut routes = self.routes.write().expect("routes lock poisoned");
        *routes = Arc::new(map);
    }
}
