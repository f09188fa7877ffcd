//! Backend Service (§4.B): the authoritative control plane. Owns the runtime cache, mediates
//! every write to the repository, and is the sole caller of the gateway's `ReloadBackends`.
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    core::{
        backend::{BackendConfig, BackendError, CreateBackendDto},
        gateway::{AccessRecorder, HealthReporter, RouteReloader},
    },
    ports::repository::{
        AccessLogRecord, HealthHistoryRecord, HistoryQuery, Repository, StorageError,
        StorageResult,
    },
};

/// Errors surfaced by control-plane operations (§7: `ValidationError` vs `StorageError`).
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] BackendError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct BackendService {
    repository: Arc<dyn Repository>,
    reloader: Arc<dyn RouteReloader>,
    cache: RwLock<HashMap<Uuid, Arc<BackendConfig>>>,
}

impl BackendService {
    pub fn new(repository: Arc<dyn Repository>, reloader: Arc<dyn RouteReloader>) -> Self {
        Self {
            repository,
            reloader,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Load every live config from storage, populate the cache, and push the first snapshot
    /// to the gateway. Must run once, before the listener starts accepting traffic (§4.B).
    pub async fn init(&self) -> StorageResult<()> {
        let configs = self.repository.get_all().await?;
        {
            let mut cache = self.cache.write().expect("cache lock poisoned");
            cache.clear();
            for cfg in configs {
                cache.insert(cfg.id, Arc::new(cfg));
            }
        }
        self.push_reload();
        Ok(())
    }

    /// Create a new backend: validate, persist, insert into cache, then reload — in that order,
    /// and with the cache write lock released before the gateway is touched (§5, §9).
    pub async fn create(&self, dto: CreateBackendDto) -> Result<Arc<BackendConfig>, ServiceError> {
        let config = Arc::new(BackendConfig::new(dto)?);
        self.repository.create(&config).await?;

        {
            let mut cache = self.cache.write().expect("cache lock poisoned");
            cache.insert(config.id, config.clone());
        }
        self.push_reload();

        Ok(config)
    }

    pub fn get_all(&self) -> Vec<Arc<BackendConfig>> {
        self.cache
            .read()
            .expect("cache lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub async fn get_history(
        &self,
        query: HistoryQuery,
    ) -> StorageResult<Vec<HealthHistoryRecord>> {
        self.repository.get_health_history(query).await
    }

    fn push_reload(&self) {
        let snapshot: Vec<Arc<BackendConfig>> = self
            .cache
            .read()
            .expect("cache lock poisoned")
            .values()
            .cloned()
            .collect();
        self.reloader.reload_backends(snapshot);
    }

    fn find_cached(&self, config_id: Uuid) -> Option<Arc<BackendConfig>> {
        self.cache.read().expect("cache lock poisoned").get(&config_id).cloned()
    }
}

#[async_trait]
impl HealthReporter for BackendService {
    /// Always records a history row. Persists the endpoint transition only when the new value
    /// differs from the prior in-memory value (§4.B, §8 property 6); a persistence failure on
    /// that transition write is logged but does not revert the in-memory flip (fail-open).
    async fn set_health_status(
        &self,
        config_id: Uuid,
        endpoint_url: &str,
        is_healthy: bool,
        latency: Duration,
    ) {
        let record = HealthHistoryRecord {
            config_id,
            is_healthy,
            latency_nanos: latency.as_nanos() as i64,
            recorded_at: chrono::Utc::now(),
        };
        if let Err(e) = self.repository.save_health_history(record).await {
            tracing::error!(%config_id, error = %e, "failed to persist health history row");
        }

        let Some(config) = self.find_cached(config_id) else {
            return;
        };
        let prev = config.set_endpoint_health(endpoint_url, is_healthy);
        if prev == Some(is_healthy) {
            return;
        }

        if let Err(e) = self
            .repository
            .update_endpoint_health(config_id, endpoint_url, is_healthy)
            .await
        {
            tracing::error!(
                %config_id,
                endpoint_url,
                error = %e,
                "failed to persist health transition; in-memory state already updated"
            );
        }
    }
}

#[async_trait]
impl AccessRecorder for BackendService {
    async fn record_access_log(
        &self,
        config_id: Option<Uuid>,
        method: &str,
        path: &str,
        remote_addr: &str,
        status: u16,
        latency: Duration,
    ) {
        let record = AccessLogRecord {
            config_id,
            recorded_at: chrono::Utc::now(),
            latency_nanos: latency.as_nanos() as i64,
            method: method.to_string(),
            path: path.to_string(),
            remote_addr: remote_addr.to_string(),
            status_code: status,
        };
        if let Err(e) = self.repository.create_access_log(record).await {
            tracing::error!(error = %e, "failed to persist access log row");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::ports::repository::StorageResult;

    #[derive(Default)]
    struct FakeRepository {
        created: Mutex<Vec<Uuid>>,
        transitions: Mutex<Vec<(Uuid, String, bool)>>,
        history_rows: Mutex<Vec<HealthHistoryRecord>>,
    }

    #[async_trait]
    impl Repository for FakeRepository {
        async fn migrate(&self) -> StorageResult<()> {
            Ok(())
        }

        async fn create(&self, config: &BackendConfig) -> StorageResult<()> {
            self.created.lock().unwrap().push(config.id);
            Ok(())
        }

        async fn get_all(&self) -> StorageResult<Vec<BackendConfig>> {
            Ok(Vec::new())
        }

        async fn update_endpoint_health(
            &self,
            config_id: Uuid,
            endpoint_url: &str,
            is_healthy: bool,
        ) -> StorageResult<()> {
            self.transitions
                .lock()
                .unwrap()
                .push((config_id, endpoint_url.to_string(), is_healthy));
            Ok(())
        }

        async fn save_health_history(&self, record: HealthHistoryRecord) -> StorageResult<()> {
            self.history_rows.lock().unwrap().push(record);
            Ok(())
        }

        async fn get_health_history(
            &self,
            _query: HistoryQuery,
        ) -> StorageResult<Vec<HealthHistoryRecord>> {
            Ok(self.history_rows.lock().unwrap().clone())
        }

        async fn create_access_log(&self, _log: AccessLogRecord) -> StorageResult<()> {
            Ok(())
        }
    }

    struct RecordingReloader {
        calls: Mutex<usize>,
        last_len: Mutex<usize>,
    }

    impl RouteReloader for RecordingReloader {
        fn reload_backends(&self, configs: Vec<Arc<BackendConfig>>) {
            *self.calls.lock().unwrap() += 1;
            *self.last_len.lock().unwrap() = configs.len();
        }
    }

    fn dto(prefix: &str) -> CreateBackendDto {
        CreateBackendDto {
            path_prefix: prefix.to_string(),
            target_urls: vec!["http://u1/".to_string()],
            rate_limit: 0,
            auth_type: "none".to_string(),
        }
    }

    #[tokio::test]
    async fn create_persists_caches_and_reloads() {
        let repo = Arc::new(FakeRepository::default());
        let reloader = Arc::new(RecordingReloader {
            calls: Mutex::new(0),
            last_len: Mutex::new(0),
        });
        let service = BackendService::new(repo.clone(), reloader.clone());

        let created = service.create(dto("/a/")).await.unwrap();

        assert_eq!(repo.created.lock().unwrap().len(), 1);
        assert_eq!(*reloader.calls.lock().unwrap(), 1);
        assert_eq!(*reloader.last_len.lock().unwrap(), 1);
        assert_eq!(service.get_all().len(), 1);
        assert_eq!(service.get_all()[0].id, created.id);
    }

    #[tokio::test]
    async fn set_health_status_records_history_every_time_but_persists_only_on_transition() {
        let repo = Arc::new(FakeRepository::default());
        let reloader = Arc::new(RecordingReloader {
            calls: Mutex::new(0),
            last_len: Mutex::new(0),
        });
        let service = BackendService::new(repo.clone(), reloader);
        let created = service.create(dto("/a/")).await.unwrap();

        service
            .set_health_status(created.id, "http://u1/", true, Duration::from_millis(10))
            .await;
        service
            .set_health_status(created.id, "http://u1/", true, Duration::from_millis(12))
            .await;

        assert_eq!(repo.history_rows.lock().unwrap().len(), 2);
        assert_eq!(repo.transitions.lock().unwrap().len(), 1);
    }
}
