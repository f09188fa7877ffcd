use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::core::backend::BackendConfig;

/// Errors surfaced by the storage layer (§7 `StorageError` row).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("backend config {0} not found")]
    NotFound(Uuid),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// One row of §3's `HealthHistory`.
#[derive(Debug, Clone)]
pub struct HealthHistoryRecord {
    pub config_id: Uuid,
    pub is_healthy: bool,
    pub latency_nanos: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Filters accepted by `GetHealthHistory` (§4.A).
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub config_id: Uuid,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// One row of §3's `AccessLog`. `config_id` is `None` for the `NO_MATCH` sentinel (§11); the
/// adapter is responsible for translating that to the literal string column value.
#[derive(Debug, Clone)]
pub struct AccessLogRecord {
    pub config_id: Option<Uuid>,
    pub recorded_at: DateTime<Utc>,
    pub latency_nanos: i64,
    pub method: String,
    pub path: String,
    pub remote_addr: String,
    pub status_code: u16,
}

/// Durable storage port (§4.A). `Create` persists atomically; `GetAll` eager-loads endpoints
/// and excludes soft-deleted rows; `UpdateEndpointHealth` updating zero rows is not an error.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn migrate(&self) -> StorageResult<()>;

    async fn create(&self, config: &BackendConfig) -> StorageResult<()>;

    async fn get_all(&self) -> StorageResult<Vec<BackendConfig>>;

    async fn update_endpoint_health(
        &self,
        config_id: Uuid,
        endpoint_url: &str,
        is_healthy: bool,
    ) -> StorageResult<()>;

    async fn save_health_history(&self, record: HealthHistoryRecord) -> StorageResult<()>;

    async fn get_health_history(
        &self,
        query: HistoryQuery,
    ) -> StorageResult<Vec<HealthHistoryRecord>>;

    async fn create_access_log(&self, log: AccessLogRecord) -> StorageResult<()>;
}
