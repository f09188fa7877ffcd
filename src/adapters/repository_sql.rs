//! SQL-backed `Repository` (§4.A / §10.4). Targets either SQLite (default, zero-ops) or
//! PostgreSQL, selected at connect time by `database_url`'s scheme, through `sqlx::AnyPool` so
//! one query path serves both — no `query!` macro, since there's no single fixed database to
//! check offline metadata against across backends.
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result, WrapErr};
use sqlx::{AnyPool, Row, any::AnyPoolOptions};
use uuid::Uuid;

use crate::{
    core::backend::{BackendConfig, PersistedEndpoint, Protocol},
    ports::repository::{
        AccessLogRecord, HealthHistoryRecord, HistoryQuery, Repository, StorageError,
        StorageResult,
    },
};

fn io_err(e: sqlx::Error) -> StorageError {
    StorageError::Io(e.to_string())
}

pub struct SqlRepository {
    pool: AnyPool,
}

impl SqlRepository {
    pub async fn connect(database_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        // An in-memory SQLite database is private per connection; keep the pool to a single
        // connection so every caller in a test process sees the same data.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            10
        };
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .wrap_err("failed to connect to database")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Repository for SqlRepository {
    async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    async fn create(&self, config: &BackendConfig) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(io_err)?;

        sqlx::query(
            "INSERT INTO backend_configs (id, path_prefix, protocol, rate_limit, auth_type, last_updated, deleted_at) \
             VALUES (?, ?, ?, ?, ?, ?, NULL)",
        )
        .bind(config.id.to_string())
        .bind(&config.path_prefix)
        .bind(config.protocol.to_string())
        .bind(config.rate_limit as i64)
        .bind(&config.auth_type)
        .bind(config.last_updated)
        .execute(&mut *tx)
        .await
        .map_err(io_err)?;

        for endpoint in config.endpoints_snapshot() {
            sqlx::query(
                "INSERT INTO backend_endpoints (config_id, url, is_healthy, deleted_at) VALUES (?, ?, ?, NULL)",
            )
            .bind(config.id.to_string())
            .bind(&endpoint.raw_url)
            .bind(endpoint.is_healthy)
            .execute(&mut *tx)
            .await
            .map_err(io_err)?;
        }

        tx.commit().await.map_err(io_err)?;
        Ok(())
    }

    async fn get_all(&self) -> StorageResult<Vec<BackendConfig>> {
        let config_rows = sqlx::query(
            "SELECT id, path_prefix, protocol, rate_limit, auth_type, last_updated \
             FROM backend_configs WHERE deleted_at IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(io_err)?;

        let mut configs = Vec::with_capacity(config_rows.len());
        for row in config_rows {
            let id_str: String = row.try_get("id").map_err(io_err)?;
            let id = Uuid::parse_str(&id_str)
                .map_err(|e| StorageError::Io(format!("malformed config id {id_str}: {e}")))?;
            let protocol_str: String = row.try_get("protocol").map_err(io_err)?;
            let protocol = Protocol::from_str(&protocol_str)
                .unwrap_or(Protocol::Http);
            let rate_limit: i64 = row.try_get("rate_limit").map_err(io_err)?;
            let auth_type: String = row.try_get("auth_type").map_err(io_err)?;
            let path_prefix: String = row.try_get("path_prefix").map_err(io_err)?;
            let last_updated: DateTime<Utc> = row.try_get("last_updated").map_err(io_err)?;

            let endpoint_rows = sqlx::query(
                "SELECT url, is_healthy FROM backend_endpoints WHERE config_id = ? AND deleted_at IS NULL",
            )
            .bind(&id_str)
            .fetch_all(&self.pool)
            .await
            .map_err(io_err)?;

            let endpoints = endpoint_rows
                .into_iter()
                .map(|r| {
                    Ok::<_, StorageError>(PersistedEndpoint {
                        url: r.try_get("url").map_err(io_err)?,
                        is_healthy: r.try_get("is_healthy").map_err(io_err)?,
                    })
                })
                .collect::<StorageResult<Vec<_>>>()?;

            configs.push(BackendConfig::from_parts(
                id,
                path_prefix,
                protocol,
                rate_limit as u32,
                auth_type,
                last_updated,
                endpoints,
            ));
        }

        Ok(configs)
    }

    async fn update_endpoint_health(
        &self,
        config_id: Uuid,
        endpoint_url: &str,
        is_healthy: bool,
    ) -> StorageResult<()> {
        sqlx::query("UPDATE backend_endpoints SET is_healthy = ? WHERE config_id = ? AND url = ?")
            .bind(is_healthy)
            .bind(config_id.to_string())
            .bind(endpoint_url)
            .execute(&self.pool)
            .await
            .map_err(io_err)?;
        Ok(())
    }

    async fn save_health_history(&self, record: HealthHistoryRecord) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO health_histories (config_id, is_healthy, latency_nanos, recorded_at) VALUES (?, ?, ?, ?)",
        )
        .bind(record.config_id.to_string())
        .bind(record.is_healthy)
        .bind(record.latency_nanos)
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(io_err)?;
        Ok(())
    }

    async fn get_health_history(
        &self,
        query: HistoryQuery,
    ) -> StorageResult<Vec<HealthHistoryRecord>> {
        let mut sql = String::from(
            "SELECT config_id, is_healthy, latency_nanos, recorded_at FROM health_histories WHERE config_id = ?",
        );
        if query.since.is_some() {
            sql.push_str(" AND recorded_at >= ?");
        }
        sql.push_str(" ORDER BY recorded_at DESC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query(&sql).bind(query.config_id.to_string());
        if let Some(since) = query.since {
            q = q.bind(since);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(io_err)?;
        rows.into_iter()
            .map(|r| {
                let config_id_str: String = r.try_get("config_id").map_err(io_err)?;
                let config_id = Uuid::parse_str(&config_id_str)
                    .map_err(|e| StorageError::Io(format!("malformed config id: {e}")))?;
                Ok(HealthHistoryRecord {
                    config_id,
                    is_healthy: r.try_get("is_healthy").map_err(io_err)?,
                    latency_nanos: r.try_get("latency_nanos").map_err(io_err)?,
                    recorded_at: r.try_get("recorded_at").map_err(io_err)?,
                })
            })
            .collect()
    }

    async fn create_access_log(&self, log: AccessLogRecord) -> StorageResult<()> {
        let config_id = log
            .config_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "NO_MATCH".to_string());

        sqlx::query(
            "INSERT INTO access_logs (config_id, recorded_at, latency_nanos, method, path, remote_addr, status_code) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(config_id)
        .bind(log.recorded_at)
        .bind(log.latency_nanos)
        .bind(log.method)
        .bind(log.path)
        .bind(log.remote_addr)
        .bind(log.status_code as i16)
        .execute(&self.pool)
        .await
        .map_err(io_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::CreateBackendDto;

    async fn in_memory_repo() -> SqlRepository {
        let repo = SqlRepository::connect("sqlite::memory:").await.unwrap();
        repo.migrate().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn create_then_get_all_round_trips() {
        let repo = in_memory_repo().await;
        let cfg = BackendConfig::new(CreateBackendDto {
            path_prefix: "/a/".to_string(),
            target_urls: vec!["http://u1/".to_string()],
            rate_limit: 5,
            auth_type: "none".to_string(),
        })
        .unwrap();

        repo.create(&cfg).await.unwrap();

        let all = repo.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, cfg.id);
        assert_eq!(all[0].path_prefix, "/a/");
    }

    #[tokio::test]
    async fn update_endpoint_health_then_reload_reflects_transition() {
        let repo = in_memory_repo().await;
        let cfg = BackendConfig::new(CreateBackendDto {
            path_prefix: "/a/".to_string(),
            target_urls: vec!["http://u1/".to_string()],
            rate_limit: 0,
            auth_type: "none".to_string(),
        })
        .unwrap();
        repo.create(&cfg).await.unwrap();

        repo.update_endpoint_health(cfg.id, "http://u1/", true)
            .await
            .unwrap();

        let all = repo.get_all().await.unwrap();
        assert!(all[0].endpoints_snapshot()[0].is_healthy);
    }

    #[tokio::test]
    async fn history_query_orders_newest_first() {
        let repo = in_memory_repo().await;
        let id = Uuid::new_v4();
        for (healthy, nanos) in [(false, 1), (true, 2), (true, 3)] {
            repo.save_health_history(HealthHistoryRecord {
                config_id: id,
                is_healthy: healthy,
                latency_nanos: nanos,
                recorded_at: Utc::now(),
            })
            .await
            .unwrap();
        }

        let history = repo
            .get_health_history(HistoryQuery {
                config_id: id,
                since: None,
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 3);
    }
}
