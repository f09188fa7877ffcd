//! Bootstrap configuration (§10.3). Routing configuration itself is not part of this file —
//! it lives in the database and is managed exclusively through the Admin API — so this struct
//! is limited to what's needed before the first database connection exists.
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_url() -> String {
    "sqlite://gatewire.db".to_string()
}

fn default_health_check_interval_secs() -> u64 {
    5
}

fn default_health_check_timeout_secs() -> u64 {
    2
}

fn default_health_check_latency_ceiling_ms() -> u64 {
    500
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// The gateway's bootstrap configuration, loaded once at startup (§10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the combined data-plane + admin listener binds to (§6).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Connection string for the backing store; scheme selects SQLite or PostgreSQL (§10.4).
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Fixed tick between health-check rounds (§4.E).
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Per-probe timeout (§4.E).
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,

    /// Maximum latency for a probe to still count as healthy (§4.E).
    #[serde(default = "default_health_check_latency_ceiling_ms")]
    pub health_check_latency_ceiling_ms: u64,

    /// `json` for production, `pretty` for local development (§10.1).
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// `RUST_LOG`-style level filter, e.g. `info` or `debug` (§10.1).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            database_url: default_database_url(),
            health_check_interval_secs: default_health_check_interval_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            health_check_latency_ceiling_ms: default_health_check_latency_ceiling_ms(),
            log_format: default_log_format(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn health_check_latency_ceiling(&self) -> Duration {
        Duration::from_millis(self.health_check_latency_ceiling_ms)
    }

    pub fn is_json_log_format(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_health_checker_contract() {
        let config = ServerConfig::default();
        assert_eq!(config.health_check_interval(), Duration::from_secs(5));
        assert_eq!(config.health_check_timeout(), Duration::from_secs(2));
        assert_eq!(
            config.health_check_latency_ceiling(),
            Duration::from_millis(500)
        );
        assert!(config.is_json_log_format());
    }
}
