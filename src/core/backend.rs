//! Backend configuration domain types: the routable unit of the gateway.
//!
//! A [`BackendConfig`] binds a path prefix to one or more [`BackendEndpoint`]s and carries
//! its own round-robin cursor and selection lock (see `next_healthy_endpoint`), so it can live
//! inside a shared routing map without any global state.
use std::{fmt, str::FromStr, sync::Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Errors related to backend configuration validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    #[error("invalid target URL '{0}': {1}")]
    InvalidUrl(String, String),

    #[error("pathPrefix must start with '/', got '{0}'")]
    InvalidPathPrefix(String),

    #[error("at least one targetUrl is required")]
    NoEndpoints,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// The protocol a `BackendConfig` proxies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "WS")]
    Ws,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Ws => write!(f, "WS"),
        }
    }
}

impl FromStr for Protocol {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HTTP" => Ok(Protocol::Http),
            "WS" => Ok(Protocol::Ws),
            other => Err(BackendError::InvalidUrl(
                other.to_string(),
                "protocol must be HTTP or WS".to_string(),
            )),
        }
    }
}

/// A single upstream instance. `isHealthy` starts `false` (invariant 4) and only flips to
/// `true` after a successful probe. The parsed URL is derived, never persisted.
#[derive(Debug, Clone)]
pub struct BackendEndpoint {
    pub raw_url: String,
    pub parsed_url: Option<Url>,
    pub is_healthy: bool,
}

impl BackendEndpoint {
    /// Build a fresh, not-yet-probed endpoint. Parse failures are kept (not rejected) so the
    /// caller can decide whether a strict (`Create`) or lenient (load-from-repo) policy applies.
    pub fn new(raw_url: String) -> Self {
        let parsed_url = Url::parse(&raw_url).ok();
        Self {
            raw_url,
            parsed_url,
            is_healthy: false,
        }
    }

    pub fn is_selectable(&self) -> bool {
        self.is_healthy && self.parsed_url.is_some()
    }
}

/// Identity + routing attributes for one registered backend, plus the load-balancer state
/// (`endpoints` and `current_lb_index`) guarded by `lb_state`.
pub struct BackendConfig {
    pub id: Uuid,
    pub path_prefix: String,
    pub protocol: Protocol,
    pub rate_limit: u32,
    pub auth_type: String,
    pub last_updated: DateTime<Utc>,
    lb_state: Mutex<LoadBalancerState>,
}

struct LoadBalancerState {
    endpoints: Vec<BackendEndpoint>,
    current_lb_index: usize,
}

/// Request shape for creating a new backend (Admin API §4.H).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBackendDto {
    pub path_prefix: String,
    pub target_urls: Vec<String>,
    #[serde(default)]
    pub rate_limit: u32,
    #[serde(default = "default_auth_type")]
    pub auth_type: String,
}

fn default_auth_type() -> String {
    "none".to_string()
}

impl BackendConfig {
    /// Validate and build a new config. Used by `Create`, where a bad URL is a `400`, not a
    /// silently-demoted endpoint (contrast with `from_parts`, used when loading from storage).
    pub fn new(dto: CreateBackendDto) -> BackendResult<Self> {
        if !dto.path_prefix.starts_with('/') {
            return Err(BackendError::InvalidPathPrefix(dto.path_prefix));
        }
        if dto.target_urls.is_empty() {
            return Err(BackendError::NoEndpoints);
        }

        let mut endpoints = Vec::with_capacity(dto.target_urls.len());
        for raw in dto.target_urls {
            let parsed = Url::parse(&raw)
                .map_err(|e| BackendError::InvalidUrl(raw.clone(), e.to_string()))?;
            endpoints.push(BackendEndpoint {
                raw_url: raw,
                parsed_url: Some(parsed),
                is_healthy: false,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            path_prefix: dto.path_prefix,
            protocol: Protocol::Http,
            rate_limit: dto.rate_limit,
            auth_type: dto.auth_type,
            last_updated: Utc::now(),
            lb_state: Mutex::new(LoadBalancerState {
                endpoints,
                current_lb_index: 0,
            }),
        })
    }

    /// Reconstruct a config from persisted rows. Endpoint URLs are re-parsed independently;
    /// one that fails to parse is kept but permanently unhealthy (§11 "URL re-parsing on load").
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        path_prefix: String,
        protocol: Protocol,
        rate_limit: u32,
        auth_type: String,
        last_updated: DateTime<Utc>,
        endpoints: Vec<PersistedEndpoint>,
    ) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|row| {
                let parsed_url = Url::parse(&row.url).ok();
                let is_healthy = parsed_url.is_some() && row.is_healthy;
                BackendEndpoint {
                    raw_url: row.url,
                    parsed_url,
                    is_healthy,
                }
            })
            .collect();

        Self {
            id,
            path_prefix,
            protocol,
            rate_limit,
            auth_type,
            last_updated,
            lb_state: Mutex::new(LoadBalancerState {
                endpoints,
                current_lb_index: 0,
            }),
        }
    }

    /// Round-robin selection restricted to healthy, parseable endpoints (§4.D).
    pub fn next_healthy_endpoint(&self) -> Option<BackendEndpoint> {
        let mut state = self.lb_state.lock().expect("lb_state mutex poisoned");
        let len = state.endpoints.len();
        if len == 0 {
            return None;
        }

        let start = state.current_lb_index % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            if state.endpoints[idx].is_selectable() {
                state.current_lb_index = (idx + 1) % len;
                return Some(state.endpoints[idx].clone());
            }
        }
        None
    }

    /// Snapshot of endpoints for the Admin API's `GetAll`/`list` response.
    pub fn endpoints_snapshot(&self) -> Vec<BackendEndpoint> {
        self.lb_state
            .lock()
            .expect("lb_state mutex poisoned")
            .endpoints
            .clone()
    }

    /// Update one endpoint's in-memory health by raw URL. Returns the previous value, or `None`
    /// if no endpoint with that URL is present (caller may have lost a race with deletion).
    pub fn set_endpoint_health(&self, raw_url: &str, is_healthy: bool) -> Option<bool> {
        let mut state = self.lb_state.lock().expect("lb_state mutex poisoned");
        let endpoint = state.endpoints.iter_mut().find(|e| e.raw_url == raw_url)?;
        let prev = endpoint.is_healthy;
        endpoint.is_healthy = is_healthy;
        Some(prev)
    }
}

/// A raw endpoint row as loaded from the repository, pre-parse.
pub struct PersistedEndpoint {
    pub url: String,
    pub is_healthy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto(prefix: &str, urls: &[&str]) -> CreateBackendDto {
        CreateBackendDto {
            path_prefix: prefix.to_string(),
            target_urls: urls.iter().map(|s| s.to_string()).collect(),
            rate_limit: 0,
            auth_type: "none".to_string(),
        }
    }

    #[test]
    fn new_backend_starts_unhealthy() {
        let cfg = BackendConfig::new(dto("/a/", &["http://u1/"])).unwrap();
        let eps = cfg.endpoints_snapshot();
        assert_eq!(eps.len(), 1);
        assert!(!eps[0].is_healthy);
    }

    #[test]
    fn rejects_missing_leading_slash() {
        let err = BackendConfig::new(dto("a/", &["http://u1/"])).unwrap_err();
        assert!(matches!(err, BackendError::InvalidPathPrefix(_)));
    }

    #[test]
    fn rejects_empty_endpoints() {
        let err = BackendConfig::new(dto("/a/", &[])).unwrap_err();
        assert!(matches!(err, BackendError::NoEndpoints));
    }

    #[test]
    fn rejects_unparsable_url_on_create() {
        let err = BackendConfig::new(dto("/a/", &["not-a-url"])).unwrap_err();
        assert!(matches!(err, BackendError::InvalidUrl(_, _)));
    }

    #[test]
    fn selection_skips_unhealthy_and_round_robins() {
        let cfg = BackendConfig::new(dto("/a/", &["http://u1/", "http://u2/"])).unwrap();
        // Nothing healthy yet.
        assert!(cfg.next_healthy_endpoint().is_none());

        cfg.set_endpoint_health("http://u1/", true);
        cfg.set_endpoint_health("http://u2/", true);

        let selections: Vec<String> = (0..5)
            .map(|_| cfg.next_healthy_endpoint().unwrap().raw_url)
            .collect();
        assert_eq!(
            selections,
            vec!["http://u1/", "http://u2/", "http://u1/", "http://u2/", "http://u1/"]
        );
    }

    #[test]
    fn selection_filters_out_unhealthy_peer() {
        let cfg = BackendConfig::new(dto("/a/", &["http://u1/", "http://u2/"])).unwrap();
        cfg.set_endpoint_health("http://u1/", true);
        // u2 left unhealthy.
        for _ in 0..4 {
            assert_eq!(
                cfg.next_healthy_endpoint().unwrap().raw_url,
                "http://u1/"
            );
        }
    }

    #[test]
    fn load_from_storage_keeps_unparsable_url_but_marks_unhealthy() {
        let cfg = BackendConfig::from_parts(
            Uuid::new_v4(),
            "/a/".to_string(),
            Protocol::Http,
            0,
            "none".to_string(),
            Utc::now(),
            vec![
                PersistedEndpoint {
                    url: "not-a-url".to_string(),
                    is_healthy: true,
                },
                PersistedEndpoint {
                    url: "http://u2/".to_string(),
                    is_healthy: true,
                },
            ],
        );
        let eps = cfg.endpoints_snapshot();
        assert!(!eps[0].is_healthy);
        assert!(eps[0].parsed_url.is_none());
        assert!(eps[1].is_healthy);
    }
}
