//! Load-balancer component (§4.D). The selection state itself lives on [`BackendConfig`]
//! (it must stay addressable per-config, not global — see DESIGN.md); this module is the
//! named seam the rest of the codebase calls through, kept separate to mirror this crate's
//! module layout even though it is now a thin wrapper.
use crate::core::backend::{BackendConfig, BackendEndpoint};

/// Pick the next healthy endpoint for `config`, advancing its round-robin cursor.
/// Returns `None` if no endpoint is currently both healthy and parseable.
pub fn next_healthy_endpoint(config: &BackendConfig) -> Option<BackendEndpoint> {
    config.next_healthy_endpoint()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::CreateBackendDto;

    #[test]
    fn no_healthy_endpoint_returns_none() {
        let cfg = BackendConfig::new(CreateBackendDto {
            path_prefix: "/a/".to_string(),
            target_urls: vec!["http://u1/".to_string()],
            rate_limit: 0,
            auth_type: "none".to_string(),
        })
        .unwrap();
        assert!(next_healthy_endpoint(&cfg).is_none());
    }
}
