//! Health reporting.

use serde::{Deserialize, Serialize};

/// Component-level health flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Registry has at least one usable provider.
    pub registry: bool,
    /// Router is constructed (always true once the process is up).
    pub router: bool,
    /// Executor is accepting work.
    pub executor: bool,
}

/// `GET /health` payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `"ok"` or `"degraded"`.
    pub status: String,
    /// Per-component flags.
    pub components: ComponentHealth,
    /// Requests currently executing.
    pub active_requests: usize,
    /// Seconds since startup.
    pub uptime_secs: u64,
}

impl HealthResponse {
    /// Assemble a health report.
    #[must_use]
    pub fn new(registry_healthy: bool, active_requests: usize, uptime_secs: u64) -> Self {
        let components = ComponentHealth {
            registry: registry_healthy,
            router: true,
            executor: true,
        };
        let status = if registry_healthy { "ok" } else { "degraded" };
        Self {
            status: status.to_string(),
            components,
            active_requests,
            uptime_secs,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_registry_is_ok() {
        let health = HealthResponse::new(true, 2, 60);
        assert_eq!(health.status, "ok");
        assert!(health.components.registry);
        assert_eq!(health.active_requests, 2);
    }

    #[test]
    fn unhealthy_registry_degrades() {
        let health = HealthResponse::new(false, 0, 0);
        assert_eq!(health.status, "degraded");
        assert!(!health.components.registry);
        assert!(health.components.router);
    }

    #[test]
    fn wire_shape() {
        let json = serde_json::to_value(HealthResponse::new(true, 0, 5)).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["components"]["registry"], true);
        assert_eq!(json["components"]["executor"], true);
    }
}
