//! Health check endpoints.
//!
//! `GET /health` is a liveness probe and never touches dependencies.
//! Readiness runs every registered [`ReadinessProbe`] and answers `503` if any
//! of them fails.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Simple liveness endpoint.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// A dependency the service needs before it can take traffic.
pub trait ReadinessProbe: Send + Sync {
    /// Component name reported in the readiness body.
    fn name(&self) -> &'static str;

    /// Check the dependency, returning a short reason on failure.
    fn check(&self) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>>;
}

/// Result of one probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    /// Component name
    pub component: String,
    /// `"up"` or `"down"`
    pub status: String,
    /// Failure reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Readiness response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    /// `"ready"` or `"not_ready"`
    pub status: String,
    /// Per-component results
    pub components: Vec<ComponentStatus>,
}

/// Run all probes and build the readiness response.
///
/// # Endpoint
///
/// ```text
/// GET /ready
/// ```
pub async fn readiness(probes: &[Arc<dyn ReadinessProbe>]) -> (StatusCode, Json<ReadinessReport>) {
    let mut components = Vec::with_capacity(probes.len());
    let mut ready = true;

    for probe in probes {
        let result = probe.check().await;
        if let Err(reason) = &result {
            tracing::warn!(component = probe.name(), reason = %reason, "Readiness probe failed");
            ready = false;
        }
        components.push(ComponentStatus {
            component: probe.name().to_string(),
            status: if result.is_ok() { "up" } else { "down" }.to_string(),
            message: result.err(),
        });
    }

    let (status, label) = if ready {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    };

    (
        status,
        Json(ReadinessReport {
            status: label.to_string(),
            components,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Result<(), String>);

    impl ReadinessProbe for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn check(&self) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send + '_>> {
            let result = self.0.clone();
            Box::pin(async move { result })
        }
    }

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_ready_when_all_probes_pass() {
        let probes: Vec<Arc<dyn ReadinessProbe>> = vec![Arc::new(Fixed(Ok(())))];
        let (status, Json(report)) = readiness(&probes).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, "ready");
        assert_eq!(report.components[0].status, "up");
    }

    #[tokio::test]
    async fn test_not_ready_when_a_probe_fails() {
        let probes: Vec<Arc<dyn ReadinessProbe>> = vec![
            Arc::new(Fixed(Ok(()))),
            Arc::new(Fixed(Err("connection refused".to_string()))),
        ];
        let (status, Json(report)) = readiness(&probes).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.components[1].message.as_deref(), Some("connection refused"));
    }
}
