//! Health tracking for the `/health` endpoint.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Subsystem name for the hypervisor connection.
pub const HYPERVISOR: &str = "hypervisor";

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Health report served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub version: String,
    pub subsystems: Vec<SubsystemHealth>,
}

/// Subsystem health status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Tracks the health of named subsystems.
#[derive(Clone, Default)]
pub struct HealthChecker {
    subsystems: Arc<RwLock<Vec<SubsystemHealth>>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subsystem as healthy. Registering twice is a no-op.
    pub async fn register_subsystem(&self, name: &str) {
        let mut subsystems = self.subsystems.write().await;
        if !subsystems.iter().any(|s| s.name == name) {
            subsystems.push(SubsystemHealth {
                name: name.to_string(),
                status: HealthStatus::Healthy,
                message: None,
            });
        }
    }

    /// Update subsystem health status. Unknown names are ignored.
    pub async fn update_subsystem(
        &self,
        name: &str,
        status: HealthStatus,
        message: Option<String>,
    ) {
        let mut subsystems = self.subsystems.write().await;
        if let Some(subsystem) = subsystems.iter_mut().find(|s| s.name == name) {
            subsystem.status = status;
            subsystem.message = message;
        }
    }

    /// Overall report: unhealthy if any subsystem is.
    pub async fn report(&self) -> HealthReport {
        let subsystems = self.subsystems.read().await.clone();

        let status = if subsystems.iter().any(|s| s.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };

        HealthReport { status, version: env!("CARGO_PKG_VERSION").to_string(), subsystems }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unhealthy_subsystem_wins() {
        let checker = HealthChecker::new();
        checker.register_subsystem(HYPERVISOR).await;
        checker.register_subsystem("http").await;
        checker.register_subsystem(HYPERVISOR).await;

        let report = checker.report().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.subsystems.len(), 2);

        checker
            .update_subsystem(HYPERVISOR, HealthStatus::Unhealthy, Some("list failed".to_string()))
            .await;
        assert_eq!(checker.report().await.status, HealthStatus::Unhealthy);

        checker.update_subsystem(HYPERVISOR, HealthStatus::Healthy, None).await;
        assert_eq!(checker.report().await.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_unknown_subsystem_ignored() {
        let checker = HealthChecker::new();
        checker.update_subsystem("ghost", HealthStatus::Unhealthy, None).await;
        let report = checker.report().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.subsystems.is_empty());
    }
}
