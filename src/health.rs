//! Health check module
//! Reports the state of the order store and the expiry sweeper

use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::error;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

/// Component state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Disabled,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn disabled() -> Self {
        Self {
            status: ComponentState::Disabled,
            response_time_ms: None,
            details: None,
        }
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    /// `None` when running on the in-memory store.
    db_pool: Option<sqlx::PgPool>,
    sweeper_enabled: bool,
}

impl HealthChecker {
    pub fn new(db_pool: Option<sqlx::PgPool>, sweeper_enabled: bool) -> Self {
        Self {
            db_pool,
            sweeper_enabled,
        }
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();

        let store = match &self.db_pool {
            Some(pool) => {
                match timeout(Duration::from_secs(5), check_database_health(pool)).await {
                    Ok(Ok(response_time)) => {
                        ComponentHealth::up(Some(response_time), Some("postgres".to_string()))
                    }
                    Ok(Err(e)) => {
                        error!("Database health check failed: {}", e);
                        ComponentHealth::down(Some(e.to_string()))
                    }
                    Err(_) => {
                        error!("Database health check timed out");
                        ComponentHealth::down(Some("Timeout".to_string()))
                    }
                }
            }
            None => ComponentHealth::up(None, Some("in-memory".to_string())),
        };
        if store.status == ComponentState::Down {
            health_status.status = HealthState::Unhealthy;
        }
        health_status.checks.insert("store".to_string(), store);

        let sweeper = if self.sweeper_enabled {
            ComponentHealth::up(None, None)
        } else {
            ComponentHealth::disabled()
        };
        health_status
            .checks
            .insert("order_expiry_worker".to_string(), sweeper);

        health_status
    }
}

pub async fn check_database_health(
    pool: &sqlx::PgPool,
) -> Result<u128, crate::database::error::StoreError> {
    let start = Instant::now();
    crate::database::health_check(pool).await?;
    Ok(start.elapsed().as_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_is_healthy() {
        let status = HealthChecker::new(None, false).check_health().await;
        assert!(status.is_healthy());
        assert_eq!(status.checks["store"].status, ComponentState::Up);
        assert_eq!(
            status.checks["order_expiry_worker"].status,
            ComponentState::Disabled
        );
    }

    #[test]
    fn test_component_health_states() {
        let up_health = ComponentHealth::up(Some(100), None);
        assert_eq!(up_health.status, ComponentState::Up);
        assert_eq!(up_health.response_time_ms, Some(100));

        let down_health = ComponentHealth::down(Some("Test error".to_string()));
        assert_eq!(down_health.status, ComponentState::Down);
        assert_eq!(down_health.details, Some("Test error".to_string()));
    }
}
