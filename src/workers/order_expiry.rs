use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::orders::OrderError;
use crate::services::order_service::{CancelOutcome, OrderService};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    /// How often the worker wakes up to look for expired gateway orders.
    pub interval: Duration,
    /// Maximum number of expired orders handled per cycle.
    pub batch_size: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

impl SweeperConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.enabled = std::env::var("ORDER_SWEEPER_ENABLED")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(cfg.enabled);
        cfg.interval = Duration::from_secs(
            std::env::var("ORDER_SWEEPER_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.batch_size = std::env::var("ORDER_SWEEPER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|size| *size > 0)
            .unwrap_or(cfg.batch_size);
        cfg
    }
}

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub cancelled: usize,
    /// Resolved by someone else (paid or cancelled) between the scan and the cancel.
    pub skipped: usize,
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Cancels gateway orders whose payment window elapsed and returns their stock.
pub struct OrderExpiryWorker {
    orders: Arc<OrderService>,
    config: SweeperConfig,
}

impl OrderExpiryWorker {
    pub fn new(orders: Arc<OrderService>, config: SweeperConfig) -> Self {
        Self { orders, config }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "order expiry worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("order expiry worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.run_cycle().await {
                        Ok(report) if report.scanned > 0 => info!(
                            scanned = report.scanned,
                            cancelled = report.cancelled,
                            skipped = report.skipped,
                            failed = report.failed,
                            "order expiry sweep finished"
                        ),
                        Ok(_) => debug!("no expired orders"),
                        Err(e) => warn!(error = %e, "order expiry sweep failed"),
                    }
                }
            }
        }

        info!("order expiry worker stopped");
    }

    /// One pass. A failure on one order is logged and counted; the rest of the batch still
    /// runs. Only the initial scan can fail the whole cycle.
    pub async fn run_cycle(&self) -> Result<SweepReport, OrderError> {
        let expired = self.orders.find_expired_orders(self.config.batch_size).await?;
        let mut report = SweepReport {
            scanned: expired.len(),
            ..SweepReport::default()
        };

        for order in expired {
            match self.orders.cancel_order(&order.order_code).await {
                Ok(CancelOutcome::Cancelled(_)) => {
                    report.cancelled += 1;
                    info!(
                        order_code = %order.order_code,
                        expired_at = ?order.expires_at,
                        "expired order cancelled"
                    );
                }
                Ok(CancelOutcome::NoOp(current)) => {
                    report.skipped += 1;
                    debug!(
                        order_code = %current.order_code,
                        status = %current.status,
                        payment_status = %current.payment_status,
                        "expired order already resolved"
                    );
                }
                Err(e @ OrderError::InvalidState { .. }) => {
                    report.skipped += 1;
                    debug!(order_code = %order.order_code, error = %e, "expired order moved on");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        order_code = %order.order_code,
                        error = %e,
                        "failed to cancel expired order"
                    );
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryStore;
    use crate::payments::{VnpayConfig, VnpayGateway};
    use crate::services::clock::SystemClock;
    use crate::services::notification::NotificationService;
    use crate::services::order_service::{OrderServiceConfig, OrderStores};

    fn service() -> Arc<OrderService> {
        let gateway = VnpayGateway::new(VnpayConfig {
            tmn_code: "TESTTMN1".to_string(),
            hash_secret: "SECRET".to_string(),
            ..VnpayConfig::default()
        })
        .unwrap();
        Arc::new(OrderService::new(
            OrderStores::shared(Arc::new(InMemoryStore::new())),
            Arc::new(gateway),
            Arc::new(NotificationService::new()),
            Arc::new(SystemClock),
            OrderServiceConfig::default(),
        ))
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown_signal() {
        let worker = OrderExpiryWorker::new(
            service(),
            SweeperConfig {
                interval: Duration::from_secs(3600),
                ..SweeperConfig::default()
            },
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn empty_store_sweeps_nothing() {
        let worker = OrderExpiryWorker::new(service(), SweeperConfig::default());
        assert_eq!(worker.run_cycle().await.unwrap(), SweepReport::default());
    }

    #[test]
    fn default_config_sweeps_every_five_seconds() {
        let cfg = SweeperConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.interval, Duration::from_secs(5));
        assert_eq!(cfg.batch_size, 100);
    }

    #[test]
    fn report_starts_empty() {
        assert_eq!(
            SweepReport::default(),
            SweepReport {
                scanned: 0,
                cancelled: 0,
                skipped: 0,
                failed: 0
            }
        );
    }
}
