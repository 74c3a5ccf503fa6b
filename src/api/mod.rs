//! HTTP surface. Handlers stay thin: extract, call the order service, map the result.

pub mod orders;
pub mod payments;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use crate::error::AppError;
use crate::health::HealthChecker;
use crate::middleware::error::get_request_id_from_headers;
use crate::services::order_service::OrderService;

const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub health_checker: HealthChecker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/orders",
            post(orders::create_order).get(orders::list_orders),
        )
        .route("/api/orders/{code}", get(orders::get_order))
        .route(
            "/api/orders/{code}/retry-payment",
            post(orders::retry_payment),
        )
        .route("/api/orders/{code}/cancel", post(orders::cancel_order))
        .route("/api/orders/{code}/status", post(orders::advance_status))
        .route("/api/payments/vnpay-return", get(payments::vnpay_return))
        .with_state(state)
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health_checker.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// First hop of `X-Forwarded-For`, then `X-Real-IP`.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(FALLBACK_CLIENT_IP)
        .to_string()
}

/// Attach the caller's request id to an error on its way out.
pub(crate) fn with_request_id(headers: &HeaderMap, err: impl Into<AppError>) -> AppError {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}
