use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{client_ip, with_request_id, AppState};
use crate::error::{AppError, AppResult};
use crate::orders::{CreateOrderRequest, Order, OrderStatus};
use crate::services::order_service::CreateOrderOutcome;

/// Buyer identity. Authentication happens upstream; this service trusts the header.
pub const USER_EMAIL_HEADER: &str = "x-user-email";

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub cancelled: bool,
    pub order: Order,
}

fn buyer_email(headers: &HeaderMap) -> AppResult<String> {
    headers
        .get(USER_EMAIL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_string)
        .ok_or_else(|| with_request_id(headers, AppError::missing_field("X-User-Email")))
}

/// POST /api/orders
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> AppResult<Response> {
    let email = buyer_email(&headers)?;
    let outcome = state
        .orders
        .create_order(&email, request, &client_ip(&headers))
        .await
        .map_err(|e| with_request_id(&headers, e))?;

    info!(order_code = %outcome.order_code(), "order accepted");
    Ok(match outcome {
        CreateOrderOutcome::Confirmed(order) => (StatusCode::CREATED, Json(order)).into_response(),
        CreateOrderOutcome::PaymentRedirect(redirect) => {
            (StatusCode::OK, Json(redirect)).into_response()
        }
    })
}

/// GET /api/orders/{code}
pub async fn get_order(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Order>> {
    state
        .orders
        .get_order(&code)
        .await
        .map(Json)
        .map_err(|e| with_request_id(&headers, e))
}

/// GET /api/orders?email=
///
/// Falls back to the caller's own orders when no email is given.
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrdersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Vec<Order>>> {
    let email = match query.email.filter(|e| !e.trim().is_empty()) {
        Some(email) => email,
        None => buyer_email(&headers)?,
    };
    state
        .orders
        .get_orders_by_email(&email)
        .await
        .map(Json)
        .map_err(|e| with_request_id(&headers, e))
}

/// POST /api/orders/{code}/retry-payment
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let redirect = state
        .orders
        .retry_payment(&code, &client_ip(&headers))
        .await
        .map_err(|e| with_request_id(&headers, e))?;
    Ok(Json(redirect).into_response())
}

/// POST /api/orders/{code}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<CancelResponse>> {
    let outcome = state
        .orders
        .cancel_order(&code)
        .await
        .map_err(|e| with_request_id(&headers, e))?;
    Ok(Json(CancelResponse {
        cancelled: outcome.was_cancelled(),
        order: outcome.into_order(),
    }))
}

/// POST /api/orders/{code}/status
pub async fn advance_status(
    State(state): State<AppState>,
    Path(code): Path<String>,
    headers: HeaderMap,
    Json(request): Json<StatusUpdateRequest>,
) -> AppResult<Json<Order>> {
    state
        .orders
        .advance_status(&code, request.status)
        .await
        .map(Json)
        .map_err(|e| with_request_id(&headers, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_user_header_is_a_validation_error() {
        let err = buyer_email(&HeaderMap::new()).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn user_header_is_trimmed() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_EMAIL_HEADER, " reader@example.com ".parse().unwrap());
        assert_eq!(buyer_email(&headers).unwrap(), "reader@example.com");
    }

    #[test]
    fn status_update_accepts_upper_case_names() {
        let request: StatusUpdateRequest =
            serde_json::from_str(r#"{"status":"SHIPPING"}"#).unwrap();
        assert_eq!(request.status, OrderStatus::Shipping);
    }
}
