use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use std::collections::BTreeMap;
use tracing::info;

use crate::api::{with_request_id, AppState};
use crate::error::AppResult;
use crate::services::order_service::PaymentResult;

/// GET /api/payments/vnpay-return
///
/// The gateway redirects the buyer here with the signed result in the query string.
pub async fn vnpay_return(
    State(state): State<AppState>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
) -> AppResult<Json<PaymentResult>> {
    info!(
        transaction_ref = params.get("vnp_TxnRef").map(String::as_str).unwrap_or(""),
        response_code = params.get("vnp_ResponseCode").map(String::as_str).unwrap_or(""),
        "payment callback received"
    );
    state
        .orders
        .confirm_order(&params)
        .await
        .map(Json)
        .map_err(|e| with_request_id(&headers, e))
}
