//! HTTP surface of the payment flow: request creation, the browser return
//! redirect, and the two settlement transports (validate + webhook).
//!
//! The validate endpoint (JSON, browser-triggered) and the webhook
//! (form-encoded, server-to-server, possibly re-delivered) differ only in
//! transport; both delegate to [`settlement::settle`].

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::State;
use axum::response::Redirect;
use axum::{Form, Json};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::{orders, payu, settlement};

/// Settlement handlers must answer the gateway promptly or it will retry;
/// a stuck settlement becomes an error rather than a retry storm.
const SETTLEMENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize, Validate)]
pub struct CustomerInfo {
    #[validate(length(min = 1))]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 7))]
    pub phone: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentRequest {
    #[validate(length(min = 1))]
    pub order_id: String,
    #[validate]
    pub customer_info: CustomerInfo,
    #[validate(length(min = 1))]
    pub product_info: String,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    pub success: bool,
    pub order_id: String,
    pub txn_id: String,
    pub amount: Decimal,
    pub payment_url: String,
    pub payu_params: Vec<(String, String)>,
}

/// Builds the signed form the client self-submits to the gateway. The order
/// must already exist as a pending reservation; the amount signed is the
/// stored order total, and the order id rides in `udf1` so both return paths
/// can find it.
pub async fn create_payment_request(
    State(state): State<AppState>,
    Json(req): Json<CreatePaymentRequest>,
) -> Result<Json<CreatePaymentResponse>> {
    req.validate()?;
    let order = orders::find_by_order_id(&state.db, &req.order_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order '{}'", req.order_id)))?;
    if order.payment_method != "online_payment" {
        return Err(AppError::Validation(
            "payment requests are only valid for online-payment orders".to_string(),
        ));
    }
    let amount = order.order_summary.0.total;
    if amount <= Decimal::ZERO {
        return Err(AppError::Payment(format!(
            "order '{}' has a non-positive total",
            order.order_id
        )));
    }

    let txn_id = payu::new_txn_id();
    let gateway_req = payu::PaymentRequest {
        txn_id: txn_id.clone(),
        amount,
        product_info: req.product_info,
        firstname: req.customer_info.firstname,
        email: req.customer_info.email,
        phone: req.customer_info.phone,
        udf1: order.order_id.clone(),
        udf2: order.user_id.to_string(),
        udf3: String::new(),
        udf4: String::new(),
        udf5: String::new(),
    };
    let payu_params = payu::build_payment_form(&state.config.payu, &gateway_req);

    tracing::info!(order_id = %order.order_id, txn_id = %txn_id, %amount, "payment request created");
    Ok(Json(CreatePaymentResponse {
        success: true,
        order_id: order.order_id,
        txn_id,
        amount,
        payment_url: state.config.payu.payment_url(),
        payu_params,
    }))
}

/// Browser bounce-back from the gateway. Translates the opaque POST into a
/// 302 to the matching destination page, forwarding only whitelisted fields.
pub async fn payment_return(
    State(state): State<AppState>,
    Form(raw): Form<HashMap<String, String>>,
) -> Result<Redirect> {
    let status = raw.get("status").map(String::as_str).unwrap_or("");
    let outcome = payu::redirect_outcome(status);
    let params = payu::whitelist_params(&raw);
    let query = serde_urlencoded::to_string(&params)
        .map_err(|e| AppError::Internal(format!("redirect query encoding failed: {e}")))?;
    let target = format!("{}/payment/{outcome}?{query}", state.config.app_base_url);
    tracing::info!(
        txnid = raw.get("txnid").map(String::as_str).unwrap_or(""),
        claimed_status = %status,
        outcome = %outcome,
        "gateway return redirect"
    );
    Ok(Redirect::to(&target))
}

async fn settle_bounded(
    state: &AppState,
    resp: &payu::GatewayResponse,
) -> Result<settlement::SettlementResponse> {
    tokio::time::timeout(SETTLEMENT_TIMEOUT, settlement::settle(state, resp))
        .await
        .map_err(|_| AppError::Internal("settlement timed out".to_string()))?
}

/// Browser-triggered verification of the gateway response (JSON body).
pub async fn validate_payment(
    State(state): State<AppState>,
    Json(resp): Json<payu::GatewayResponse>,
) -> Result<Json<settlement::SettlementResponse>> {
    settle_bounded(&state, &resp).await.map(Json)
}

/// Server-to-server webhook (form body). The gateway may deliver this more
/// than once; `settle` is idempotent, so re-delivery is acknowledged with
/// the same outcome.
pub async fn payment_webhook(
    State(state): State<AppState>,
    Form(resp): Form<payu::GatewayResponse>,
) -> Result<Json<settlement::SettlementResponse>> {
    settle_bounded(&state, &resp).await.map(Json)
}
