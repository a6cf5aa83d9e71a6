//! Order records: creation, lookup, and the status mutations the settlement
//! coordinator drives.
//!
//! Human-readable ids come from a single-row atomic sequence
//! (`UPDATE ... RETURNING`), never from counting existing orders — two
//! concurrent checkouts can never mint the same id. The coupon usage slot is
//! reserved optimistically here and compensated by the settlement path if the
//! online payment later fails.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::{Order, OrderItem, OrderSummary, PaymentDetails, PaymentMethod, ShippingAddress};
use crate::state::AppState;

pub const ORDER_ID_PREFIX: &str = "SAB";

pub fn format_order_id(seq: i64) -> String {
    format!("{ORDER_ID_PREFIX}{seq:06}")
}

pub fn make_invoice_id(order_id: &str, at: DateTime<Utc>) -> String {
    format!("INV-{order_id}-{}", at.timestamp_millis())
}

/// Takes the next value from the order sequence. Atomic: concurrent callers
/// serialize on the row lock and each sees a distinct value.
pub async fn next_order_id(pool: &PgPool) -> Result<String> {
    let (seq,): (i64,) =
        sqlx::query_as("UPDATE order_sequence SET value = value + 1 WHERE id = 1 RETURNING value")
            .fetch_one(pool)
            .await?;
    Ok(format_order_id(seq))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
    /// The client's view of the totals. Required, and checked against the
    /// server-side recomputation before anything is persisted.
    pub order_summary: Option<OrderSummary>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CreateOrderRequest {
    /// Field-level validation; returns the parsed payment method so callers
    /// never re-parse the string.
    pub fn check(&self) -> Result<PaymentMethod> {
        self.validate()?;
        if self.items.is_empty() {
            return Err(AppError::Validation("order must contain at least one item".to_string()));
        }
        if self.items.iter().any(|i| i.quantity == 0) {
            return Err(AppError::Validation("item quantity must be at least 1".to_string()));
        }
        if self.order_summary.is_none() {
            return Err(AppError::Validation("order summary is required".to_string()));
        }
        PaymentMethod::parse(&self.payment_method).ok_or_else(|| {
            AppError::Validation(format!("unknown payment method '{}'", self.payment_method))
        })
    }
}

/// Client-facing projection of a persisted order.
#[derive(Debug, Serialize)]
pub struct OrderProjection {
    pub order_id: String,
    pub created_at: DateTime<Utc>,
    pub estimated_delivery: DateTime<Utc>,
    pub status: String,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: String,
    pub order_summary: OrderSummary,
    pub invoice: InvoiceView,
}

#[derive(Debug, Serialize)]
pub struct InvoiceView {
    pub invoice_id: String,
    pub payment_status: String,
}

impl From<Order> for OrderProjection {
    fn from(o: Order) -> Self {
        OrderProjection {
            order_id: o.order_id,
            created_at: o.created_at,
            estimated_delivery: o.estimated_delivery,
            status: o.status,
            items: o.items.0,
            shipping_address: o.shipping_address.0,
            payment_method: o.payment_method,
            order_summary: o.order_summary.0,
            invoice: InvoiceView {
                invoice_id: o.invoice_id,
                payment_status: o.payment_status,
            },
        }
    }
}

/// The submitted summary must agree with the recomputation on the figures
/// that bind: the grand total and the coupon discount. Display-only lines
/// (tax, savings) are free to drift with rounding.
pub fn summaries_agree(submitted: &OrderSummary, computed: &OrderSummary) -> bool {
    submitted.total.round_dp(2) == computed.total.round_dp(2)
        && submitted.coupon_discount.round_dp(2) == computed.coupon_discount.round_dp(2)
}

pub async fn create_order(state: &AppState, req: CreateOrderRequest) -> Result<Order> {
    let method = req.check()?;
    let Some(submitted) = req.order_summary.as_ref() else {
        return Err(AppError::Validation("order summary is required".to_string()));
    };
    let now = Utc::now();

    // Totals are authoritative server-side: the client names the lines, the
    // coupon and the payment method, and the pricing engine recomputes the
    // summary. A coupon that fails evaluation is priced at zero and not
    // recorded on the order, so it is never reserved or compensated.
    let coupon = match submitted.coupon_code.as_deref() {
        Some(code) => crate::coupons::find_by_code(&state.db, code).await?,
        None => None,
    };
    let priced = crate::pricing::price(&req.items, coupon.as_ref(), method, now);
    let coupon_code = coupon
        .as_ref()
        .filter(|c| crate::coupons::evaluate(Some(c), priced.subtotal, now).is_ok())
        .map(|c| c.code.clone());
    let summary = OrderSummary {
        subtotal: priced.subtotal,
        coupon_discount: priced.coupon_discount,
        coupon_code: coupon_code.clone(),
        online_payment_discount: priced.online_payment_discount,
        tax: priced.tax,
        shipping_charge: priced.shipping_charge,
        total: priced.total,
    };
    if !summaries_agree(submitted, &summary) {
        return Err(AppError::Validation(format!(
            "order summary mismatch: submitted total {}, computed {}",
            submitted.total, summary.total
        )));
    }

    let order_id = next_order_id(&state.db).await?;
    let invoice_id = make_invoice_id(&order_id, now);
    let estimated_delivery = now + Duration::days(7);

    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders
             (id, order_id, invoice_id, user_id, items, shipping_address,
              payment_method, order_summary, status, payment_status,
              estimated_delivery, notes, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', 'pending', $9, $10, $11, $11)
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&order_id)
    .bind(&invoice_id)
    .bind(req.user_id)
    .bind(SqlJson(&req.items))
    .bind(SqlJson(&req.shipping_address))
    .bind(method.as_str())
    .bind(SqlJson(&summary))
    .bind(estimated_delivery)
    .bind(&req.notes)
    .bind(now)
    .fetch_one(&state.db)
    .await?;

    // Optimistic coupon reservation. Losing the slot (or a store hiccup)
    // must not unwind an order that is already persisted.
    if let Some(code) = coupon_code.as_deref() {
        match crate::coupons::reserve_usage(&state.db, code).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(order_id = %order_id, coupon = %code, "coupon usage slot unavailable at order creation")
            }
            Err(e) => {
                tracing::warn!(order_id = %order_id, coupon = %code, error = %e, "coupon reservation failed")
            }
        }
    }

    tracing::info!(order_id = %order.order_id, method = %order.payment_method, "order created");
    Ok(order)
}

pub async fn find_by_order_id(pool: &PgPool, order_id: &str) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE order_id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?;
    Ok(order)
}

/// Confirms a pending order and records the gateway transaction metadata.
/// Returns false when the order is past pending already (idempotent
/// re-apply, or a callback arriving after fulfilment) or does not exist.
pub async fn mark_confirmed(
    pool: &PgPool,
    order_id: &str,
    details: &PaymentDetails,
) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE orders
         SET status = 'confirmed', payment_status = 'paid',
             payment_details = $2, updated_at = NOW()
         WHERE order_id = $1 AND status = 'pending'",
    )
    .bind(order_id)
    .bind(SqlJson(details))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Refreshes a still-pending order's invoice state. The status guard keeps
/// a late gateway "pending" from downgrading an order that has settled.
pub async fn mark_pending(pool: &PgPool, order_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE orders
         SET status = 'pending', payment_status = 'pending', updated_at = NOW()
         WHERE order_id = $1 AND status = 'pending'",
    )
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Removes an abandoned online-payment reservation. Conditioned on the
/// observed state so a webhook/validator race deletes at most once, and a
/// confirmed or COD order is never touched.
pub async fn delete_pending_online(pool: &PgPool, order_id: &str) -> Result<bool> {
    let res = sqlx::query(
        "DELETE FROM orders
         WHERE order_id = $1 AND status = 'pending' AND payment_method = 'online_payment'",
    )
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

// --- HTTP surface ---

pub async fn create_order_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderProjection>)> {
    let order = create_order(&state, req).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

pub async fn get_order_handler(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<OrderProjection>> {
    find_by_order_id(&state.db, &order_id)
        .await?
        .map(|o| Json(o.into()))
        .ok_or_else(|| AppError::NotFound(format!("order '{order_id}'")))
}

pub async fn list_user_orders_handler(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<OrderProjection>>> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT 50",
    )
    .bind(user_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(orders.into_iter().map(OrderProjection::from).collect()))
}
