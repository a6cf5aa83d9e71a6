//! Downstream notification events. Delivery mechanics live elsewhere; this
//! module only emits the "send confirmation" signal over NATS, and a
//! publish failure never unwinds the settlement that triggered it.

use serde_json::json;

use crate::models::{Order, PaymentDetails};
use crate::state::AppState;

const ORDER_CONFIRMED_SUBJECT: &str = "orders.confirmed";

/// Emits the confirmation event for a freshly confirmed order. Called at
/// most once per order because `mark_confirmed` only reports the first
/// transition.
pub async fn order_confirmed(state: &AppState, order: &Order, details: &PaymentDetails) {
    let Some(nats) = state.nats.as_ref() else {
        tracing::debug!(order_id = %order.order_id, "no event bus configured, skipping confirmation event");
        return;
    };
    let event = json!({
        "order_id": order.order_id,
        "invoice_id": order.invoice_id,
        "user_id": order.user_id,
        "total": order.order_summary.0.total,
        "txn_id": details.txn_id,
        "admin_notify": state.config.admin_notify_email,
    });
    match nats
        .publish(ORDER_CONFIRMED_SUBJECT, event.to_string().into())
        .await
    {
        Ok(()) => tracing::info!(order_id = %order.order_id, "confirmation event published"),
        Err(e) => {
            tracing::error!(order_id = %order.order_id, error = %e, "failed to publish confirmation event")
        }
    }
}
