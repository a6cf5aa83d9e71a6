//! Settlement of gateway results: the state machine that reconciles an
//! order, its coupon reservation, and the user's cart once PayU reports an
//! outcome.
//!
//! The webhook and the browser-triggered validate endpoint both feed the
//! same [`settle`] entry point, and every mutation is conditioned on the
//! observed row state, so duplicate delivery and webhook/validator races
//! collapse into no-ops instead of double-applies.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use crate::error::{AppError, Result};
use crate::models::{Order, PaymentDetails};
use crate::state::AppState;
use crate::{cart, coupons, notify, orders, payu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Success,
    Failure,
    Pending,
    Other,
}

pub fn classify_status(status: &str) -> GatewayStatus {
    match status.to_ascii_lowercase().as_str() {
        "success" => GatewayStatus::Success,
        "failure" | "failed" | "cancelled" | "cancel" => GatewayStatus::Failure,
        "pending" => GatewayStatus::Pending,
        _ => GatewayStatus::Other,
    }
}

/// The slice of order state the settlement decision depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderState {
    pub status: String,
    pub payment_method: String,
}

/// What [`settle`] will do, decided before any mutation. Kept pure so the
/// race/idempotency matrix is unit-testable without a store.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementPlan {
    /// Verified success against a still-pending order.
    Confirm,
    /// Verified success for an order already past `pending` (confirmed,
    /// shipped, delivered): no cart clear, no event, no mutation. Covers
    /// duplicate delivery and callbacks that arrive after fulfilment.
    AlreadyConfirmed,
    /// Verified success but no order exists (deferred-creation contract):
    /// signal only, the caller creates the order afterwards.
    SuccessWithoutOrder,
    /// Failure-class result for a pending online-payment reservation:
    /// compensate the coupon, then delete the order.
    Cleanup,
    /// Failure-class result with nothing left to clean: no-op success.
    CleanupNoop,
    /// Verified pending: mark order and invoice pending.
    MarkPending,
    /// Verified but unrecognized status: acknowledge without mutation.
    Acknowledge,
    /// Hash mismatch and no failure claimed: reject outright.
    Reject,
    /// Hash mismatch but a failure/cancel is claimed: still run the
    /// identifier-only cleanup so spoofed callbacks cannot leak orphaned
    /// pending orders, then reject.
    RejectWithCleanup,
}

fn cleanup_applies(order: Option<&OrderState>) -> bool {
    order.is_some_and(|o| o.status == "pending" && o.payment_method == "online_payment")
}

pub fn plan(
    verified: bool,
    status: GatewayStatus,
    order: Option<&OrderState>,
) -> SettlementPlan {
    if !verified {
        return if status == GatewayStatus::Failure && cleanup_applies(order) {
            SettlementPlan::RejectWithCleanup
        } else {
            SettlementPlan::Reject
        };
    }
    match status {
        GatewayStatus::Success => match order {
            None => SettlementPlan::SuccessWithoutOrder,
            Some(o) if o.status == "pending" => SettlementPlan::Confirm,
            Some(_) => SettlementPlan::AlreadyConfirmed,
        },
        GatewayStatus::Failure => {
            if cleanup_applies(order) {
                SettlementPlan::Cleanup
            } else {
                SettlementPlan::CleanupNoop
            }
        }
        // A late "pending" must never downgrade an order that has already
        // settled; only a still-pending order gets its invoice refreshed.
        GatewayStatus::Pending => match order {
            Some(o) if o.status == "pending" => SettlementPlan::MarkPending,
            _ => SettlementPlan::Acknowledge,
        },
        GatewayStatus::Other => SettlementPlan::Acknowledge,
    }
}

#[derive(Debug, Serialize)]
pub struct SettlementResponse {
    pub success: bool,
    pub verified: bool,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub message: String,
}

fn payment_details(resp: &payu::GatewayResponse, status: &str) -> PaymentDetails {
    PaymentDetails {
        txn_id: resp.txnid.clone().unwrap_or_default(),
        gateway_txn_id: resp.mihpayid.clone(),
        amount: resp
            .amount
            .as_deref()
            .and_then(|a| a.parse::<Decimal>().ok()),
        status: status.to_string(),
        recorded_at: Utc::now(),
        raw_response: serde_json::to_value(resp).unwrap_or_else(|_| json!({})),
    }
}

/// Compensates the coupon reservation (at most once per order, via the
/// marker row) and deletes the pending reservation. Both steps are
/// idempotent; a coupon failure is logged and never blocks the delete.
async fn cleanup_reservation(state: &AppState, order: &Order) -> Result<bool> {
    if let Some(code) = order.order_summary.0.coupon_code.as_deref() {
        match coupons::compensate_usage(&state.db, &order.order_id, code).await {
            Ok(true) => {
                tracing::info!(order_id = %order.order_id, coupon = %code, "coupon reservation compensated")
            }
            Ok(false) => {
                tracing::debug!(order_id = %order.order_id, coupon = %code, "coupon already compensated")
            }
            Err(e) => {
                tracing::error!(order_id = %order.order_id, coupon = %code, error = %e, "coupon compensation failed")
            }
        }
    }
    let deleted = orders::delete_pending_online(&state.db, &order.order_id).await?;
    if deleted {
        tracing::info!(order_id = %order.order_id, "abandoned online-payment reservation deleted");
    }
    Ok(deleted)
}

/// Verifies the gateway payload and applies the settlement state machine.
/// Shared by the validate endpoint and the webhook; may be invoked any
/// number of times for the same transaction.
pub async fn settle(state: &AppState, resp: &payu::GatewayResponse) -> Result<SettlementResponse> {
    let claimed_status = resp.status.clone().unwrap_or_default();
    let status = classify_status(&claimed_status);
    let order_id = resp.udf1.clone().filter(|s| !s.is_empty());

    let verified = payu::verify_response(&state.config.payu, resp);
    let order = match order_id.as_deref() {
        Some(id) => orders::find_by_order_id(&state.db, id).await?,
        None => None,
    };
    let order_state = order.as_ref().map(|o| OrderState {
        status: o.status.clone(),
        payment_method: o.payment_method.clone(),
    });

    let decided = plan(verified, status, order_state.as_ref());
    if matches!(decided, SettlementPlan::Reject | SettlementPlan::RejectWithCleanup) {
        let computed = payu::response_hash(&state.config.payu, resp);
        tracing::error!(
            txnid = resp.txnid.as_deref().unwrap_or(""),
            claimed_status = %claimed_status,
            received_hash = resp.hash.as_deref().unwrap_or(""),
            computed_hash = %computed,
            "gateway response failed hash verification"
        );
    }

    match decided {
        SettlementPlan::Reject => Err(AppError::Authenticity),
        SettlementPlan::RejectWithCleanup => {
            // Identifier-only fallback: the claimed failure carries no
            // trusted business data, but leaving the reservation behind
            // would leak a phantom pending order.
            if let Some(order) = order.as_ref() {
                if let Err(e) = cleanup_reservation(state, order).await {
                    tracing::error!(order_id = %order.order_id, error = %e, "reservation cleanup after rejected callback failed");
                }
            }
            Err(AppError::Authenticity)
        }
        SettlementPlan::Confirm => {
            let Some(order) = order else {
                return Err(AppError::Internal("confirm plan without an order".to_string()));
            };
            let details = payment_details(resp, &claimed_status);
            let confirmed = orders::mark_confirmed(&state.db, &order.order_id, &details).await?;
            if confirmed {
                if let Err(e) = cart::clear_cart(&state.db, order.user_id).await {
                    tracing::error!(order_id = %order.order_id, error = %e, "cart clear after confirmation failed");
                }
                notify::order_confirmed(state, &order, &details).await;
            }
            Ok(SettlementResponse {
                success: true,
                verified: true,
                status: "confirmed".to_string(),
                order_id: Some(order.order_id),
                message: "Payment verified and order confirmed".to_string(),
            })
        }
        SettlementPlan::AlreadyConfirmed => Ok(SettlementResponse {
            success: true,
            verified: true,
            status: "confirmed".to_string(),
            order_id,
            message: "Order already confirmed".to_string(),
        }),
        SettlementPlan::SuccessWithoutOrder => Ok(SettlementResponse {
            success: true,
            verified: true,
            status: "success".to_string(),
            order_id: None,
            message: "Payment verified; no matching order on record".to_string(),
        }),
        SettlementPlan::Cleanup => {
            let Some(order) = order else {
                return Err(AppError::Internal("cleanup plan without an order".to_string()));
            };
            let order_id = order.order_id.clone();
            cleanup_reservation(state, &order).await?;
            Ok(SettlementResponse {
                success: true,
                verified: true,
                status: "failed".to_string(),
                order_id: Some(order_id),
                message: "Payment failed; reservation removed".to_string(),
            })
        }
        SettlementPlan::CleanupNoop => Ok(SettlementResponse {
            success: true,
            verified: true,
            status: "failed".to_string(),
            order_id,
            message: "Payment failed; nothing to clean up".to_string(),
        }),
        SettlementPlan::MarkPending => {
            let Some(id) = order_id.clone() else {
                return Err(AppError::Internal("pending plan without an order id".to_string()));
            };
            orders::mark_pending(&state.db, &id).await?;
            Ok(SettlementResponse {
                success: true,
                verified: true,
                status: "pending".to_string(),
                order_id,
                message: "Payment pending".to_string(),
            })
        }
        SettlementPlan::Acknowledge => Ok(SettlementResponse {
            success: true,
            verified,
            status: claimed_status,
            order_id,
            message: "Acknowledged".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_online() -> OrderState {
        OrderState {
            status: "pending".to_string(),
            payment_method: "online_payment".to_string(),
        }
    }

    fn confirmed() -> OrderState {
        OrderState {
            status: "confirmed".to_string(),
            payment_method: "online_payment".to_string(),
        }
    }

    fn delivered() -> OrderState {
        OrderState {
            status: "delivered".to_string(),
            payment_method: "online_payment".to_string(),
        }
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify_status("success"), GatewayStatus::Success);
        assert_eq!(classify_status("SUCCESS"), GatewayStatus::Success);
        for s in ["failure", "failed", "cancelled", "cancel"] {
            assert_eq!(classify_status(s), GatewayStatus::Failure);
        }
        assert_eq!(classify_status("pending"), GatewayStatus::Pending);
        assert_eq!(classify_status("in_progress"), GatewayStatus::Other);
    }

    #[test]
    fn verified_success_confirms_pending_order() {
        assert_eq!(
            plan(true, GatewayStatus::Success, Some(&pending_online())),
            SettlementPlan::Confirm
        );
    }

    #[test]
    fn redelivered_success_is_a_noop() {
        assert_eq!(
            plan(true, GatewayStatus::Success, Some(&confirmed())),
            SettlementPlan::AlreadyConfirmed
        );
    }

    #[test]
    fn late_success_after_fulfilment_is_a_noop() {
        // A duplicate webhook may land days later, when the order has
        // moved on to shipped/delivered; it must not regress the status.
        assert_eq!(
            plan(true, GatewayStatus::Success, Some(&delivered())),
            SettlementPlan::AlreadyConfirmed
        );
    }

    #[test]
    fn late_pending_never_downgrades_a_settled_order() {
        assert_eq!(
            plan(true, GatewayStatus::Pending, Some(&confirmed())),
            SettlementPlan::Acknowledge
        );
        assert_eq!(
            plan(true, GatewayStatus::Pending, Some(&delivered())),
            SettlementPlan::Acknowledge
        );
    }

    #[test]
    fn success_without_order_signals_only() {
        assert_eq!(
            plan(true, GatewayStatus::Success, None),
            SettlementPlan::SuccessWithoutOrder
        );
    }

    #[test]
    fn failure_cleans_pending_online_reservation() {
        assert_eq!(
            plan(true, GatewayStatus::Failure, Some(&pending_online())),
            SettlementPlan::Cleanup
        );
    }

    #[test]
    fn failure_is_noop_when_order_gone_or_not_cleanable() {
        // Already deleted by the racing path.
        assert_eq!(plan(true, GatewayStatus::Failure, None), SettlementPlan::CleanupNoop);
        // Never delete a confirmed order.
        assert_eq!(
            plan(true, GatewayStatus::Failure, Some(&confirmed())),
            SettlementPlan::CleanupNoop
        );
        // COD orders are not reservations.
        let cod = OrderState {
            status: "pending".to_string(),
            payment_method: "cash_on_delivery".to_string(),
        };
        assert_eq!(
            plan(true, GatewayStatus::Failure, Some(&cod)),
            SettlementPlan::CleanupNoop
        );
    }

    #[test]
    fn unverified_success_is_rejected_without_cleanup() {
        assert_eq!(
            plan(false, GatewayStatus::Success, Some(&pending_online())),
            SettlementPlan::Reject
        );
    }

    #[test]
    fn unverified_failure_still_cleans_up() {
        assert_eq!(
            plan(false, GatewayStatus::Failure, Some(&pending_online())),
            SettlementPlan::RejectWithCleanup
        );
        // But only when there is actually a pending reservation.
        assert_eq!(plan(false, GatewayStatus::Failure, None), SettlementPlan::Reject);
    }

    #[test]
    fn pending_marks_without_deletion() {
        assert_eq!(
            plan(true, GatewayStatus::Pending, Some(&pending_online())),
            SettlementPlan::MarkPending
        );
        assert_eq!(plan(true, GatewayStatus::Pending, None), SettlementPlan::Acknowledge);
    }

    #[test]
    fn unknown_status_is_acknowledged() {
        assert_eq!(
            plan(true, GatewayStatus::Other, Some(&pending_online())),
            SettlementPlan::Acknowledge
        );
    }
}
