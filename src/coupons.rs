//! Coupon evaluation and usage accounting.
//!
//! [`evaluate`] is pure: it never touches `used_count`. The optimistic
//! reservation at order creation and the compensating decrement on failed
//! payments go through [`reserve_usage`] / [`compensate_usage`], both of
//! which are single-statement atomic updates safe under concurrent checkouts.

use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::Coupon;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq)]
pub struct CouponQuote {
    pub discount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CouponRejection {
    NotFound,
    NotStarted,
    Expired,
    UsageLimitReached,
    BelowMinimum(Decimal),
    AboveMaximum(Decimal),
    InvalidType(String),
}

impl CouponRejection {
    pub fn message(&self) -> String {
        match self {
            CouponRejection::NotFound => "Invalid or inactive coupon code".to_string(),
            CouponRejection::NotStarted => "This coupon is not active yet".to_string(),
            CouponRejection::Expired => "This coupon has expired".to_string(),
            CouponRejection::UsageLimitReached => {
                "This coupon has reached its usage limit".to_string()
            }
            CouponRejection::BelowMinimum(min) => {
                format!("Minimum order value for this coupon is {min}")
            }
            CouponRejection::AboveMaximum(max) => {
                format!("Maximum order value for this coupon is {max}")
            }
            CouponRejection::InvalidType(kind) => format!("Invalid coupon type '{kind}'"),
        }
    }
}

impl From<CouponRejection> for AppError {
    fn from(r: CouponRejection) -> Self {
        match r {
            CouponRejection::NotFound => AppError::NotFound(r.message()),
            other => AppError::Validation(other.message()),
        }
    }
}

/// Validates a coupon against an order amount and computes its discount.
///
/// Checks short-circuit in a fixed order so the caller always gets the first
/// applicable rejection: existence/active, start date, expiry, usage limit,
/// minimum, maximum, coupon type. Bounds are inclusive. The discount is
/// clamped so the payable amount can never go negative.
pub fn evaluate(
    coupon: Option<&Coupon>,
    order_amount: Decimal,
    now: DateTime<Utc>,
) -> Result<CouponQuote, CouponRejection> {
    let coupon = match coupon {
        Some(c) if c.is_active => c,
        _ => return Err(CouponRejection::NotFound),
    };
    if coupon.start_date.is_some_and(|start| start > now) {
        return Err(CouponRejection::NotStarted);
    }
    if coupon.expiry_date.is_some_and(|expiry| expiry < now) {
        return Err(CouponRejection::Expired);
    }
    if coupon.used_count >= coupon.usage_limit {
        return Err(CouponRejection::UsageLimitReached);
    }
    if order_amount < coupon.min_value {
        return Err(CouponRejection::BelowMinimum(coupon.min_value));
    }
    if order_amount > coupon.max_value {
        return Err(CouponRejection::AboveMaximum(coupon.max_value));
    }

    let raw = match coupon.kind.as_str() {
        "flat" => coupon.amount.min(order_amount),
        "percentage" => (order_amount * coupon.amount / Decimal::from(100)).floor(),
        other => return Err(CouponRejection::InvalidType(other.to_string())),
    };
    let discount = raw.min(order_amount).max(Decimal::ZERO);
    Ok(CouponQuote {
        discount,
        final_amount: order_amount - discount,
    })
}

pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Coupon>> {
    let coupon = sqlx::query_as::<_, Coupon>("SELECT * FROM coupons WHERE code = $1")
        .bind(code.trim().to_uppercase())
        .fetch_optional(pool)
        .await?;
    Ok(coupon)
}

/// Optimistically takes one usage slot. Returns false when the coupon is
/// unknown or already at its limit; the conditional update is what keeps
/// `used_count <= usage_limit` under concurrent checkouts.
pub async fn reserve_usage(pool: &PgPool, code: &str) -> Result<bool> {
    let res = sqlx::query(
        "UPDATE coupons SET used_count = used_count + 1
         WHERE code = $1 AND used_count < usage_limit",
    )
    .bind(code.trim().to_uppercase())
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Undoes the optimistic reservation for a failed online payment, at most
/// once per order. The marker row makes the decrement idempotent when the
/// webhook and the browser validator race on the same transaction.
pub async fn compensate_usage(pool: &PgPool, order_id: &str, code: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let marker = sqlx::query(
        "INSERT INTO coupon_compensations (order_id, coupon_code) VALUES ($1, $2)
         ON CONFLICT (order_id) DO NOTHING",
    )
    .bind(order_id)
    .bind(code)
    .execute(&mut *tx)
    .await?;
    if marker.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }
    sqlx::query(
        "UPDATE coupons SET used_count = GREATEST(used_count - 1, 0) WHERE code = $1",
    )
    .bind(code)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(true)
}

// --- HTTP surface ---

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1))]
    pub code: String,
    pub order_amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ApplyCouponResponse {
    pub success: bool,
    pub coupon_id: Uuid,
    pub discount: Decimal,
    pub final_amount: Decimal,
    pub coupon_details: Coupon,
}

pub async fn apply_coupon(
    State(state): State<AppState>,
    Json(req): Json<ApplyCouponRequest>,
) -> Result<Json<ApplyCouponResponse>> {
    req.validate()?;
    if req.order_amount <= Decimal::ZERO {
        return Err(AppError::Validation("order_amount must be positive".to_string()));
    }
    let Some(coupon) = find_by_code(&state.db, &req.code).await? else {
        return Err(CouponRejection::NotFound.into());
    };
    let quote = evaluate(Some(&coupon), req.order_amount, Utc::now())?;
    Ok(Json(ApplyCouponResponse {
        success: true,
        coupon_id: coupon.id,
        discount: quote.discount,
        final_amount: quote.final_amount,
        coupon_details: coupon,
    }))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponRequest {
    #[validate(length(min = 1))]
    pub code: String,
    #[validate(length(min = 1))]
    pub name: String,
    pub kind: String,
    pub amount: Decimal,
    pub min_value: Decimal,
    pub max_value: Decimal,
    #[validate(range(min = 1))]
    pub usage_limit: i32,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expiry_date: Option<DateTime<Utc>>,
}

pub async fn create_coupon(
    State(state): State<AppState>,
    Json(req): Json<CreateCouponRequest>,
) -> Result<Json<serde_json::Value>> {
    req.validate()?;
    if !matches!(req.kind.as_str(), "flat" | "percentage") {
        return Err(AppError::Validation(format!("invalid coupon type '{}'", req.kind)));
    }
    if req.amount < Decimal::ZERO {
        return Err(AppError::Validation("amount must be non-negative".to_string()));
    }
    if req.min_value >= req.max_value {
        return Err(AppError::Validation(
            "min_value must be strictly below max_value".to_string(),
        ));
    }
    let coupon = sqlx::query_as::<_, Coupon>(
        "INSERT INTO coupons
             (id, code, name, kind, amount, min_value, max_value, usage_limit,
              used_count, is_active, start_date, expiry_date, created_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, TRUE, $9, $10, NOW())
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(req.code.trim().to_uppercase())
    .bind(&req.name)
    .bind(&req.kind)
    .bind(req.amount)
    .bind(req.min_value)
    .bind(req.max_value)
    .bind(req.usage_limit)
    .bind(req.start_date)
    .bind(req.expiry_date)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(json!({ "success": true, "coupon": coupon })))
}

pub async fn get_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Coupon>> {
    find_by_code(&state.db, &code)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("coupon '{}'", code.to_uppercase())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn coupon(kind: &str, amount: Decimal) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            name: "Save".to_string(),
            kind: kind.to_string(),
            amount,
            min_value: dec!(500),
            max_value: dec!(5000),
            usage_limit: 10,
            used_count: 0,
            is_active: true,
            start_date: None,
            expiry_date: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn missing_or_inactive_coupon_is_rejected() {
        let now = Utc::now();
        assert_eq!(evaluate(None, dec!(1000), now), Err(CouponRejection::NotFound));
        let mut c = coupon("flat", dec!(100));
        c.is_active = false;
        assert_eq!(evaluate(Some(&c), dec!(1000), now), Err(CouponRejection::NotFound));
    }

    #[test]
    fn date_window_is_enforced_in_order() {
        let now = Utc::now();
        let mut c = coupon("flat", dec!(100));
        c.start_date = Some(now + Duration::hours(1));
        // Not-started wins even when the coupon is also exhausted.
        c.used_count = c.usage_limit;
        assert_eq!(evaluate(Some(&c), dec!(1000), now), Err(CouponRejection::NotStarted));

        let mut c = coupon("flat", dec!(100));
        c.expiry_date = Some(now - Duration::hours(1));
        assert_eq!(evaluate(Some(&c), dec!(1000), now), Err(CouponRejection::Expired));
    }

    #[test]
    fn usage_limit_is_enforced() {
        let mut c = coupon("flat", dec!(100));
        c.used_count = 10;
        assert_eq!(
            evaluate(Some(&c), dec!(1000), Utc::now()),
            Err(CouponRejection::UsageLimitReached)
        );
    }

    #[test]
    fn order_amount_bounds_are_inclusive() {
        let c = coupon("flat", dec!(100));
        let now = Utc::now();
        assert_eq!(
            evaluate(Some(&c), dec!(499.99), now),
            Err(CouponRejection::BelowMinimum(dec!(500)))
        );
        assert_eq!(
            evaluate(Some(&c), dec!(5000.01), now),
            Err(CouponRejection::AboveMaximum(dec!(5000)))
        );
        assert!(evaluate(Some(&c), dec!(500), now).is_ok());
        assert!(evaluate(Some(&c), dec!(5000), now).is_ok());
    }

    #[test]
    fn flat_coupon_under_minimum_reports_the_minimum() {
        let c = coupon("flat", dec!(100));
        let err = evaluate(Some(&c), dec!(300), Utc::now()).unwrap_err();
        assert_eq!(err, CouponRejection::BelowMinimum(dec!(500)));
        assert!(err.message().contains("500"));
    }

    #[test]
    fn percentage_happy_path() {
        let mut c = coupon("percentage", dec!(10));
        c.min_value = dec!(0.01);
        let q = evaluate(Some(&c), dec!(2000), Utc::now()).unwrap();
        assert_eq!(q.discount, dec!(200));
        assert_eq!(q.final_amount, dec!(1800));
    }

    #[test]
    fn percentage_discount_is_floored() {
        let mut c = coupon("percentage", dec!(7));
        c.min_value = dec!(0.01);
        // 7% of 999 = 69.93, floored to 69.
        let q = evaluate(Some(&c), dec!(999), Utc::now()).unwrap();
        assert_eq!(q.discount, dec!(69));
    }

    #[test]
    fn discount_never_exceeds_order_amount() {
        let now = Utc::now();
        let mut flat = coupon("flat", dec!(10000));
        flat.min_value = dec!(0.01);
        flat.max_value = dec!(100000);
        let q = evaluate(Some(&flat), dec!(700), now).unwrap();
        assert_eq!(q.discount, dec!(700));
        assert_eq!(q.final_amount, dec!(0));

        let mut pct = coupon("percentage", dec!(150));
        pct.min_value = dec!(0.01);
        pct.max_value = dec!(100000);
        let q = evaluate(Some(&pct), dec!(700), now).unwrap();
        assert_eq!(q.discount, dec!(700));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let mut c = coupon("bogo", dec!(10));
        c.min_value = dec!(0.01);
        assert_eq!(
            evaluate(Some(&c), dec!(1000), Utc::now()),
            Err(CouponRejection::InvalidType("bogo".to_string()))
        );
    }
}
