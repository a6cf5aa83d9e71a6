//! Cart pricing: subtotal, MRP savings, coupon and online-payment discounts,
//! inclusive GST back-calculation, shipping, and grand total.
//!
//! Pure and idempotent: the same lines, coupon and payment method always
//! price to the same `PricedCart`. The coupon discount is recomputed here
//! through the same evaluator the apply endpoint uses, so the two layers
//! cannot drift.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::coupons;
use crate::models::{Coupon, OrderItem, PaymentMethod};

/// 5% off the coupon-adjusted subtotal when paying online.
const ONLINE_PAYMENT_DISCOUNT_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 0);
/// GST rate; prices are displayed inclusive of it, so the tax line is
/// back-calculated and never added onto the total.
const GST_PCT: Decimal = Decimal::from_parts(3, 0, 0, false, 0);
const SHIPPING_FLAT: Decimal = Decimal::from_parts(200, 0, 0, false, 0);
const FREE_SHIPPING_ABOVE: Decimal = Decimal::from_parts(5000, 0, 0, false, 0);
const HUNDRED: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedCart {
    pub subtotal: Decimal,
    pub savings: Decimal,
    pub coupon_discount: Decimal,
    pub online_payment_discount: Decimal,
    pub tax: Decimal,
    pub shipping_charge: Decimal,
    pub total: Decimal,
}

fn round2(v: Decimal) -> Decimal {
    v.round_dp(2)
}

/// Prices a set of frozen lines. A coupon that fails evaluation at this
/// layer contributes a zero discount rather than failing the pricing pass;
/// rejection messaging is the apply endpoint's job.
pub fn price(
    lines: &[OrderItem],
    coupon: Option<&Coupon>,
    payment_method: PaymentMethod,
    now: DateTime<Utc>,
) -> PricedCart {
    let mut subtotal = Decimal::ZERO;
    let mut mrp_total = Decimal::ZERO;
    for line in lines {
        let qty = Decimal::from(line.quantity);
        subtotal += line.price * qty;
        mrp_total += line.original_price.unwrap_or(line.price) * qty;
    }
    let savings = mrp_total - subtotal;

    let coupon_discount = coupons::evaluate(coupon, subtotal, now)
        .map(|q| q.discount)
        .unwrap_or(Decimal::ZERO);

    let after_coupon = subtotal - coupon_discount;
    let online_payment_discount = match payment_method {
        PaymentMethod::OnlinePayment => after_coupon * ONLINE_PAYMENT_DISCOUNT_PCT / HUNDRED,
        PaymentMethod::CashOnDelivery => Decimal::ZERO,
    };

    // Portion of the coupon-adjusted amount attributable to the inclusive
    // GST rate: taxable * r / (1 + r).
    let tax = after_coupon * GST_PCT / (HUNDRED + GST_PCT);

    let shipping_charge = if subtotal > FREE_SHIPPING_ABOVE {
        Decimal::ZERO
    } else {
        SHIPPING_FLAT
    };

    let total = subtotal - coupon_discount - online_payment_discount + shipping_charge;

    PricedCart {
        subtotal: round2(subtotal),
        savings: round2(savings),
        coupon_discount: round2(coupon_discount),
        online_payment_discount: round2(online_payment_discount),
        tax: round2(tax),
        shipping_charge: round2(shipping_charge),
        total: round2(total),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn line(price: Decimal, original: Option<Decimal>, qty: u32) -> OrderItem {
        OrderItem {
            product_id: Uuid::new_v4(),
            name: "Gold ring".to_string(),
            price,
            original_price: original,
            quantity: qty,
            size: None,
            color: None,
        }
    }

    fn pct_coupon(amount: Decimal) -> Coupon {
        Coupon {
            id: Uuid::new_v4(),
            code: "SAVE".to_string(),
            name: "Save".to_string(),
            kind: "percentage".to_string(),
            amount,
            min_value: dec!(1),
            max_value: dec!(100000),
            usage_limit: 100,
            used_count: 0,
            is_active: true,
            start_date: None,
            expiry_date: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn subtotal_and_savings() {
        let lines = vec![
            line(dec!(1200), Some(dec!(1500)), 2),
            line(dec!(800), None, 1),
        ];
        let p = price(&lines, None, PaymentMethod::CashOnDelivery, Utc::now());
        assert_eq!(p.subtotal, dec!(3200));
        assert_eq!(p.savings, dec!(600));
        assert_eq!(p.coupon_discount, dec!(0));
        assert_eq!(p.shipping_charge, dec!(200));
        assert_eq!(p.total, dec!(3400));
    }

    #[test]
    fn online_payment_discount_stacks_after_coupon() {
        // Subtotal 10000, 10% coupon -> 1000, online discount 5% of 9000 = 450,
        // free shipping above 5000.
        let lines = vec![line(dec!(2500), None, 4)];
        let coupon = pct_coupon(dec!(10));
        let p = price(&lines, Some(&coupon), PaymentMethod::OnlinePayment, Utc::now());
        assert_eq!(p.coupon_discount, dec!(1000));
        assert_eq!(p.online_payment_discount, dec!(450));
        assert_eq!(p.shipping_charge, dec!(0));
        assert_eq!(p.total, dec!(8550));
    }

    #[test]
    fn cod_gets_no_online_discount() {
        let lines = vec![line(dec!(2500), None, 4)];
        let coupon = pct_coupon(dec!(10));
        let p = price(&lines, Some(&coupon), PaymentMethod::CashOnDelivery, Utc::now());
        assert_eq!(p.online_payment_discount, dec!(0));
        assert_eq!(p.total, dec!(9000));
    }

    #[test]
    fn gst_is_back_calculated_not_added() {
        let lines = vec![line(dec!(1030), None, 1)];
        let p = price(&lines, None, PaymentMethod::CashOnDelivery, Utc::now());
        // 1030 * 0.03 / 1.03 = 30
        assert_eq!(p.tax, dec!(30.00));
        // Tax is informational; the total only adds shipping.
        assert_eq!(p.total, dec!(1230));
    }

    #[test]
    fn shipping_is_free_strictly_above_threshold() {
        let at = price(&[line(dec!(5000), None, 1)], None, PaymentMethod::CashOnDelivery, Utc::now());
        assert_eq!(at.shipping_charge, dec!(200));
        let above = price(&[line(dec!(5000.01), None, 1)], None, PaymentMethod::CashOnDelivery, Utc::now());
        assert_eq!(above.shipping_charge, dec!(0));
    }

    #[test]
    fn invalid_coupon_prices_as_zero_discount() {
        let lines = vec![line(dec!(1000), None, 1)];
        let mut coupon = pct_coupon(dec!(10));
        coupon.is_active = false;
        let p = price(&lines, Some(&coupon), PaymentMethod::CashOnDelivery, Utc::now());
        assert_eq!(p.coupon_discount, dec!(0));
    }

    #[test]
    fn pricing_is_idempotent() {
        let lines = vec![line(dec!(2500), Some(dec!(3000)), 4)];
        let coupon = pct_coupon(dec!(10));
        let now = Utc::now();
        let a = price(&lines, Some(&coupon), PaymentMethod::OnlinePayment, now);
        let b = price(&lines, Some(&coupon), PaymentMethod::OnlinePayment, now);
        assert_eq!(a, b);
    }

    #[test]
    fn outputs_are_rounded_to_two_places() {
        let lines = vec![line(dec!(333.335), None, 1)];
        let p = price(&lines, None, PaymentMethod::OnlinePayment, Utc::now());
        assert!(p.online_payment_discount.scale() <= 2);
        assert!(p.tax.scale() <= 2);
        assert!(p.total.scale() <= 2);
    }
}
