//! Persistent entities and the embedded document snapshots they carry.
//!
//! Orders freeze item prices and the shipping address at checkout time;
//! cart and wishlist lines are denormalized copies of catalog data that get
//! reconciled against the live product on every read.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub category: Option<String>,
    pub stock: i32,
    pub status: String,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    /// "flat" or "percentage"; anything else is rejected at evaluation time.
    pub kind: String,
    pub amount: Decimal,
    pub min_value: Decimal,
    pub max_value: Decimal,
    pub usage_limit: i32,
    pub used_count: i32,
    pub is_active: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    OnlinePayment,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::OnlinePayment => "online_payment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash_on_delivery" => Some(PaymentMethod::CashOnDelivery),
            "online_payment" => Some(PaymentMethod::OnlinePayment),
            _ => None,
        }
    }
}

/// Frozen copy of a product line as it was priced at order time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub original_price: Option<Decimal>,
    pub quantity: u32,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1))]
    pub full_name: String,
    pub phone: String,
    #[validate(length(min = 1))]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    pub state: String,
    pub pincode: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "India".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub subtotal: Decimal,
    pub coupon_discount: Decimal,
    #[serde(default)]
    pub coupon_code: Option<String>,
    pub online_payment_discount: Decimal,
    pub tax: Decimal,
    pub shipping_charge: Decimal,
    pub total: Decimal,
}

/// Gateway transaction metadata persisted on confirmation, raw response
/// included for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentDetails {
    pub txn_id: String,
    pub gateway_txn_id: Option<String>,
    pub amount: Option<Decimal>,
    pub status: String,
    pub recorded_at: DateTime<Utc>,
    pub raw_response: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_id: String,
    pub invoice_id: String,
    pub user_id: Uuid,
    pub items: Json<Vec<OrderItem>>,
    pub shipping_address: Json<ShippingAddress>,
    pub payment_method: String,
    pub order_summary: Json<OrderSummary>,
    pub status: String,
    pub payment_status: String,
    pub payment_details: Option<Json<PaymentDetails>>,
    pub estimated_delivery: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One denormalized cart or wishlist line, keyed in the owning map by
/// `productId` or `productId_size_color`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub name: String,
    pub price: Decimal,
    #[serde(default)]
    pub original_price: Option<Decimal>,
    pub images: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub quantity: u32,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
