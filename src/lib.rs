//! Sable Storefront - self-hosted commerce service for a jewellery brand.
//!
//! The core of the service is the order/payment/coupon reconciliation
//! workflow: cart pricing, coupon validation, order reservation, the PayU
//! signed-form round-trip, and post-payment settlement (confirmation, cart
//! clearing, coupon compensation, cleanup of abandoned online payments).
//!
//! ## Modules
//! - Pure logic: [`pricing`], [`coupons`] (evaluator), [`payu`] (hashes),
//!   [`settlement`] (decision machine)
//! - Store-backed: [`orders`], [`cart`], [`products`]
//! - Plumbing: [`config`], [`error`], [`state`], [`notify`], [`payments`]

pub mod cart;
pub mod config;
pub mod coupons;
pub mod error;
pub mod models;
pub mod notify;
pub mod orders;
pub mod payments;
pub mod payu;
pub mod pricing;
pub mod products;
pub mod settlement;
pub mod state;
