//! Sable Storefront - service entry point.

use std::sync::Arc;

use anyhow::Result;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use sqlx::postgres::PgPoolOptions;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sable_storefront::config::AppConfig;
use sable_storefront::state::AppState;
use sable_storefront::{cart, coupons, orders, payments, products};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Fails fast on missing gateway secrets or database URL.
    let config = AppConfig::from_env()?;

    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let nats = match config.nats_url.as_deref() {
        Some(url) => match async_nats::connect(url).await {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, confirmation events disabled");
                None
            }
        },
        None => None,
    };

    let port = config.port;
    let state = AppState {
        db,
        nats,
        config: Arc::new(config),
    };

    let app = Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "healthy", "service": "sable-storefront"})) }),
        )
        .route("/api/v1/products", get(products::list_products).post(products::create_product))
        .route("/api/v1/products/:id", get(products::get_product))
        .route("/api/v1/coupons", post(coupons::create_coupon))
        .route("/api/v1/coupons/apply", post(coupons::apply_coupon))
        .route("/api/v1/coupons/:code", get(coupons::get_coupon))
        .route(
            "/api/v1/users/:user_id/cart",
            get(cart::get_cart)
                .post(cart::add_to_cart)
                .put(cart::update_cart_quantity)
                .delete(cart::clear_cart_handler),
        )
        .route("/api/v1/users/:user_id/cart/:key", delete(cart::remove_from_cart))
        .route(
            "/api/v1/users/:user_id/wishlist",
            get(cart::get_wishlist).post(cart::add_to_wishlist),
        )
        .route("/api/v1/users/:user_id/wishlist/:key", delete(cart::remove_from_wishlist))
        .route("/api/v1/users/:user_id/orders", get(orders::list_user_orders_handler))
        .route("/api/v1/orders", post(orders::create_order_handler))
        .route("/api/v1/orders/:order_id", get(orders::get_order_handler))
        .route("/api/v1/payments/request", post(payments::create_payment_request))
        .route("/api/v1/payments/return", post(payments::payment_return))
        .route("/api/v1/payments/validate", post(payments::validate_payment))
        .route("/api/v1/payments/webhook", post(payments::payment_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("sable-storefront listening on 0.0.0.0:{}", port);
    axum::serve(
        tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?,
        app,
    )
    .await?;
    Ok(())
}
