//! Server-side cart and wishlist: denormalized line-item maps on the user
//! row, treated as a read-through cache over the live catalog.
//!
//! Every read reconciles the map against current product data: lines whose
//! product vanished are dropped, quantities are clamped to available stock,
//! and frozen display fields are refreshed. A changed map is written back in
//! the same transaction that read it. All mutations take the user row lock,
//! so read-modify-write is atomic under concurrent requests for the same
//! user.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use sqlx::types::Json as SqlJson;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CartLine, Product};
use crate::state::AppState;

pub type LineMap = HashMap<String, CartLine>;

/// Composite key: `productId` alone, or `productId_size_color` when
/// variants are chosen. One entry per distinct combination.
pub fn line_key(product_id: Uuid, size: Option<&str>, color: Option<&str>) -> String {
    match (size, color) {
        (None, None) => product_id.to_string(),
        _ => format!(
            "{}_{}_{}",
            product_id,
            size.unwrap_or_default(),
            color.unwrap_or_default()
        ),
    }
}

/// Staleness repair for one map read. Returns the repaired map and whether
/// anything changed (the caller only writes back on change).
pub fn reconcile(
    mut map: LineMap,
    products: &HashMap<Uuid, Product>,
    clamp_quantity: bool,
) -> (LineMap, bool) {
    let mut changed = false;
    map.retain(|_, line| {
        let keep = products
            .get(&line.product_id)
            .is_some_and(|p| p.status == "active" && (!clamp_quantity || p.stock > 0));
        if !keep {
            changed = true;
        }
        keep
    });
    for line in map.values_mut() {
        let product = &products[&line.product_id];
        if clamp_quantity && line.quantity > product.stock as u32 {
            line.quantity = product.stock as u32;
            changed = true;
        }
        if line.price != product.price
            || line.original_price != product.original_price
            || line.name != product.name
        {
            line.price = product.price;
            line.original_price = product.original_price;
            line.name = product.name.clone();
            line.images = product.images.clone();
            line.category = product.category.clone();
            changed = true;
        }
    }
    (map, changed)
}

/// Applies a quantity change to an existing line, clamped to stock. A line
/// whose product ran out of stock is dropped, mirroring what [`reconcile`]
/// does on the next read.
pub fn set_quantity(map: &mut LineMap, key: &str, quantity: u32, product: &Product) {
    if product.stock <= 0 {
        map.remove(key);
        return;
    }
    if let Some(line) = map.get_mut(key) {
        line.quantity = quantity.min(product.stock as u32);
        line.updated_at = Utc::now();
    }
}

async fn load_products(
    tx: &mut Transaction<'_, Postgres>,
    map: &LineMap,
) -> Result<HashMap<Uuid, Product>> {
    let ids: Vec<Uuid> = map.values().map(|l| l.product_id).collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await?;
    Ok(products.into_iter().map(|p| (p.id, p)).collect())
}

/// Locks the user row and returns the requested map.
async fn lock_map(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    column: &str,
) -> Result<LineMap> {
    let row: Option<(SqlJson<LineMap>,)> = sqlx::query_as(&format!(
        "SELECT {column} FROM users WHERE id = $1 FOR UPDATE"
    ))
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.map(|(m,)| m.0)
        .ok_or_else(|| AppError::NotFound(format!("user '{user_id}'")))
}

async fn store_map(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    column: &str,
    map: &LineMap,
) -> Result<()> {
    sqlx::query(&format!(
        "UPDATE users SET {column} = $2, updated_at = NOW() WHERE id = $1"
    ))
    .bind(user_id)
    .bind(SqlJson(map))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Read-through fetch: reconciles against the live catalog and persists the
/// repaired map when it differs from what was stored.
pub async fn fetch_reconciled(
    pool: &PgPool,
    user_id: Uuid,
    column: &str,
    clamp_quantity: bool,
) -> Result<LineMap> {
    let mut tx = pool.begin().await?;
    let stored = lock_map(&mut tx, user_id, column).await?;
    let products = load_products(&mut tx, &stored).await?;
    let (map, changed) = reconcile(stored, &products, clamp_quantity);
    if changed {
        store_map(&mut tx, user_id, column, &map).await?;
    }
    tx.commit().await?;
    Ok(map)
}

/// Settlement hook: wipes the cart after a confirmed payment. Naturally
/// idempotent.
pub async fn clear_cart(pool: &PgPool, user_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE users SET cart_data = '{}', updated_at = NOW() WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct AddLineRequest {
    pub product_id: Uuid,
    #[serde(default = "one")]
    pub quantity: u32,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub key: String,
    pub quantity: u32,
}

async fn find_product(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> Result<Product> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1 AND status = 'active'")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("product '{id}'")))
}

async fn add_line(
    pool: &PgPool,
    user_id: Uuid,
    column: &str,
    req: AddLineRequest,
    clamp_quantity: bool,
) -> Result<LineMap> {
    if req.quantity == 0 {
        return Err(AppError::Validation("quantity must be at least 1".to_string()));
    }
    let mut tx = pool.begin().await?;
    let mut map = lock_map(&mut tx, user_id, column).await?;
    let product = find_product(&mut tx, req.product_id).await?;
    let key = line_key(req.product_id, req.size.as_deref(), req.color.as_deref());
    let now = Utc::now();

    let desired = map.get(&key).map(|l| l.quantity).unwrap_or(0) + req.quantity;
    let quantity = if clamp_quantity {
        if product.stock == 0 {
            tx.rollback().await?;
            return Err(AppError::Validation(format!("'{}' is out of stock", product.name)));
        }
        desired.min(product.stock as u32)
    } else {
        desired
    };

    let entry = map.entry(key).or_insert_with(|| CartLine {
        product_id: product.id,
        name: product.name.clone(),
        price: product.price,
        original_price: product.original_price,
        images: product.images.clone(),
        category: product.category.clone(),
        quantity: 0,
        size: req.size.clone(),
        color: req.color.clone(),
        added_at: now,
        updated_at: now,
    });
    entry.quantity = quantity;
    entry.updated_at = now;

    store_map(&mut tx, user_id, column, &map).await?;
    tx.commit().await?;
    Ok(map)
}

async fn remove_line(pool: &PgPool, user_id: Uuid, column: &str, key: &str) -> Result<()> {
    // Single-statement per-key delete; no lock round-trip needed.
    let res = sqlx::query(&format!(
        "UPDATE users SET {column} = {column} - $2, updated_at = NOW() WHERE id = $1"
    ))
    .bind(user_id)
    .bind(key)
    .execute(pool)
    .await?;
    if res.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("user '{user_id}'")));
    }
    Ok(())
}

// --- HTTP surface: cart ---

pub async fn get_cart(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<LineMap>> {
    fetch_reconciled(&state.db, user_id, "cart_data", true)
        .await
        .map(Json)
}

pub async fn add_to_cart(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AddLineRequest>,
) -> Result<(StatusCode, Json<LineMap>)> {
    let map = add_line(&state.db, user_id, "cart_data", req, true).await?;
    Ok((StatusCode::CREATED, Json(map)))
}

pub async fn update_cart_quantity(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateQuantityRequest>,
) -> Result<Json<LineMap>> {
    let mut tx = state.db.begin().await?;
    let mut map = lock_map(&mut tx, user_id, "cart_data").await?;
    if !map.contains_key(&req.key) {
        return Err(AppError::NotFound(format!("cart line '{}'", req.key)));
    }
    if req.quantity == 0 {
        map.remove(&req.key);
    } else {
        let product_id = map[&req.key].product_id;
        let product = find_product(&mut tx, product_id).await?;
        set_quantity(&mut map, &req.key, req.quantity, &product);
    }
    store_map(&mut tx, user_id, "cart_data", &map).await?;
    tx.commit().await?;
    Ok(Json(map))
}

pub async fn remove_from_cart(
    State(state): State<AppState>,
    Path((user_id, key)): Path<(Uuid, String)>,
) -> Result<StatusCode> {
    remove_line(&state.db, user_id, "cart_data", &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn clear_cart_handler(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    clear_cart(&state.db, user_id).await?;
    Ok(Json(json!({ "success": true })))
}

// --- HTTP surface: wishlist ---

pub async fn get_wishlist(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<LineMap>> {
    fetch_reconciled(&state.db, user_id, "wishlist_data", false)
        .await
        .map(Json)
}

pub async fn add_to_wishlist(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<AddLineRequest>,
) -> Result<(StatusCode, Json<LineMap>)> {
    let map = add_line(&state.db, user_id, "wishlist_data", req, false).await?;
    Ok((StatusCode::CREATED, Json(map)))
}

pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    Path((user_id, key)): Path<(Uuid, String)>,
) -> Result<StatusCode> {
    remove_line(&state.db, user_id, "wishlist_data", &key).await?;
    Ok(StatusCode::NO_CONTENT)
}
