//! Catalog surface: the product lookup the cart reconciles against, plus
//! basic listing and admin creation.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, Result};
use crate::models::Product;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(p): Query<ListParams>,
) -> Result<Json<PaginatedResponse<Product>>> {
    let page = p.page.unwrap_or(1).max(1);
    let per_page = p.per_page.unwrap_or(20).min(100);
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products
         WHERE status = 'active' AND ($3::TEXT IS NULL OR category = $3)
         ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(per_page as i64)
    .bind(((page - 1) * per_page) as i64)
    .bind(&p.category)
    .fetch_all(&state.db)
    .await?;
    let (total,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM products
         WHERE status = 'active' AND ($1::TEXT IS NULL OR category = $1)",
    )
    .bind(&p.category)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(PaginatedResponse { data: products, total, page }))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Product>> {
    sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("product '{id}'")))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub original_price: Option<Decimal>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub stock: Option<i32>,
    #[serde(default)]
    pub images: Vec<String>,
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>)> {
    req.validate()?;
    if req.price <= Decimal::ZERO {
        return Err(AppError::Validation("price must be positive".to_string()));
    }
    if req
        .original_price
        .is_some_and(|original| original < req.price)
    {
        return Err(AppError::Validation(
            "original_price cannot be below the selling price".to_string(),
        ));
    }
    let sku = format!("SKU-{:08}", rand::random::<u32>());
    let product = sqlx::query_as::<_, Product>(
        "INSERT INTO products
             (id, sku, name, description, price, original_price, category,
              stock, status, images, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9, $10, $10)
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&sku)
    .bind(&req.name)
    .bind(&req.description)
    .bind(req.price)
    .bind(req.original_price)
    .bind(&req.category)
    .bind(req.stock.unwrap_or(0))
    .bind(&req.images)
    .bind(Utc::now())
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(product)))
}
