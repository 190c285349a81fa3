//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use common::{CustomerId, OrderId};
use domain::{Item, Order, Status};
use order_store::{IdempotencyStore, OrderPage, OrderStore, PageRequest};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::service::OrderService;

/// Route tag the create idempotency keys are scoped to.
const CREATE_ROUTE: &str = "POST:/api/v1/orders";

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub service: OrderService<S>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub currency: String,
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemRequest {
    pub sku: String,
    pub quantity: u32,
    pub price_minor: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Handlers --

/// POST /api/v1/orders — create an order.
///
/// Honors the `Idempotency-Key` header: a replay within the TTL returns the
/// originally created order (freshly loaded) with the original status code
/// and performs no side effects.
#[tracing::instrument(skip(state, headers, body))]
pub async fn create<S: OrderStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let Json(req) = body.map_err(bad_json)?;
    let customer_id = Uuid::parse_str(&req.customer_id)
        .map(CustomerId::from_uuid)
        .map_err(|_| ApiError::BadRequest("invalid customer_id".to_string()))?;

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .filter(|k| !k.is_empty())
        .map(str::to_owned);

    if let Some(key) = &idempotency_key {
        if let Some(hit) = state.idempotency.get(key, CREATE_ROUTE).await? {
            let order = state.service.get(hit.order_id).await?;
            let status = StatusCode::from_u16(hit.status_code).unwrap_or(StatusCode::OK);
            return Ok((status, Json(order)));
        }
    }

    let items: Vec<Item> = req
        .items
        .into_iter()
        .map(|item| Item {
            sku: item.sku,
            quantity: item.quantity,
            price_minor: item.price_minor,
        })
        .collect();
    let order = state.service.create(customer_id, &req.currency, items).await?;

    if let Some(key) = &idempotency_key {
        // Saved only after the create committed; a crash in between means the
        // retry re-performs the work, which at-least-once delivery tolerates.
        if let Err(err) = state
            .idempotency
            .save(
                key,
                CREATE_ROUTE,
                customer_id,
                order.id,
                StatusCode::CREATED.as_u16(),
            )
            .await
        {
            tracing::error!(error = %err, "failed to save idempotency key");
        }
    }

    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /api/v1/orders/{id} — load one order.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let id = parse_order_id(&id)?;
    let order = state.service.get(id).await?;

    Ok(Json(order))
}

/// GET /api/v1/orders — cursor-paginated list.
#[tracing::instrument(skip(state))]
pub async fn list<S: OrderStore>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<OrderPage>, ApiError> {
    let page = PageRequest::new(query.limit, query.cursor.as_deref())?;
    let page = state.service.list(page).await?;

    Ok(Json(page))
}

/// PATCH /api/v1/orders/{id} — apply a status transition.
#[tracing::instrument(skip(state, body))]
pub async fn update_status<S: OrderStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_order_id(&id)?;
    let Json(req) = body.map_err(bad_json)?;
    let status: Status = req
        .status
        .parse()
        .map_err(|_| ApiError::BadRequest("unsupported status".to_string()))?;

    state.service.update_status(id, status).await?;

    Ok(Json(serde_json::json!({ "status": status.as_str() })))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    Uuid::parse_str(id)
        .map(OrderId::from_uuid)
        .map_err(|_| ApiError::BadRequest("invalid id".to_string()))
}

/// Strict JSON decoding: unknown fields, syntax errors, and type mismatches
/// are client errors; an oversized body keeps its 413.
fn bad_json(rejection: JsonRejection) -> ApiError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge;
    }
    ApiError::BadRequest(rejection.body_text())
}
