use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::str::FromStr;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AuthenticatedUser, Role};
use crate::entities::order::OrderStatus;
use crate::errors::ServiceError;
use crate::handlers::common::{success_response, validate_input, PaginatedResponse};
use crate::handlers::AppState;
use crate::services::orders::Actor;

/// Creates the router for order endpoints
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:order_id", get(get_order))
        .route("/by-number/:order_number", get(get_order_by_number))
        .route("/:order_id/events", get(get_order_events))
        .route("/:order_id/status", post(update_order_status))
        .route("/:order_id/cancel", post(cancel_order))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OrderListParams {
    /// Filter by workflow status (e.g. "pending", "preparing")
    pub status: Option<String>,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    /// Target workflow status, e.g. "preparing", "ready", "completed"
    pub status: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CancelOrderRequest {
    #[validate(length(min = 3, message = "a cancellation reason is required"))]
    pub reason: String,
}

/// Merchant's order list, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(OrderListParams),
    responses(
        (status = 200, description = "Orders for the calling merchant", body = crate::ApiResponse<Vec<crate::entities::order::Model>>),
        (status = 403, description = "Merchant role required", body = crate::errors::ErrorResponse)
    ),
    security(("gateway_identity" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<OrderListParams>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_merchant()?;

    let status = params
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?;

    let (orders, total) = state
        .services
        .orders
        .list_for_merchant(user.id, status, params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        orders,
        params.page,
        params.per_page,
        total,
    )))
}

/// Full order detail: items, payment, contact snapshot
async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state.services.orders.get_order(order_id).await?;
    authorize_order_read(&user, detail.order.merchant_id, detail.order.customer_id)?;
    Ok(success_response(detail))
}

/// Order lookup by its human-readable number (customer receipt page;
/// guests track orders this way, so no identity is required)
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    params(("order_number" = String, Path, description = "Human-readable order number")),
    responses(
        (status = 200, description = "Order detail", body = crate::ApiResponse<crate::services::orders::OrderDetail>),
        (status = 404, description = "Unknown order number", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state.services.orders.get_by_number(&order_number).await?;
    Ok(success_response(detail))
}

/// Audit trail of status transitions, oldest first
async fn get_order_events(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_merchant()?;
    let detail = state.services.orders.get_order(order_id).await?;
    user.acts_for_merchant(detail.order.merchant_id)?;

    let events = state.services.orders.list_events(order_id).await?;
    Ok(success_response(events))
}

/// Merchant-driven workflow transition
#[utoipa::path(
    post,
    path = "/api/v1/orders/{order_id}/status",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Order transitioned", body = crate::ApiResponse<crate::entities::order::Model>),
        (status = 409, description = "Transition not allowed", body = crate::errors::ErrorResponse)
    ),
    security(("gateway_identity" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_merchant()?;
    let detail = state.services.orders.get_order(order_id).await?;
    user.acts_for_merchant(detail.order.merchant_id)?;

    let new_status = parse_status(&request.status)?;
    let order = state
        .services
        .orders
        .transition(order_id, new_status, &actor_for(&user), None)
        .await?;

    Ok(success_response(order))
}

/// Merchant cancellation with a recorded reason
async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_merchant()?;
    validate_input(&request)?;
    let detail = state.services.orders.get_order(order_id).await?;
    user.acts_for_merchant(detail.order.merchant_id)?;

    let order = state
        .services
        .orders
        .cancel(order_id, &actor_for(&user), &request.reason)
        .await?;

    Ok(success_response(order))
}

fn authorize_order_read(
    user: &AuthenticatedUser,
    merchant_id: Uuid,
    customer_id: Option<Uuid>,
) -> Result<(), ServiceError> {
    match user.role {
        Role::Admin => Ok(()),
        Role::Merchant if user.id == merchant_id => Ok(()),
        Role::Customer if customer_id == Some(user.id) => Ok(()),
        _ => Err(ServiceError::Forbidden(
            "not authorised to read this order".to_string(),
        )),
    }
}

fn parse_status(raw: &str) -> Result<OrderStatus, ServiceError> {
    OrderStatus::from_str(raw)
        .map_err(|_| ServiceError::ValidationError(format!("unknown order status {raw:?}")))
}

fn actor_for(user: &AuthenticatedUser) -> Actor {
    match user.role {
        Role::Admin => Actor::Admin(user.id),
        Role::Merchant => Actor::Merchant(user.id),
        Role::Customer => Actor::Customer(user.id),
    }
}
