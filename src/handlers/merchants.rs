use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::entities::merchant::MerchantStatus;
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response, PaginatedResponse};
use crate::handlers::AppState;
use crate::services::merchants::OnboardMerchantInput;

/// Public merchant endpoints: onboarding and storefront reads
pub fn merchant_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(onboard_merchant))
        .route("/:merchant_id/storefront", get(get_storefront))
}

/// Admin endpoints: the approval queue and operational sweeps
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/merchants", get(list_merchants))
        .route("/merchants/:merchant_id/approve", post(approve_merchant))
        .route("/merchants/:merchant_id/suspend", post(suspend_merchant))
        .route("/merchants/:merchant_id/reinstate", post(reinstate_merchant))
        .route("/orders/sweep-unpaid", post(sweep_unpaid_orders))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MerchantListParams {
    /// Filter by lifecycle status ("pending_approval", "active", "suspended")
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

/// Register a merchant into the approval queue
#[utoipa::path(
    post,
    path = "/api/v1/merchants",
    request_body = OnboardMerchantInput,
    responses(
        (status = 201, description = "Merchant created, awaiting approval", body = crate::ApiResponse<crate::entities::merchant::Model>),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse)
    ),
    tag = "Merchants"
)]
pub async fn onboard_merchant(
    State(state): State<AppState>,
    Json(request): Json<OnboardMerchantInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let merchant = state.services.merchants.onboard(request).await?;
    Ok(created_response(merchant))
}

/// Public storefront: merchant profile plus listed products
#[utoipa::path(
    get,
    path = "/api/v1/merchants/{merchant_id}/storefront",
    params(("merchant_id" = Uuid, Path, description = "Merchant id")),
    responses(
        (status = 200, description = "Storefront", body = crate::ApiResponse<crate::services::merchants::Storefront>),
        (status = 422, description = "Merchant not available", body = crate::errors::ErrorResponse)
    ),
    tag = "Merchants"
)]
pub async fn get_storefront(
    State(state): State<AppState>,
    Path(merchant_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let storefront = state.services.merchants.get_storefront(merchant_id).await?;
    Ok(success_response(storefront))
}

/// Admin listing of merchants, filterable by status
async fn list_merchants(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<MerchantListParams>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;

    let status = params
        .status
        .as_deref()
        .map(parse_merchant_status)
        .transpose()?;

    let (merchants, total) = state
        .services
        .merchants
        .list_by_status(status, params.page, params.per_page)
        .await?;

    Ok(success_response(PaginatedResponse::new(
        merchants,
        params.page,
        params.per_page,
        total,
    )))
}

/// Approve a pending merchant
#[utoipa::path(
    post,
    path = "/api/v1/admin/merchants/{merchant_id}/approve",
    params(("merchant_id" = Uuid, Path, description = "Merchant id")),
    responses(
        (status = 200, description = "Merchant approved", body = crate::ApiResponse<crate::entities::merchant::Model>),
        (status = 409, description = "Merchant not pending approval", body = crate::errors::ErrorResponse)
    ),
    security(("gateway_identity" = [])),
    tag = "Admin"
)]
pub async fn approve_merchant(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(merchant_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let merchant = state.services.merchants.approve(merchant_id).await?;
    Ok(success_response(merchant))
}

async fn suspend_merchant(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(merchant_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let merchant = state.services.merchants.suspend(merchant_id).await?;
    Ok(success_response(merchant))
}

async fn reinstate_merchant(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(merchant_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let merchant = state.services.merchants.reinstate(merchant_id).await?;
    Ok(success_response(merchant))
}

/// Cancel PENDING orders older than the configured unpaid timeout.
/// Called by an external scheduler; the service keeps no timer of its own.
async fn sweep_unpaid_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let cancelled = state
        .services
        .orders
        .cancel_stale_unpaid(state.config.unpaid_order_timeout())
        .await?;
    let count = cancelled.len();

    Ok(success_response(serde_json::json!({
        "cancelled": cancelled,
        "count": count,
    })))
}

fn parse_merchant_status(raw: &str) -> Result<MerchantStatus, ServiceError> {
    match raw.to_ascii_lowercase().as_str() {
        "pending_approval" => Ok(MerchantStatus::PendingApproval),
        "active" => Ok(MerchantStatus::Active),
        "suspended" => Ok(MerchantStatus::Suspended),
        _ => Err(ServiceError::ValidationError(format!(
            "unknown merchant status {raw:?}"
        ))),
    }
}
