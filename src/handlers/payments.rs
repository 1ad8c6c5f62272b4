use axum::{
    extract::{DefaultBodyLimit, Json, Path, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use base64::Engine;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{AuthenticatedUser, Role};
use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response, validate_input};
use crate::handlers::AppState;
use crate::services::orders::Actor;
use crate::services::payments::ProofUpload;

/// Uploads arrive as base64 inside JSON; allow for the ~4/3 expansion on
/// top of the 10 MiB raw ceiling so the service-level gate is the one
/// that answers.
const UPLOAD_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Creates the router for payment endpoints
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/proofs/:order_number", post(upload_proof))
        .route("/:order_id/confirm", post(confirm_payment))
        .route("/:order_id/reject", post(reject_payment))
        .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UploadProofRequest {
    pub file_name: String,
    /// MIME type as reported by the client; verified against the
    /// JPEG/PNG/PDF allow-list
    pub content_type: String,
    /// Base64-encoded file contents
    pub content_base64: String,
    pub transaction_reference: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RejectPaymentRequest {
    #[validate(length(min = 3, message = "a rejection reason is required"))]
    pub reason: String,
}

/// Upload a PayNow transfer proof for an order
#[utoipa::path(
    post,
    path = "/api/v1/payments/proofs/{order_number}",
    params(("order_number" = String, Path, description = "Human-readable order number")),
    request_body = UploadProofRequest,
    responses(
        (status = 201, description = "Proof recorded", body = crate::ApiResponse<crate::entities::payment_proof::Model>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 413, description = "File too large", body = crate::errors::ErrorResponse),
        (status = 415, description = "Unsupported file type", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn upload_proof(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
    Json(request): Json<UploadProofRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(request.content_base64.as_bytes())
        .map_err(|_| {
            ServiceError::ValidationError("content_base64 is not valid base64".to_string())
        })?;

    let proof = state
        .services
        .payments
        .upload_proof(
            &order_number,
            ProofUpload {
                file_name: request.file_name,
                content_type: request.content_type,
                bytes: bytes.into(),
                transaction_reference: request.transaction_reference,
            },
        )
        .await?;

    Ok(created_response(proof))
}

/// Merchant confirmation that the transfer arrived
#[utoipa::path(
    post,
    path = "/api/v1/payments/{order_id}/confirm",
    params(("order_id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Payment confirmed", body = crate::ApiResponse<crate::entities::payment::Model>),
        (status = 403, description = "Not this merchant's order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already confirmed", body = crate::errors::ErrorResponse)
    ),
    security(("gateway_identity" = [])),
    tag = "Payments"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_merchant()?;
    let detail = state.services.orders.get_order(order_id).await?;
    user.acts_for_merchant(detail.order.merchant_id)?;

    let actor = actor_for(&user);
    let payment = state
        .services
        .payments
        .confirm_payment(order_id, &actor)
        .await?;

    Ok(success_response(payment))
}

/// Merchant rejection of a transfer that never arrived or does not match
#[utoipa::path(
    post,
    path = "/api/v1/payments/{order_id}/reject",
    params(("order_id" = Uuid, Path, description = "Order id")),
    request_body = RejectPaymentRequest,
    responses(
        (status = 200, description = "Payment rejected, order cancelled", body = crate::ApiResponse<crate::entities::payment::Model>),
        (status = 403, description = "Not this merchant's order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Already confirmed", body = crate::errors::ErrorResponse)
    ),
    security(("gateway_identity" = [])),
    tag = "Payments"
)]
pub async fn reject_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<RejectPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_merchant()?;
    validate_input(&request)?;
    let detail = state.services.orders.get_order(order_id).await?;
    user.acts_for_merchant(detail.order.merchant_id)?;

    let actor = actor_for(&user);
    let payment = state
        .services
        .payments
        .reject_payment(order_id, &request.reason, &actor)
        .await?;

    Ok(success_response(payment))
}

fn actor_for(user: &AuthenticatedUser) -> Actor {
    match user.role {
        Role::Admin => Actor::Admin(user.id),
        Role::Merchant => Actor::Merchant(user.id),
        Role::Customer => Actor::Customer(user.id),
    }
}
