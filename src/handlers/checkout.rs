use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::handlers::common::{created_response, success_response, validate_input};
use crate::handlers::AppState;
use crate::entities::checkout_session::{self, SessionStatus};
use crate::entities::order::DeliveryMethod;
use crate::services::checkout::{
    CompleteCheckoutInput, ContactInfo, CreateSessionInput, DeliveryAddress, SessionLine,
};
use crate::services::delivery::DeliveryQuote;
use crate::ApiResponse;

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:session_id", get(get_session))
        .route("/sessions/:session_id/delivery", put(update_delivery))
        .route("/sessions/:session_id/complete", post(complete_checkout))
        .route("/delivery-quote", get(delivery_quote))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub merchant_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub items: Vec<SessionLine>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub status: SessionStatus,
    pub items: Vec<SessionLine>,
    pub delivery_method: Option<DeliveryMethod>,
    pub delivery_address: Option<DeliveryAddress>,
    pub order_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<checkout_session::Model> for SessionResponse {
    type Error = ServiceError;

    fn try_from(session: checkout_session::Model) -> Result<Self, Self::Error> {
        let items = serde_json::from_value(session.items)?;
        let delivery_address = session
            .delivery_address
            .map(serde_json::from_value)
            .transpose()?;
        Ok(Self {
            id: session.id,
            merchant_id: session.merchant_id,
            status: session.status,
            items,
            delivery_method: session.delivery_method,
            delivery_address,
            order_id: session.order_id,
            expires_at: session.expires_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateDeliveryRequest {
    pub delivery_method: DeliveryMethod,
    pub address: Option<DeliveryAddress>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompleteCheckoutRequest {
    pub contact: ContactInfo,
    pub customer_id: Option<Uuid>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeliveryQuoteParams {
    pub merchant_id: Uuid,
    pub postal_code: String,
    /// Optional cart subtotal, used for free-delivery thresholds
    pub subtotal: Option<Decimal>,
}

/// Start a checkout session from cart contents
#[utoipa::path(
    post,
    path = "/api/v1/checkout/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = crate::ApiResponse<SessionResponse>),
        (status = 400, description = "Invalid items", body = crate::errors::ErrorResponse),
        (status = 422, description = "Merchant or product unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state
        .services
        .checkout
        .create_session(CreateSessionInput {
            merchant_id: request.merchant_id,
            customer_id: request.customer_id,
            items: request.items,
        })
        .await?;

    Ok(created_response(SessionResponse::try_from(session)?))
}

/// Fetch a checkout session
async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state.services.checkout.get_session(session_id).await?;
    Ok(success_response(SessionResponse::try_from(session)?))
}

/// Choose delivery or pickup for a session
#[utoipa::path(
    put,
    path = "/api/v1/checkout/sessions/{session_id}/delivery",
    params(("session_id" = Uuid, Path, description = "Checkout session id")),
    request_body = UpdateDeliveryRequest,
    responses(
        (status = 200, description = "Session updated", body = crate::ApiResponse<SessionResponse>),
        (status = 400, description = "Invalid address", body = crate::errors::ErrorResponse),
        (status = 404, description = "Session unknown or consumed", body = crate::errors::ErrorResponse),
        (status = 410, description = "Session expired", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn update_delivery(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<UpdateDeliveryRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let session = state
        .services
        .checkout
        .update_delivery(session_id, request.delivery_method, request.address)
        .await?;

    Ok(success_response(SessionResponse::try_from(session)?))
}

/// Place the order
#[utoipa::path(
    post,
    path = "/api/v1/checkout/sessions/{session_id}/complete",
    params(("session_id" = Uuid, Path, description = "Checkout session id")),
    request_body = CompleteCheckoutRequest,
    responses(
        (status = 201, description = "Order placed", body = crate::ApiResponse<crate::services::checkout::CompletedOrder>),
        (status = 404, description = "Session unknown or consumed", body = crate::errors::ErrorResponse),
        (status = 410, description = "Session expired", body = crate::errors::ErrorResponse),
        (status = 422, description = "Product or merchant no longer available", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn complete_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<CompleteCheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&request.contact)?;

    let completed = state
        .services
        .checkout
        .complete(
            session_id,
            CompleteCheckoutInput {
                contact: request.contact,
                customer_id: request.customer_id,
                notes: request.notes,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(completed))))
}

/// Quote the delivery fee and estimated time for a destination
#[utoipa::path(
    get,
    path = "/api/v1/checkout/delivery-quote",
    params(DeliveryQuoteParams),
    responses(
        (status = 200, description = "Quote or typed not-deliverable result", body = crate::ApiResponse<DeliveryQuote>),
        (status = 400, description = "Malformed postal code", body = crate::errors::ErrorResponse),
        (status = 422, description = "Merchant unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn delivery_quote(
    State(state): State<AppState>,
    Query(params): Query<DeliveryQuoteParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let quote = state
        .services
        .delivery
        .quote(params.merchant_id, &params.postal_code, params.subtotal)
        .await?;

    Ok(success_response(quote))
}
