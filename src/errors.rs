use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Standard error payload returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Conflict",
    "kind": "already_confirmed",
    "message": "Payment for order KC-20250301-A41F2C has already been confirmed",
    "timestamp": "2025-03-01T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error kind for client dispatch
    #[schema(example = "already_confirmed")]
    pub kind: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Merchant unavailable: {0}")]
    InvalidMerchant(String),

    #[error("Product unavailable: {0}")]
    ProductUnavailable(String),

    #[error("Product no longer available: {0}")]
    ProductNoLongerAvailable(String),

    #[error("Invalid delivery address: {0}")]
    InvalidAddress(String),

    #[error("Checkout session not found: {0}")]
    SessionNotFound(String),

    #[error("Checkout session expired: {0}")]
    SessionExpired(String),

    #[error("File too large: {0}")]
    FileTooLarge(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Payment already confirmed: {0}")]
    AlreadyConfirmed(String),

    #[error("Cart is bound to another merchant: {0}")]
    MerchantMismatch(String),

    #[error("Minimum order not met: {0}")]
    MinimumOrderNotMet(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) | Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidAddress(_) => StatusCode::BAD_REQUEST,
            Self::InvalidMerchant(_)
            | Self::ProductUnavailable(_)
            | Self::ProductNoLongerAvailable(_)
            | Self::MinimumOrderNotMet(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::SessionExpired(_) => StatusCode::GONE,
            Self::FileTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::AlreadyConfirmed(_) | Self::MerchantMismatch(_) | Self::InvalidTransition(_) => {
                StatusCode::CONFLICT
            }
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable kind, stable across releases. Clients branch on this,
    /// never on the message text.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidMerchant(_) => "invalid_merchant",
            Self::ProductUnavailable(_) => "product_unavailable",
            Self::ProductNoLongerAvailable(_) => "product_no_longer_available",
            Self::InvalidAddress(_) => "invalid_address",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionExpired(_) => "session_expired",
            Self::FileTooLarge(_) => "file_too_large",
            Self::UnsupportedFileType(_) => "unsupported_file_type",
            Self::AlreadyConfirmed(_) => "already_confirmed",
            Self::MerchantMismatch(_) => "merchant_mismatch",
            Self::MinimumOrderNotMet(_) => "minimum_order_not_met",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::ExternalServiceError(_) => "external_service_error",
            Self::SerializationError(_) => "serialization_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Message suitable for HTTP responses. Internal errors return generic
    /// text so implementation details never leak to clients; validation
    /// errors carry enough detail to correct the input.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::ExternalServiceError(_) => "Upstream service unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// True for failures the client may retry verbatim (transient, not
    /// caused by the request contents).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_) | Self::InternalError(_) | Self::ExternalServiceError(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            kind: self.kind().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
