use crate::domain::error::CheckoutError;
use axum::{
    Json,
    extract::rejection::{FormRejection, JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// HTTP face of [`CheckoutError`].
pub struct ApiError(pub CheckoutError);

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        Self(err)
    }
}

/// Body extraction failures surface as 400 validation errors.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(CheckoutError::Validation(rejection.body_text()))
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        tracing::debug!("form rejected: {}", rejection.body_text());
        Self(CheckoutError::Validation("malformed form body".into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self.0 {
            CheckoutError::Validation(_) | CheckoutError::InvalidQuantity(_) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                self.0.to_string(),
            ),
            CheckoutError::OrderNotFound(_) => (
                StatusCode::NOT_FOUND,
                "order_not_found",
                "order not found".to_string(),
            ),
            CheckoutError::PaymentNotFound(_) => (
                StatusCode::NOT_FOUND,
                "payment_not_found",
                "payment not found".to_string(),
            ),
            CheckoutError::AlreadyPaid(_) => (
                StatusCode::BAD_REQUEST,
                "already_paid",
                self.0.to_string(),
            ),
            CheckoutError::OrderClosed { .. } => {
                (StatusCode::CONFLICT, "order_closed", self.0.to_string())
            }
            CheckoutError::ExternalIdMissing(_) => (
                StatusCode::CONFLICT,
                "payment_not_started",
                "payment has not been created at the provider yet".to_string(),
            ),
            CheckoutError::Conflict(msg) => {
                tracing::warn!("conflict: {msg}");
                (StatusCode::CONFLICT, "conflict", msg.clone())
            }
            CheckoutError::Provider(err) => {
                tracing::error!("payment provider error: {err}");
                (
                    StatusCode::BAD_GATEWAY,
                    "provider_error",
                    "payment provider unavailable, try again later".to_string(),
                )
            }
            CheckoutError::WebhookSignature(reason) => {
                tracing::warn!("rejected webhook: {reason}");
                (
                    StatusCode::UNAUTHORIZED,
                    "webhook_error",
                    "invalid webhook signature".to_string(),
                )
            }
            CheckoutError::Database(err) => {
                tracing::error!("database error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
            CheckoutError::Serialization(err) => {
                tracing::error!("serialization error: {err}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal error".to_string(),
                )
            }
        };

        let body = serde_json::json!({
            "error_code": error_code,
            "message": message,
        });

        (status, Json(body)).into_response()
    }
}
