use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::BookingStatus;
use crate::services::availability::Unavailable;
use crate::services::payments::PaymentError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("cannot {action} a booking in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: BookingStatus,
    },

    #[error("amounts do not reconcile: {message}")]
    Reconciliation {
        message: String,
        breakdown: serde_json::Value,
    },

    #[error("slot unavailable: {0}")]
    Unavailable(#[from] Unavailable),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment processor error: {0}")]
    Payment(#[from] PaymentError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
            AppError::Reconciliation { .. } => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Payment(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let AppError::Internal(e) = &self {
            tracing::error!(error = ?e, "request failed");
        }

        let details = match &self {
            AppError::Reconciliation { breakdown, .. } => Some(breakdown.clone()),
            AppError::Unavailable(reason) => Some(serde_json::json!({ "reason": reason.code() })),
            AppError::Payment(e) => Some(e.details()),
            _ => None,
        };

        let body = match details {
            Some(details) => serde_json::json!({ "error": self.to_string(), "details": details }),
            None => serde_json::json!({ "error": self.to_string() }),
        };
        (status, axum::Json(body)).into_response()
    }
}
