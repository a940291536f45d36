use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};

use crate::db::wallet::OwnerType;
use crate::error::AppError;

use super::auth::{Claims, TokenVerifier};

pub type ApiError = (StatusCode, Json<Value>);

#[inline]
pub fn validate_auth_token(headers: &HeaderMap, verifier: &TokenVerifier) -> Result<Claims, ApiError> {
    let jwt_header_token = match headers.get("Authorization").map(|token| token.to_str()) {
        Some(Ok(token)) => token,
        _ => {
            return Err(error_response(AppError::Unauthorized));
        }
    };
    //validate our token
    verifier.verify_token(jwt_header_token).map_err(error_response)
}

/// Validates the token and requires the caller to hold `role`.
#[inline]
pub fn authorize(headers: &HeaderMap, verifier: &TokenVerifier, role: OwnerType) -> Result<Claims, ApiError> {
    let claims = validate_auth_token(headers, verifier)?;
    if claims.role != role {
        tracing::warn!("{} {} attempted a {} operation", claims.role, claims.sub, role);
        return Err(error_response(AppError::Forbidden));
    }
    Ok(claims)
}

pub fn status_of(err: &AppError) -> StatusCode {
    match err {
        AppError::InvalidAmount(_)
        | AppError::PastBookingCancellation
        | AppError::SubscriptionNotPending
        | AppError::PaymentIncomplete
        | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        AppError::Forbidden => StatusCode::FORBIDDEN,
        AppError::BookingNotFound
        | AppError::PackageNotFound(_)
        | AppError::DirectoryEntryNotFound { .. }
        | AppError::PlanNotFound
        | AppError::SubscriptionBookingNotFound => StatusCode::NOT_FOUND,
        AppError::SubscriptionExists
        | AppError::PlanConflict
        | AppError::DuplicateReference(_)
        | AppError::InsufficientFunds { .. } => StatusCode::CONFLICT,
        AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
        AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: AppError) -> ApiError {
    let status = status_of(&err);
    let message = if status.is_server_error() {
        tracing::error!("Request failed: {err}");
        match status {
            StatusCode::BAD_GATEWAY => "Payment provider unavailable".to_string(),
            _ => "Internal server error".to_string(),
        }
    } else {
        tracing::debug!("Request rejected: {err}");
        err.to_string()
    };
    (status, Json(json!({ "error": message })))
}
