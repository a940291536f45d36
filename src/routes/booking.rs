use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::db::wallet::OwnerType;
use crate::error::AppError;
use crate::AppState;

use super::utils::{self, error_response, ApiError};

async fn cancel_booking(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::User)?;

    // a booking owned by someone else is reported as missing
    let owned = state
        .bookings
        .find(booking_id)
        .await
        .map_err(error_response)?
        .filter(|booking| booking.user_id == claims.sub);
    if owned.is_none() {
        tracing::warn!("Cancellation of booking {booking_id} refused for user {}", claims.sub);
        return Err(error_response(AppError::BookingNotFound));
    }

    let booking = state
        .bookings
        .refund_booking(booking_id, Utc::now())
        .await
        .map_err(error_response)?;

    Ok(Json(booking))
}

pub fn booking_routes() -> Router<AppState> {
    Router::new().route("/bookings/:id/cancel", post(cancel_booking))
}
