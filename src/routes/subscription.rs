use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::db::subscription::{NewPlan, SubscriptionBooking};
use crate::db::wallet::OwnerType;
use crate::error::AppError;
use crate::AppState;

use super::utils::{self, error_response, ApiError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscription {
    pub plan_id: Uuid,
    pub domain_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPayment {
    pub domain_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmCheckout {
    pub session_id: String,
}

async fn list_plans(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    utils::validate_auth_token(&headers, &state.auth)?;
    let plans = state.subscriptions.list_plans().await.map_err(error_response)?;
    Ok(Json(plans))
}

async fn create_plan(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(plan): Json<NewPlan>,
) -> Result<impl IntoResponse, ApiError> {
    utils::authorize(&headers, &state.auth, OwnerType::Admin)?;
    let plan = state
        .subscriptions
        .create_plan(plan)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn create_subscription(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(request): Json<CreateSubscription>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::Vendor)?;
    let link = state
        .subscriptions
        .create_booking(claims.sub, request.plan_id, &request.domain_url, Utc::now())
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn list_subscriptions(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::Vendor)?;
    let bookings = state
        .subscriptions
        .list_vendor_subscriptions(claims.sub, Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(bookings))
}

async fn active_subscription(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::Vendor)?;
    let active = state
        .subscriptions
        .get_vendor_active_subscription(claims.sub, Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(active))
}

async fn retry_payment(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(request): Json<RetryPayment>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::Vendor)?;
    owned_booking(&state, booking_id, claims.sub).await?;

    match state
        .subscriptions
        .retry_payment(booking_id, &request.domain_url, Utc::now())
        .await
        .map_err(error_response)?
    {
        Some(link) => Ok(Json(link)),
        None => Err(error_response(AppError::BadRequest(
            "payment can only be retried for a pending subscription".into(),
        ))),
    }
}

async fn cancel_subscription(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::Vendor)?;
    owned_booking(&state, booking_id, claims.sub).await?;

    let booking = state
        .subscriptions
        .cancel_subscription_booking(booking_id, Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

async fn confirm_checkout(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(request): Json<ConfirmCheckout>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::Vendor)?;
    let booking = state
        .subscriptions
        .confirm_checkout(claims.sub, &request.session_id, Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

// another vendor's booking is reported as missing
async fn owned_booking(
    state: &AppState,
    booking_id: Uuid,
    vendor_id: Uuid,
) -> Result<SubscriptionBooking, ApiError> {
    state
        .subscriptions
        .find_booking(booking_id)
        .await
        .map_err(error_response)?
        .filter(|booking| booking.vendor_id == vendor_id)
        .ok_or_else(|| error_response(AppError::SubscriptionBookingNotFound))
}

pub fn subscription_routes() -> Router<AppState> {
    Router::new()
        .route("/plans", get(list_plans).post(create_plan))
        .route("/subscriptions", get(list_subscriptions).post(create_subscription))
        .route("/subscriptions/active", get(active_subscription))
        .route("/subscriptions/confirm", post(confirm_checkout))
        .route("/subscriptions/:id/retry", post(retry_payment))
        .route("/subscriptions/:id/cancel", post(cancel_subscription))
}
