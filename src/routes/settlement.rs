use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;

use crate::db::wallet::OwnerType;
use crate::services::SettleRequest;
use crate::AppState;

use super::utils::{self, error_response, ApiError};

async fn run_settlement(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::Admin)?;
    tracing::info!("Settlement run triggered by admin {}", claims.sub);

    state
        .settlement
        .run_tick(Utc::now())
        .await
        .map_err(error_response)?;

    Ok(StatusCode::NO_CONTENT)
}

async fn settle_reference(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(request): Json<SettleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::authorize(&headers, &state.auth, OwnerType::Admin)?;
    tracing::info!(
        "Settlement of {} triggered by admin {}",
        request.booking_id,
        claims.sub
    );

    state
        .settlement
        .settle_reference(&request, Utc::now())
        .await
        .map_err(error_response)?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn settlement_routes() -> Router<AppState> {
    Router::new()
        .route("/settlements", post(settle_reference))
        .route("/settlements/run", post(run_settlement))
}
