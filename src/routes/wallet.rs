use axum::{
    extract::State,
    http::HeaderMap,
    response::{sse::Event, IntoResponse, Sse},
    routing::get,
    Json, Router,
};
use futures::StreamExt;

use crate::AppState;

use super::utils::{self, error_response, ApiError};

// returns the caller's wallet, creating an empty one on first access
async fn get_wallet(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::validate_auth_token(&headers, &state.auth)?;

    let wallet = state
        .wallets
        .get_or_create(claims.owner())
        .await
        .map_err(error_response)?;
    tracing::info!("Wallet served for {} {}", claims.role, claims.sub);

    Ok(Json(wallet))
}

// streams every transaction of the caller's wallet, oldest first
async fn list_transactions(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = utils::validate_auth_token(&headers, &state.auth)?;

    let cursor = state
        .wallets
        .transactions(claims.owner())
        .await
        .map_err(error_response)?;

    let stream = futures::stream::iter(cursor).map(|transaction| Event::default().json_data(transaction));

    let sse = Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(2))
            .text("keep-alive-text"),
    );

    Ok(sse)
}

pub fn wallet_routes() -> Router<AppState> {
    Router::new().route("/wallet", get(get_wallet))
}

pub fn wallet_stream_routes() -> Router<AppState> {
    Router::new().route("/wallet/transactions", get(list_transactions))
}
