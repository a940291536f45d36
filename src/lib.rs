//! Wallet ledger and settlement engine for a travel-booking marketplace.

use std::sync::Arc;

use axum::Router;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer,
    validate_request::ValidateRequestHeaderLayer,
};

pub mod checkout;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;

use db::wallet::WalletStore;
use routes::auth::TokenVerifier;
use services::{BookingService, SettlementEngine, SubscriptionService};

const REQUEST_BODY_LIMIT: usize = 16 * 1024;

/// Shared handles for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<TokenVerifier>,
    pub wallets: Arc<dyn WalletStore>,
    pub bookings: Arc<BookingService>,
    pub settlement: Arc<SettlementEngine>,
    pub subscriptions: Arc<SubscriptionService>,
}

pub fn build_router(state: AppState) -> Router {
    let json_routes = Router::new()
        .merge(routes::wallet::wallet_routes())
        .merge(routes::booking::booking_routes())
        .merge(routes::settlement::settlement_routes())
        .merge(routes::subscription::subscription_routes())
        .route_layer(ValidateRequestHeaderLayer::accept("application/json"));
    let stream_routes = routes::wallet::wallet_stream_routes()
        .route_layer(CompressionLayer::new().gzip(true));

    Router::new()
        .nest("/v1", json_routes.merge(stream_routes))
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
        .with_state(state)
}
