use std::process;
use std::sync::Arc;

use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt::{writer::BoxMakeWriter, Layer}, layer::SubscriberExt, EnvFilter, Registry};

use trip_ledger::checkout::StripeCheckout;
use trip_ledger::config::AppConfig;
use trip_ledger::db::booking::PgBookingStore;
use trip_ledger::db::subscription::{PgSubscriptionBookingStore, PgSubscriptionPlanStore};
use trip_ledger::db::wallet::PgWalletStore;
use trip_ledger::routes::auth::TokenVerifier;
use trip_ledger::services::{BookingService, SettlementEngine, SettlementScheduler, SubscriptionService};
use trip_ledger::{build_router, AppState};

#[tokio::main]
async fn main() {
    // env vars are read before logging starts, so this one goes to stderr
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(1);
        }
    };

    // add tracing layer
    let file_appender = tracing_appender::rolling::never(".", &config.log_file);
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    // json lines into the log file, plain text on stdout
    let file_layer = Layer::new().json().with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stdout_layer);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Unable to set global subscriber: {err}");
        process::exit(1);
    }

    let database_pool = match process_database(&config.database_url, config.max_connection_pooling).await {
        Ok(db) => {
            tracing::info!("Connected to database");
            db
        }
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => {
            tracing::info!("Listening on port: {}", config.port);
            listener
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    let (state, scheduler) = process_begin(database_pool, &config);
    let scheduler = scheduler.spawn();
    tracing::info!("Routes constructed successfully");

    //start the http service
    let http_service = axum::serve(listener, build_router(state)).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        scheduler.shutdown().await;
        process::exit(1);
    }

    scheduler.shutdown().await;
    tracing::info!("Server stopped");
}

fn process_begin(db_pool: PgPool, config: &AppConfig) -> (AppState, SettlementScheduler) {
    let wallets = Arc::new(PgWalletStore::new(db_pool.clone()));
    let bookings = Arc::new(PgBookingStore::new(db_pool.clone()));
    let gateway = Arc::new(StripeCheckout::with_api_base(
        config.stripe_secret_key.clone(),
        config.stripe_api_base.clone(),
    ));

    let settlement = Arc::new(SettlementEngine::new(wallets.clone(), bookings.clone(), config.admin_id));
    let subscriptions = Arc::new(SubscriptionService::new(
        Arc::new(PgSubscriptionPlanStore::new(db_pool.clone())),
        Arc::new(PgSubscriptionBookingStore::new(db_pool)),
        wallets.clone(),
        gateway,
        config.admin_id,
    ));

    let scheduler = SettlementScheduler::new(settlement.clone(), subscriptions.clone(), config.settlement_interval);
    let state = AppState {
        auth: Arc::new(TokenVerifier::new(config.jwt_secret.clone())),
        wallets: wallets.clone(),
        bookings: Arc::new(BookingService::new(bookings, wallets, config.admin_id)),
        settlement,
        subscriptions,
    };

    (state, scheduler)
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    match sqlx::migrate!("./migrations").run(&db_pool).await {
        Ok(_) => {
            tracing::info!("Migrations run successfully");
        }
        Err(err) => {
            // if it fails we assume to continue believing that the database is already migrated
            tracing::warn!("Failed to run migrations: {err}");
        }
    }

    Ok(db_pool)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
