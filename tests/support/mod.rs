#![allow(dead_code)]

use std::env;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use trip_ledger::checkout::MockCheckoutGateway;
use trip_ledger::db::booking::{Booking, BookingStore, NewBooking};
use trip_ledger::db::memory::{
    MemoryBookingStore, MemorySubscriptionBookingStore, MemorySubscriptionPlanStore,
    MemoryWalletStore,
};
use trip_ledger::db::wallet::WalletOwner;
use trip_ledger::routes::auth::TokenVerifier;
use trip_ledger::services::{BookingService, SettlementEngine, SubscriptionService};
use trip_ledger::AppState;

pub const JWT_SECRET: &str = "test-secret";

/// Every service wired to in-memory stores and a fake checkout gateway.
pub struct TestApp {
    pub admin_id: Uuid,
    pub wallets: Arc<MemoryWalletStore>,
    pub bookings: Arc<MemoryBookingStore>,
    pub subscription_bookings: Arc<MemorySubscriptionBookingStore>,
    pub gateway: Arc<MockCheckoutGateway>,
    pub booking_service: Arc<BookingService>,
    pub settlement: Arc<SettlementEngine>,
    pub subscriptions: Arc<SubscriptionService>,
}

impl TestApp {
    pub fn new() -> Self {
        let admin_id = Uuid::new_v4();
        let wallets = Arc::new(MemoryWalletStore::new());
        let bookings = Arc::new(MemoryBookingStore::new());
        let subscription_bookings = Arc::new(MemorySubscriptionBookingStore::new());
        let gateway = Arc::new(MockCheckoutGateway::new());

        let booking_service = Arc::new(BookingService::new(bookings.clone(), wallets.clone(), admin_id));
        let settlement = Arc::new(SettlementEngine::new(wallets.clone(), bookings.clone(), admin_id));
        let subscriptions = Arc::new(SubscriptionService::new(
            Arc::new(MemorySubscriptionPlanStore::new()),
            subscription_bookings.clone(),
            wallets.clone(),
            gateway.clone(),
            admin_id,
        ));

        Self {
            admin_id,
            wallets,
            bookings,
            subscription_bookings,
            gateway,
            booking_service,
            settlement,
            subscriptions,
        }
    }

    pub fn admin(&self) -> WalletOwner {
        WalletOwner::admin(self.admin_id)
    }

    pub fn state(&self) -> AppState {
        AppState {
            auth: Arc::new(TokenVerifier::new(JWT_SECRET.to_string())),
            wallets: self.wallets.clone(),
            bookings: self.booking_service.clone(),
            settlement: self.settlement.clone(),
            subscriptions: self.subscriptions.clone(),
        }
    }

    /// A paid single-leg trip with a resolvable package, vendor and user.
    pub async fn paid_trip(
        &self,
        reference: &str,
        selected_date: DateTime<Utc>,
        duration_days: i32,
        total_amount: i64,
    ) -> Booking {
        let mut legs = self
            .paid_legs(reference, &[(selected_date, duration_days, total_amount)])
            .await;
        legs.remove(0)
    }

    /// Several legs paid together under one reference, each with its own vendor.
    pub async fn paid_legs(&self, reference: &str, legs: &[(DateTime<Utc>, i32, i64)]) -> Vec<Booking> {
        let user_id = self.bookings.add_user("Alex Traveller").await;
        let mut new_legs = Vec::new();
        for (selected_date, duration_days, total_amount) in legs {
            let package = self.bookings.add_package("Island hopping", *duration_days).await;
            let vendor_id = self.bookings.add_vendor("Harbour Tours").await;
            new_legs.push(NewBooking {
                booking_ref: reference.to_string(),
                user_id,
                vendor_id,
                package_id: package.id,
                selected_date: *selected_date,
                total_amount: *total_amount,
            });
        }
        self.booking_service
            .record_payment(new_legs)
            .await
            .expect("record payment")
    }

    pub async fn stored(&self, id: Uuid) -> Booking {
        self.bookings
            .find_by_id(id)
            .await
            .expect("find booking")
            .expect("booking exists")
    }
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

pub fn days_ahead(days: i64) -> DateTime<Utc> {
    Utc::now() + Duration::days(days)
}

/// Pool on `TEST_DATABASE_URL` with migrations applied. Used by the `#[ignore]`d Postgres tests.
pub async fn test_pool() -> PgPool {
    dotenv::dotenv().ok();
    let url = env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .expect("connect test db");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}
