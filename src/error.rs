use uuid::Uuid;

use crate::db::wallet::OwnerType;

pub type AppResult<T> = Result<T, AppError>;

/// Failures surfaced by the ledger, booking and subscription flows.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("insufficient funds in {owner_type} wallet {owner_id}")]
    InsufficientFunds { owner_id: Uuid, owner_type: OwnerType },

    #[error("transaction with reference '{0}' already recorded")]
    DuplicateReference(String),

    #[error("booking not found")]
    BookingNotFound,

    #[error("cannot cancel a booking whose date has already passed")]
    PastBookingCancellation,

    #[error("package not found for booking {0}")]
    PackageNotFound(Uuid),

    #[error("{kind} {id} not found")]
    DirectoryEntryNotFound { kind: &'static str, id: Uuid },

    #[error("subscription plan not found")]
    PlanNotFound,

    #[error("a plan with the same name or price id already exists")]
    PlanConflict,

    #[error("vendor already has an active subscription")]
    SubscriptionExists,

    #[error("subscription booking is not pending")]
    SubscriptionNotPending,

    #[error("subscription booking not found")]
    SubscriptionBookingNotFound,

    #[error("checkout session has not been paid")]
    PaymentIncomplete,

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("checkout gateway error: {0}")]
    Gateway(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<reqwest::Error> for AppError {
    fn from(value: reqwest::Error) -> Self {
        AppError::Gateway(format!("http error: {value}"))
    }
}
