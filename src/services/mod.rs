pub mod booking;
pub mod scheduler;
pub mod settlement;
pub mod subscription;

pub use booking::BookingService;
pub use scheduler::{SchedulerHandle, SettlementScheduler};
pub use settlement::{SettleRequest, SettlementEngine, SettlementReport};
pub use subscription::{CheckoutLink, SubscriptionService};
