//! In-memory stores used by the tests.

mod booking;
mod subscription;
mod wallet;


pub use booking::MemoryBookingStore;
pub use subscription::{MemorySubscriptionBookingStore, MemorySubscriptionPlanStore};
pub use wallet::MemoryWalletStore;
