use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::booking::{
    cancellation_refusal, Booking, BookingStatus, BookingStore, NewBooking, PackageSummary,
    PaymentStatus, SettlementCandidate,
};
use crate::error::{AppError, AppResult};

/// Booking store kept in memory, together with the package, vendor and user
/// directories it joins against.
#[derive(Default)]
pub struct MemoryBookingStore {
    bookings: RwLock<HashMap<Uuid, Booking>>,
    packages: RwLock<HashMap<Uuid, PackageSummary>>,
    vendors: RwLock<HashMap<Uuid, String>>,
    users: RwLock<HashMap<Uuid, String>>,
    insert_budget: RwLock<Option<usize>>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_package(&self, name: &str, duration_days: i32) -> PackageSummary {
        let package = PackageSummary {
            id: Uuid::new_v4(),
            name: name.to_string(),
            duration_days,
        };
        self.packages
            .write()
            .await
            .insert(package.id, package.clone());
        package
    }

    /// Lets the next `successes` inserts through and fails every insert after that.
    pub async fn fail_inserts_after(&self, successes: usize) {
        *self.insert_budget.write().await = Some(successes);
    }

    pub async fn restore_inserts(&self) {
        *self.insert_budget.write().await = None;
    }

    pub async fn remove_package(&self, id: Uuid) {
        self.packages.write().await.remove(&id);
    }

    pub async fn add_vendor(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.vendors.write().await.insert(id, name.to_string());
        id
    }

    pub async fn add_user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.users.write().await.insert(id, name.to_string());
        id
    }

    async fn project(&self, booking: Booking) -> SettlementCandidate {
        let package = self.packages.read().await.get(&booking.package_id).cloned();
        let vendor_name = self.vendors.read().await.get(&booking.vendor_id).cloned();
        let user_name = self.users.read().await.get(&booking.user_id).cloned();
        SettlementCandidate {
            booking,
            package,
            vendor_name,
            user_name,
        }
    }

    fn sorted(mut bookings: Vec<Booking>) -> Vec<Booking> {
        bookings.sort_by(|a, b| {
            a.booking_ref
                .cmp(&b.booking_ref)
                .then(a.selected_date.cmp(&b.selected_date))
        });
        bookings
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn insert(&self, booking: NewBooking) -> AppResult<Booking> {
        if let Some(remaining) = self.insert_budget.write().await.as_mut() {
            if *remaining == 0 {
                return Err(AppError::Database(sqlx::Error::PoolTimedOut));
            }
            *remaining -= 1;
        }

        let record = Booking {
            id: Uuid::new_v4(),
            booking_ref: booking.booking_ref,
            user_id: booking.user_id,
            vendor_id: booking.vendor_id,
            package_id: booking.package_id,
            selected_date: booking.selected_date,
            total_amount: booking.total_amount,
            booking_status: BookingStatus::Upcoming,
            payment_status: PaymentStatus::Paid,
            settlement_done: false,
            created_at: Utc::now(),
        };
        self.bookings
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Booking>> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn find_by_ref(&self, booking_ref: &str) -> AppResult<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(Self::sorted(
            bookings
                .values()
                .filter(|b| b.booking_ref == booking_ref)
                .cloned()
                .collect(),
        ))
    }

    async fn find_by_vendor(&self, vendor_id: Uuid) -> AppResult<Vec<Booking>> {
        let bookings = self.bookings.read().await;
        Ok(Self::sorted(
            bookings
                .values()
                .filter(|b| b.vendor_id == vendor_id)
                .cloned()
                .collect(),
        ))
    }

    async fn find_completed_but_unsettled(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<SettlementCandidate>> {
        let open: Vec<Booking> = {
            let bookings = self.bookings.read().await;
            bookings
                .values()
                .filter(|b| {
                    !b.settlement_done
                        && matches!(b.booking_status, BookingStatus::Upcoming | BookingStatus::Ongoing)
                        && b.payment_status == PaymentStatus::Paid
                })
                .cloned()
                .collect()
        };

        let mut due = Vec::new();
        for booking in Self::sorted(open) {
            let candidate = self.project(booking).await;
            match candidate.trip_end() {
                Some(end) if end > now => continue,
                _ => due.push(candidate),
            }
        }
        Ok(due)
    }

    async fn settlement_view(&self, booking_ref: &str) -> AppResult<Vec<SettlementCandidate>> {
        let mut view = Vec::new();
        for booking in self.find_by_ref(booking_ref).await? {
            view.push(self.project(booking).await);
        }
        Ok(view)
    }

    async fn mark_settled(&self, id: Uuid) -> AppResult<()> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&id) {
            Some(b) if b.booking_status != BookingStatus::Cancelled => {
                b.settlement_done = true;
                b.booking_status = BookingStatus::Completed;
                Ok(())
            }
            _ => Err(AppError::BookingNotFound),
        }
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Booking> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&id) {
            Some(b) if b.is_cancellable(now) => {
                b.booking_status = BookingStatus::Cancelled;
                b.payment_status = PaymentStatus::Refunded;
                Ok(b.clone())
            }
            other => Err(cancellation_refusal(other.as_deref())),
        }
    }
}
