use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::booking::{Booking, BookingStatus, BookingStore, NewBooking};
use crate::db::wallet::{
    NewTransaction, TransactionStatus, TransactionType, WalletOwner, WalletStore,
};
use crate::error::{AppError, AppResult};

/// Payment intake and user cancellations for trip bookings.
pub struct BookingService {
    bookings: Arc<dyn BookingStore>,
    wallets: Arc<dyn WalletStore>,
    admin_id: Uuid,
}

impl BookingService {
    pub fn new(bookings: Arc<dyn BookingStore>, wallets: Arc<dyn WalletStore>, admin_id: Uuid) -> Self {
        Self {
            bookings,
            wallets,
            admin_id,
        }
    }

    /// Records a paid purchase. Every leg must carry the same settlement reference.
    ///
    /// The clearing wallet is credited with the purchase total as a pending entry keyed by
    /// that reference; settlement later reads it as its gate. When an earlier attempt wrote
    /// the gate but not every leg, repeating the same payment stores only the missing legs.
    /// Paying a fully recorded reference again fails with [`AppError::DuplicateReference`].
    pub async fn record_payment(&self, legs: Vec<NewBooking>) -> AppResult<Vec<Booking>> {
        let Some(first) = legs.first() else {
            return Err(AppError::BadRequest("a payment needs at least one booking".into()));
        };
        let reference = first.booking_ref.clone();
        if legs.iter().any(|leg| leg.booking_ref != reference) {
            return Err(AppError::BadRequest(
                "all bookings of one payment must share a reference".into(),
            ));
        }
        if let Some(leg) = legs.iter().find(|leg| leg.total_amount <= 0) {
            return Err(AppError::InvalidAmount(leg.total_amount));
        }
        let total = legs.iter().try_fold(0i64, |sum, leg| {
            sum.checked_add(leg.total_amount)
                .ok_or(AppError::InvalidAmount(leg.total_amount))
        })?;

        let admin = WalletOwner::admin(self.admin_id);
        let gate = NewTransaction::credit(total, format!("Payment received for booking {reference}"))
            .with_ref(reference.clone())
            .pending();
        let mut recorded = match self.wallets.append(admin, gate).await {
            Ok(_) => Vec::new(),
            Err(AppError::DuplicateReference(taken)) => self
                .interrupted_legs(admin, &reference, total, legs.len())
                .await?
                .ok_or(AppError::DuplicateReference(taken))?,
            Err(err) => return Err(err),
        };
        if !recorded.is_empty() {
            warn!(%reference, stored = recorded.len(), "resuming interrupted payment");
        }

        let mut stored = Vec::with_capacity(legs.len());
        for leg in legs {
            match recorded.iter().position(|b| same_leg(b, &leg)) {
                Some(index) => stored.push(recorded.swap_remove(index)),
                None => stored.push(self.bookings.insert(leg).await?),
            }
        }
        info!(%reference, total, legs = stored.len(), "booking payment recorded");
        Ok(stored)
    }

    /// Legs already stored for a payment whose gate exists but whose legs were cut short.
    /// `None` when the gate belongs to a different or already complete payment.
    async fn interrupted_legs(
        &self,
        admin: WalletOwner,
        reference: &str,
        total: i64,
        leg_count: usize,
    ) -> AppResult<Option<Vec<Booking>>> {
        let gate = self
            .wallets
            .find_transaction(admin, TransactionType::Credit, reference)
            .await?;
        let resumable =
            gate.is_some_and(|g| g.amount == total && g.status == TransactionStatus::Pending);
        if !resumable {
            return Ok(None);
        }

        let stored = self.bookings.find_by_ref(reference).await?;
        if stored.len() >= leg_count {
            return Ok(None);
        }
        Ok(Some(stored))
    }

    pub async fn find(&self, id: Uuid) -> AppResult<Option<Booking>> {
        self.bookings.find_by_id(id).await
    }

    /// Cancels a future booking and refunds its full amount to the user.
    ///
    /// The refund is written first and the status flip second, so a failed refund leaves
    /// the booking untouched. The refund carries the booking id as its reference; if a
    /// previous attempt already refunded it, the refund is not repeated.
    pub async fn refund_booking(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Booking> {
        let booking = self
            .bookings
            .find_by_id(id)
            .await?
            .filter(|b| b.booking_status == BookingStatus::Upcoming)
            .ok_or(AppError::BookingNotFound)?;
        if booking.selected_date <= now {
            return Err(AppError::PastBookingCancellation);
        }

        let user = WalletOwner::user(booking.user_id);
        let refund_ref = booking.id.to_string();
        let refunded = self
            .wallets
            .find_transaction(user, TransactionType::Credit, &refund_ref)
            .await?
            .is_some();
        if !refunded {
            let description = format!("Refund for cancelled booking {}", booking.id);
            match self
                .wallets
                .credit(user, booking.total_amount, &description, Some(&refund_ref))
                .await
            {
                Ok(_) | Err(AppError::DuplicateReference(_)) => {}
                Err(err) => return Err(err),
            }
        } else {
            warn!(booking_id = %booking.id, "refund already recorded, completing cancellation");
        }

        let cancelled = self.bookings.cancel(booking.id, now).await?;
        info!(
            booking_id = %cancelled.id,
            user_id = %cancelled.user_id,
            amount = cancelled.total_amount,
            "booking cancelled and refunded"
        );
        Ok(cancelled)
    }
}

fn same_leg(stored: &Booking, leg: &NewBooking) -> bool {
    stored.user_id == leg.user_id
        && stored.vendor_id == leg.vendor_id
        && stored.package_id == leg.package_id
        && stored.selected_date == leg.selected_date
        && stored.total_amount == leg.total_amount
}
