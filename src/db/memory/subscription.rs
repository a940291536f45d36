use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::subscription::{
    NewPlan, NewSubscriptionBooking, SubscriptionBooking, SubscriptionBookingStore,
    SubscriptionPlan, SubscriptionPlanStore, SubscriptionStatus,
};
use crate::error::{AppError, AppResult};

#[derive(Default)]
pub struct MemorySubscriptionPlanStore {
    plans: RwLock<HashMap<Uuid, SubscriptionPlan>>,
}

impl MemorySubscriptionPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionPlanStore for MemorySubscriptionPlanStore {
    async fn create(&self, plan: NewPlan) -> AppResult<SubscriptionPlan> {
        plan.validate()?;

        let mut plans = self.plans.write().await;
        let name = plan.name.trim().to_string();
        let clash = plans.values().any(|existing| {
            existing.name == name
                || (plan.stripe_price_id.is_some() && existing.stripe_price_id == plan.stripe_price_id)
        });
        if clash {
            return Err(AppError::PlanConflict);
        }

        let created = SubscriptionPlan {
            id: Uuid::new_v4(),
            name,
            price: plan.price,
            duration_days: plan.duration_days,
            features: plan.features,
            stripe_price_id: plan.stripe_price_id,
            created_at: Utc::now(),
        };
        plans.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<SubscriptionPlan>> {
        Ok(self.plans.read().await.get(&id).cloned())
    }

    async fn list(&self) -> AppResult<Vec<SubscriptionPlan>> {
        let mut plans: Vec<_> = self.plans.read().await.values().cloned().collect();
        plans.sort_by_key(|p| p.price);
        Ok(plans)
    }
}

#[derive(Default)]
pub struct MemorySubscriptionBookingStore {
    bookings: RwLock<HashMap<Uuid, SubscriptionBooking>>,
}

impl MemorySubscriptionBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn expire_where(
        bookings: &mut HashMap<Uuid, SubscriptionBooking>,
        now: DateTime<Utc>,
        vendor_id: Option<Uuid>,
    ) -> u64 {
        let mut expired = 0;
        for booking in bookings.values_mut() {
            let vendor_matches = vendor_id.map_or(true, |v| booking.vendor_id == v);
            if vendor_matches && booking.has_lapsed(now) {
                booking.status = SubscriptionStatus::Expired;
                expired += 1;
            }
        }
        expired
    }
}

#[async_trait]
impl SubscriptionBookingStore for MemorySubscriptionBookingStore {
    async fn create(&self, booking: NewSubscriptionBooking) -> AppResult<SubscriptionBooking> {
        let created = SubscriptionBooking {
            id: Uuid::new_v4(),
            vendor_id: booking.vendor_id,
            plan_id: booking.plan_id,
            amount: booking.amount,
            duration_days: booking.duration_days,
            status: SubscriptionStatus::Pending,
            start_date: booking.start_date,
            end_date: booking.end_date(),
            stripe_session_id: None,
            created_at: Utc::now(),
        };
        self.bookings
            .write()
            .await
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<SubscriptionBooking>> {
        Ok(self.bookings.read().await.get(&id).cloned())
    }

    async fn find_by_session_id(&self, session_id: &str) -> AppResult<Option<SubscriptionBooking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings
            .values()
            .find(|b| b.stripe_session_id.as_deref() == Some(session_id))
            .cloned())
    }

    async fn find_pending(
        &self,
        vendor_id: Uuid,
        plan_id: Uuid,
    ) -> AppResult<Option<SubscriptionBooking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings
            .values()
            .filter(|b| {
                b.vendor_id == vendor_id
                    && b.plan_id == plan_id
                    && b.status == SubscriptionStatus::Pending
            })
            .max_by_key(|b| b.created_at)
            .cloned())
    }

    async fn find_active(
        &self,
        vendor_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<SubscriptionBooking>> {
        let bookings = self.bookings.read().await;
        Ok(bookings
            .values()
            .filter(|b| b.vendor_id == vendor_id && b.is_active_at(now))
            .max_by_key(|b| b.end_date)
            .cloned())
    }

    async fn list_by_vendor(&self, vendor_id: Uuid) -> AppResult<Vec<SubscriptionBooking>> {
        let bookings = self.bookings.read().await;
        let mut listed: Vec<_> = bookings
            .values()
            .filter(|b| b.vendor_id == vendor_id)
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(listed)
    }

    async fn expire_elapsed(&self, vendor_id: Uuid, now: DateTime<Utc>) -> AppResult<u64> {
        let mut bookings = self.bookings.write().await;
        Ok(Self::expire_where(&mut bookings, now, Some(vendor_id)))
    }

    async fn expire_all_elapsed(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut bookings = self.bookings.write().await;
        Ok(Self::expire_where(&mut bookings, now, None))
    }

    async fn set_session_id(&self, id: Uuid, session_id: &str) -> AppResult<()> {
        let mut bookings = self.bookings.write().await;
        let booking = bookings
            .get_mut(&id)
            .ok_or(AppError::SubscriptionBookingNotFound)?;
        booking.stripe_session_id = Some(session_id.to_string());
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> AppResult<bool> {
        let mut bookings = self.bookings.write().await;
        match bookings.get_mut(&id) {
            Some(booking) if booking.status == from => {
                booking.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn activate(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> AppResult<Option<SubscriptionBooking>> {
        let mut bookings = self.bookings.write().await;

        let Some(target) = bookings.get(&id) else {
            return Ok(None);
        };
        if target.status != SubscriptionStatus::Pending {
            return Ok(None);
        }
        let vendor_id = target.vendor_id;
        let already_active = bookings
            .values()
            .any(|b| b.vendor_id == vendor_id && b.id != id && b.status == SubscriptionStatus::Active);
        if already_active {
            return Err(AppError::SubscriptionExists);
        }

        let Some(booking) = bookings.get_mut(&id) else {
            return Ok(None);
        };
        booking.status = SubscriptionStatus::Active;
        booking.start_date = start_date;
        booking.end_date = end_date;
        Ok(Some(booking.clone()))
    }
}
