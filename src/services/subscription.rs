//! Vendor subscription lifecycle: pending, active, expired or cancelled.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::checkout::{checkout_qr_code, CheckoutGateway, CheckoutRequest};
use crate::db::subscription::{
    NewPlan, NewSubscriptionBooking, SubscriptionBooking, SubscriptionBookingStore,
    SubscriptionPlan, SubscriptionPlanStore, SubscriptionStatus,
};
use crate::db::utils::add_days;
use crate::db::wallet::{WalletOwner, WalletStore};
use crate::error::{AppError, AppResult};

pub const SUBSCRIPTION_REVENUE_DESCRIPTION: &str = "Subscription purchased by vendor";

/// Where the vendor goes to pay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutLink {
    pub booking_id: Uuid,
    pub checkout_url: String,
    /// SVG QR code of `checkout_url`, as a data URL.
    pub qr_code: String,
}

pub struct SubscriptionService {
    plans: Arc<dyn SubscriptionPlanStore>,
    bookings: Arc<dyn SubscriptionBookingStore>,
    wallets: Arc<dyn WalletStore>,
    gateway: Arc<dyn CheckoutGateway>,
    admin_id: Uuid,
}

impl SubscriptionService {
    pub fn new(
        plans: Arc<dyn SubscriptionPlanStore>,
        bookings: Arc<dyn SubscriptionBookingStore>,
        wallets: Arc<dyn WalletStore>,
        gateway: Arc<dyn CheckoutGateway>,
        admin_id: Uuid,
    ) -> Self {
        Self {
            plans,
            bookings,
            wallets,
            gateway,
            admin_id,
        }
    }

    pub async fn create_plan(&self, plan: NewPlan) -> AppResult<SubscriptionPlan> {
        plan.validate()?;
        let created = self.plans.create(plan).await?;
        info!(plan_id = %created.id, name = %created.name, "subscription plan created");
        Ok(created)
    }

    pub async fn list_plans(&self) -> AppResult<Vec<SubscriptionPlan>> {
        self.plans.list().await
    }

    pub async fn find_booking(&self, id: Uuid) -> AppResult<Option<SubscriptionBooking>> {
        self.bookings.find_by_id(id).await
    }

    /// Starts a purchase: opens (or reuses) a pending booking and issues a checkout session.
    ///
    /// The clearing wallet is credited with the plan price as soon as the session exists,
    /// before the vendor has paid. Each issued session is credited once.
    pub async fn create_booking(
        &self,
        vendor_id: Uuid,
        plan_id: Uuid,
        domain_url: &str,
        now: DateTime<Utc>,
    ) -> AppResult<CheckoutLink> {
        let domain = normalize_domain(domain_url)?;
        self.sweep_vendor(vendor_id, now).await?;

        if let Some(active) = self.bookings.find_active(vendor_id, now).await? {
            debug!(%vendor_id, booking_id = %active.id, "vendor already subscribed");
            return Err(AppError::SubscriptionExists);
        }

        let plan = self
            .plans
            .find_by_id(plan_id)
            .await?
            .ok_or(AppError::PlanNotFound)?;
        let price_id = plan.checkout_price_id().ok_or(AppError::PlanNotFound)?.to_string();

        let booking = match self.bookings.find_pending(vendor_id, plan.id).await? {
            Some(pending) => pending,
            None => {
                self.bookings
                    .create(NewSubscriptionBooking::for_plan(vendor_id, &plan, now))
                    .await?
            }
        };

        let (link, session_id) = self.issue_checkout(&booking, &price_id, domain).await?;

        let admin = WalletOwner::admin(self.admin_id);
        self.wallets.get_or_create(admin).await?;
        match self
            .wallets
            .credit(admin, plan.price, SUBSCRIPTION_REVENUE_DESCRIPTION, Some(&session_id))
            .await
        {
            Ok(_) | Err(AppError::DuplicateReference(_)) => {}
            Err(err) => return Err(err),
        }

        info!(
            %vendor_id,
            plan_id = %plan.id,
            booking_id = %booking.id,
            amount = plan.price,
            "subscription checkout issued"
        );
        Ok(link)
    }

    /// Issues a fresh checkout session for a pending booking.
    ///
    /// Returns `None` when the booking does not exist or is no longer pending.
    pub async fn retry_payment(
        &self,
        booking_id: Uuid,
        domain_url: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<CheckoutLink>> {
        let domain = normalize_domain(domain_url)?;
        let Some(booking) = self.bookings.find_by_id(booking_id).await? else {
            return Ok(None);
        };
        self.sweep_vendor(booking.vendor_id, now).await?;
        if booking.status != SubscriptionStatus::Pending {
            debug!(%booking_id, status = ?booking.status, "retry refused for non-pending booking");
            return Ok(None);
        }

        let plan = self
            .plans
            .find_by_id(booking.plan_id)
            .await?
            .ok_or(AppError::PlanNotFound)?;
        let price_id = plan.checkout_price_id().ok_or(AppError::PlanNotFound)?.to_string();

        let (link, session_id) = self.issue_checkout(&booking, &price_id, domain).await?;
        info!(%booking_id, %session_id, "subscription checkout reissued");
        Ok(Some(link))
    }

    pub async fn cancel_subscription_booking(
        &self,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionBooking> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or(AppError::SubscriptionBookingNotFound)?;
        self.sweep_vendor(booking.vendor_id, now).await?;

        let cancelled = self
            .bookings
            .transition(booking.id, SubscriptionStatus::Pending, SubscriptionStatus::Cancelled)
            .await?;
        if !cancelled {
            return Err(AppError::SubscriptionNotPending);
        }

        info!(%booking_id, vendor_id = %booking.vendor_id, "subscription booking cancelled");
        Ok(SubscriptionBooking {
            status: SubscriptionStatus::Cancelled,
            ..booking
        })
    }

    pub async fn get_vendor_active_subscription(
        &self,
        vendor_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<SubscriptionBooking>> {
        self.sweep_vendor(vendor_id, now).await?;
        self.bookings.find_active(vendor_id, now).await
    }

    pub async fn list_vendor_subscriptions(
        &self,
        vendor_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<SubscriptionBooking>> {
        self.sweep_vendor(vendor_id, now).await?;
        self.bookings.list_by_vendor(vendor_id).await
    }

    /// Activates the booking behind a paid checkout session.
    ///
    /// The validity window restarts at confirmation time. Confirming an already active
    /// booking returns it unchanged.
    pub async fn confirm_checkout(
        &self,
        vendor_id: Uuid,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<SubscriptionBooking> {
        let booking = self
            .bookings
            .find_by_session_id(session_id)
            .await?
            .ok_or(AppError::SubscriptionBookingNotFound)?;
        if booking.vendor_id != vendor_id {
            return Err(AppError::Forbidden);
        }

        match booking.status {
            SubscriptionStatus::Active => return Ok(booking),
            SubscriptionStatus::Pending => {}
            _ => return Err(AppError::SubscriptionNotPending),
        }

        let session = self.gateway.retrieve_session(session_id).await?;
        if !session.is_paid() {
            warn!(booking_id = %booking.id, status = %session.payment_status, "checkout not paid");
            return Err(AppError::PaymentIncomplete);
        }

        self.sweep_vendor(vendor_id, now).await?;
        let end_date = add_days(now, booking.duration_days);
        match self.bookings.activate(booking.id, now, end_date).await? {
            Some(active) => {
                info!(
                    booking_id = %active.id,
                    %vendor_id,
                    end_date = %active.end_date,
                    "subscription activated"
                );
                Ok(active)
            }
            // lost a race with another confirmation or a cancel
            None => match self.bookings.find_by_id(booking.id).await? {
                Some(current) if current.status == SubscriptionStatus::Active => Ok(current),
                _ => Err(AppError::SubscriptionNotPending),
            },
        }
    }

    /// Expires every lapsed subscription.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let expired = self.bookings.expire_all_elapsed(now).await?;
        if expired > 0 {
            info!(expired, "expired lapsed subscriptions");
        }
        Ok(expired)
    }

    async fn sweep_vendor(&self, vendor_id: Uuid, now: DateTime<Utc>) -> AppResult<()> {
        let expired = self.bookings.expire_elapsed(vendor_id, now).await?;
        if expired > 0 {
            debug!(%vendor_id, expired, "expired lapsed subscriptions");
        }
        Ok(())
    }

    async fn issue_checkout(
        &self,
        booking: &SubscriptionBooking,
        price_id: &str,
        domain: &str,
    ) -> AppResult<(CheckoutLink, String)> {
        let mut metadata = BTreeMap::new();
        metadata.insert("booking_id".to_string(), booking.id.to_string());
        metadata.insert("vendor_id".to_string(), booking.vendor_id.to_string());
        metadata.insert("plan_id".to_string(), booking.plan_id.to_string());

        let session = self
            .gateway
            .create_checkout_session(CheckoutRequest {
                price_id: price_id.to_string(),
                success_url: format!(
                    "{domain}/vendor/subscription/success?session_id={{CHECKOUT_SESSION_ID}}"
                ),
                cancel_url: format!("{domain}/vendor/subscription/cancel?booking_id={}", booking.id),
                metadata,
            })
            .await?;
        self.bookings
            .set_session_id(booking.id, &session.session_id)
            .await?;

        let link = CheckoutLink {
            booking_id: booking.id,
            qr_code: checkout_qr_code(&session.checkout_url)?,
            checkout_url: session.checkout_url,
        };
        Ok((link, session.session_id))
    }
}

fn normalize_domain(domain_url: &str) -> AppResult<&str> {
    let domain = domain_url.trim().trim_end_matches('/');
    if domain.is_empty() {
        return Err(AppError::BadRequest("domainUrl is required".into()));
    }
    Ok(domain)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::checkout::MockCheckoutGateway;
    use crate::db::memory::{
        MemorySubscriptionBookingStore, MemorySubscriptionPlanStore, MemoryWalletStore,
    };

    struct Fixture {
        service: SubscriptionService,
        gateway: Arc<MockCheckoutGateway>,
        wallets: Arc<MemoryWalletStore>,
        admin: WalletOwner,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(MockCheckoutGateway::new());
        let wallets = Arc::new(MemoryWalletStore::new());
        let admin_id = Uuid::new_v4();
        let service = SubscriptionService::new(
            Arc::new(MemorySubscriptionPlanStore::new()),
            Arc::new(MemorySubscriptionBookingStore::new()),
            wallets.clone(),
            gateway.clone(),
            admin_id,
        );
        Fixture {
            service,
            gateway,
            wallets,
            admin: WalletOwner::admin(admin_id),
        }
    }

    async fn gold(service: &SubscriptionService, price_id: Option<&str>) -> SubscriptionPlan {
        service
            .create_plan(NewPlan {
                name: format!("Gold {}", Uuid::new_v4()),
                price: 500,
                duration_days: 30,
                features: vec!["priority listing".into()],
                stripe_price_id: price_id.map(str::to_string),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn plan_without_price_id_cannot_be_purchased() {
        let f = fixture();
        let plan = gold(&f.service, None).await;

        let result = f
            .service
            .create_booking(Uuid::new_v4(), plan.id, "https://app.test", Utc::now())
            .await;
        assert!(matches!(result, Err(AppError::PlanNotFound)));
        assert_eq!(f.gateway.session_count().await, 0);
    }

    #[tokio::test]
    async fn repeated_purchase_reuses_the_pending_booking() {
        let f = fixture();
        let plan = gold(&f.service, Some("price_gold")).await;
        let vendor = Uuid::new_v4();

        let first = f
            .service
            .create_booking(vendor, plan.id, "https://app.test/", Utc::now())
            .await
            .unwrap();
        let second = f
            .service
            .create_booking(vendor, plan.id, "https://app.test", Utc::now())
            .await
            .unwrap();

        assert_eq!(first.booking_id, second.booking_id);
        assert_ne!(first.checkout_url, second.checkout_url);
        assert!(first.qr_code.starts_with("data:image/svg+xml;base64,"));
        // revenue is recognised per issued checkout
        assert_eq!(f.wallets.balance(f.admin).await, 1000);
    }

    #[tokio::test]
    async fn checkout_metadata_identifies_the_booking() {
        let f = fixture();
        let plan = gold(&f.service, Some("price_gold")).await;
        let vendor = Uuid::new_v4();

        let link = f
            .service
            .create_booking(vendor, plan.id, "https://app.test", Utc::now())
            .await
            .unwrap();
        let booking = f.service.find_booking(link.booking_id).await.unwrap().unwrap();
        let session_id = booking.stripe_session_id.unwrap();

        let metadata = f.gateway.metadata(&session_id).await.unwrap();
        assert_eq!(metadata.get("booking_id"), Some(&link.booking_id.to_string()));
        assert_eq!(metadata.get("vendor_id"), Some(&vendor.to_string()));
        assert_eq!(metadata.get("plan_id"), Some(&plan.id.to_string()));
    }

    #[tokio::test]
    async fn gateway_failure_records_no_revenue() {
        let f = fixture();
        let plan = gold(&f.service, Some("price_gold")).await;
        f.gateway.set_fail_on_create(true).await;

        let result = f
            .service
            .create_booking(Uuid::new_v4(), plan.id, "https://app.test", Utc::now())
            .await;
        assert!(matches!(result, Err(AppError::Gateway(_))));
        assert_eq!(f.wallets.balance(f.admin).await, 0);
    }

    #[tokio::test]
    async fn retry_only_applies_to_pending_bookings() {
        let f = fixture();
        let plan = gold(&f.service, Some("price_gold")).await;
        let vendor = Uuid::new_v4();
        let link = f
            .service
            .create_booking(vendor, plan.id, "https://app.test", Utc::now())
            .await
            .unwrap();

        let retried = f
            .service
            .retry_payment(link.booking_id, "https://app.test", Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.booking_id, link.booking_id);
        assert_ne!(retried.checkout_url, link.checkout_url);

        f.service.cancel_subscription_booking(link.booking_id, Utc::now()).await.unwrap();
        assert!(f
            .service
            .retry_payment(link.booking_id, "https://app.test", Utc::now())
            .await
            .unwrap()
            .is_none());
        assert!(f
            .service
            .retry_payment(Uuid::new_v4(), "https://app.test", Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn cancel_requires_pending() {
        let f = fixture();
        let plan = gold(&f.service, Some("price_gold")).await;
        let link = f
            .service
            .create_booking(Uuid::new_v4(), plan.id, "https://app.test", Utc::now())
            .await
            .unwrap();

        let cancelled = f.service.cancel_subscription_booking(link.booking_id, Utc::now()).await.unwrap();
        assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
        assert!(matches!(
            f.service.cancel_subscription_booking(link.booking_id, Utc::now()).await,
            Err(AppError::SubscriptionNotPending)
        ));
        assert!(matches!(
            f.service.cancel_subscription_booking(Uuid::new_v4(), Utc::now()).await,
            Err(AppError::SubscriptionBookingNotFound)
        ));
    }

    #[tokio::test]
    async fn unpaid_session_is_not_activated() {
        let f = fixture();
        let plan = gold(&f.service, Some("price_gold")).await;
        let vendor = Uuid::new_v4();
        let link = f
            .service
            .create_booking(vendor, plan.id, "https://app.test", Utc::now())
            .await
            .unwrap();
        let session_id = f
            .service
            .find_booking(link.booking_id)
            .await
            .unwrap()
            .and_then(|b| b.stripe_session_id)
            .unwrap();

        let result = f.service.confirm_checkout(vendor, &session_id, Utc::now()).await;
        assert!(matches!(result, Err(AppError::PaymentIncomplete)));

        let other_vendor = f
            .service
            .confirm_checkout(Uuid::new_v4(), &session_id, Utc::now())
            .await;
        assert!(matches!(other_vendor, Err(AppError::Forbidden)));
    }

    #[tokio::test]
    async fn confirmation_restarts_the_validity_window() {
        let f = fixture();
        let plan = gold(&f.service, Some("price_gold")).await;
        let vendor = Uuid::new_v4();
        let purchased_at = Utc::now() - Duration::days(2);
        let link = f
            .service
            .create_booking(vendor, plan.id, "https://app.test", purchased_at)
            .await
            .unwrap();
        let session_id = f
            .service
            .find_booking(link.booking_id)
            .await
            .unwrap()
            .and_then(|b| b.stripe_session_id)
            .unwrap();
        f.gateway.mark_paid(&session_id).await;

        let now = Utc::now();
        let active = f.service.confirm_checkout(vendor, &session_id, now).await.unwrap();
        assert_eq!(active.status, SubscriptionStatus::Active);
        assert_eq!(active.start_date, now);
        assert_eq!(active.end_date, now + Duration::days(30));

        let again = f.service.confirm_checkout(vendor, &session_id, now).await.unwrap();
        assert_eq!(again.id, active.id);
    }
}
