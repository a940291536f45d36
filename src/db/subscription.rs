use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::utils::{add_days, map_unique_violation};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub duration_days: i32,
    pub features: Vec<String>,
    pub stripe_price_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionPlan {
    /// Price id usable for checkout, if the plan has one.
    pub fn checkout_price_id(&self) -> Option<&str> {
        self.stripe_price_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlan {
    pub name: String,
    pub price: i64,
    pub duration_days: i32,
    #[serde(default)]
    pub features: Vec<String>,
    pub stripe_price_id: Option<String>,
}

impl NewPlan {
    pub fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("plan name must not be empty".into()));
        }
        if self.price <= 0 {
            return Err(AppError::InvalidAmount(self.price));
        }
        if self.duration_days <= 0 {
            return Err(AppError::BadRequest("plan duration must be at least one day".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionBooking {
    pub id: Uuid,
    pub vendor_id: Uuid,
    pub plan_id: Uuid,
    pub amount: i64,
    pub duration_days: i32,
    pub status: SubscriptionStatus,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub stripe_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionBooking {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date >= now
    }

    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_date < now
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscriptionBooking {
    pub vendor_id: Uuid,
    pub plan_id: Uuid,
    pub amount: i64,
    pub duration_days: i32,
    pub start_date: DateTime<Utc>,
}

impl NewSubscriptionBooking {
    pub fn for_plan(vendor_id: Uuid, plan: &SubscriptionPlan, start_date: DateTime<Utc>) -> Self {
        Self {
            vendor_id,
            plan_id: plan.id,
            amount: plan.price,
            duration_days: plan.duration_days,
            start_date,
        }
    }

    pub fn end_date(&self) -> DateTime<Utc> {
        add_days(self.start_date, self.duration_days)
    }
}

#[async_trait]
pub trait SubscriptionPlanStore: Send + Sync {
    async fn create(&self, plan: NewPlan) -> AppResult<SubscriptionPlan>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<SubscriptionPlan>>;

    async fn list(&self) -> AppResult<Vec<SubscriptionPlan>>;
}

#[async_trait]
pub trait SubscriptionBookingStore: Send + Sync {
    async fn create(&self, booking: NewSubscriptionBooking) -> AppResult<SubscriptionBooking>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<SubscriptionBooking>>;

    async fn find_by_session_id(&self, session_id: &str) -> AppResult<Option<SubscriptionBooking>>;

    async fn find_pending(
        &self,
        vendor_id: Uuid,
        plan_id: Uuid,
    ) -> AppResult<Option<SubscriptionBooking>>;

    /// Active subscription whose end date has not passed.
    async fn find_active(
        &self,
        vendor_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<SubscriptionBooking>>;

    async fn list_by_vendor(&self, vendor_id: Uuid) -> AppResult<Vec<SubscriptionBooking>>;

    /// Flips this vendor's lapsed active subscriptions to expired.
    async fn expire_elapsed(&self, vendor_id: Uuid, now: DateTime<Utc>) -> AppResult<u64>;

    async fn expire_all_elapsed(&self, now: DateTime<Utc>) -> AppResult<u64>;

    async fn set_session_id(&self, id: Uuid, session_id: &str) -> AppResult<()>;

    /// Compare-and-set on the status field. Returns false when the booking was not in `from`.
    async fn transition(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> AppResult<bool>;

    /// Moves a pending booking to active with a fresh validity window.
    async fn activate(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> AppResult<Option<SubscriptionBooking>>;
}

const PLAN_COLUMNS: &str = "id, name, price, duration_days, features, stripe_price_id, created_at";

const SUBSCRIPTION_COLUMNS: &str = "id, vendor_id, plan_id, amount, duration_days, status, \
     start_date, end_date, stripe_session_id, created_at";

// Postgres repositories
pub struct PgSubscriptionPlanStore {
    pool: PgPool,
}

impl PgSubscriptionPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionPlanStore for PgSubscriptionPlanStore {
    async fn create(&self, plan: NewPlan) -> AppResult<SubscriptionPlan> {
        plan.validate()?;

        let query = format!(
            r#"
            INSERT INTO subscription_plans (id, name, price, duration_days, features, stripe_price_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {PLAN_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(Uuid::new_v4())
            .bind(plan.name.trim())
            .bind(plan.price)
            .bind(plan.duration_days)
            .bind(&plan.features)
            .bind(&plan.stripe_price_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| map_unique_violation(err, || AppError::PlanConflict))?;
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<SubscriptionPlan>> {
        let query = format!("SELECT {PLAN_COLUMNS} FROM subscription_plans WHERE id = $1");
        let plan = sqlx::query_as::<_, SubscriptionPlan>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(plan)
    }

    async fn list(&self) -> AppResult<Vec<SubscriptionPlan>> {
        let query = format!("SELECT {PLAN_COLUMNS} FROM subscription_plans ORDER BY price ASC");
        let plans = sqlx::query_as::<_, SubscriptionPlan>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(plans)
    }
}

pub struct PgSubscriptionBookingStore {
    pool: PgPool,
}

impl PgSubscriptionBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionBookingStore for PgSubscriptionBookingStore {
    async fn create(&self, booking: NewSubscriptionBooking) -> AppResult<SubscriptionBooking> {
        let query = format!(
            r#"
            INSERT INTO subscription_bookings
                (id, vendor_id, plan_id, amount, duration_days, status, start_date, end_date)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let created = sqlx::query_as::<_, SubscriptionBooking>(&query)
            .bind(Uuid::new_v4())
            .bind(booking.vendor_id)
            .bind(booking.plan_id)
            .bind(booking.amount)
            .bind(booking.duration_days)
            .bind(booking.start_date)
            .bind(booking.end_date())
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<SubscriptionBooking>> {
        let query = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscription_bookings WHERE id = $1");
        let booking = sqlx::query_as::<_, SubscriptionBooking>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    async fn find_by_session_id(&self, session_id: &str) -> AppResult<Option<SubscriptionBooking>> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscription_bookings WHERE stripe_session_id = $1"
        );
        let booking = sqlx::query_as::<_, SubscriptionBooking>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    async fn find_pending(
        &self,
        vendor_id: Uuid,
        plan_id: Uuid,
    ) -> AppResult<Option<SubscriptionBooking>> {
        let query = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscription_bookings
            WHERE vendor_id = $1 AND plan_id = $2 AND status = 'pending'
            ORDER BY created_at DESC
            LIMIT 1
            "#
        );
        let booking = sqlx::query_as::<_, SubscriptionBooking>(&query)
            .bind(vendor_id)
            .bind(plan_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    async fn find_active(
        &self,
        vendor_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<SubscriptionBooking>> {
        let query = format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS} FROM subscription_bookings
            WHERE vendor_id = $1 AND status = 'active' AND end_date >= $2
            ORDER BY end_date DESC
            LIMIT 1
            "#
        );
        let booking = sqlx::query_as::<_, SubscriptionBooking>(&query)
            .bind(vendor_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    async fn list_by_vendor(&self, vendor_id: Uuid) -> AppResult<Vec<SubscriptionBooking>> {
        let query = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscription_bookings WHERE vendor_id = $1 ORDER BY created_at DESC"
        );
        let bookings = sqlx::query_as::<_, SubscriptionBooking>(&query)
            .bind(vendor_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(bookings)
    }

    async fn expire_elapsed(&self, vendor_id: Uuid, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_bookings SET status = 'expired', updated_at = NOW()
            WHERE vendor_id = $1 AND status = 'active' AND end_date < $2
            "#,
        )
        .bind(vendor_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expire_all_elapsed(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_bookings SET status = 'expired', updated_at = NOW()
            WHERE status = 'active' AND end_date < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_session_id(&self, id: Uuid, session_id: &str) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE subscription_bookings SET stripe_session_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::SubscriptionBookingNotFound);
        }
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscription_bookings SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, || AppError::SubscriptionExists))?;
        Ok(result.rows_affected() == 1)
    }

    async fn activate(
        &self,
        id: Uuid,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> AppResult<Option<SubscriptionBooking>> {
        let query = format!(
            r#"
            UPDATE subscription_bookings
            SET status = 'active', start_date = $2, end_date = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        // the partial unique index on active rows backs vendor exclusivity
        let activated = sqlx::query_as::<_, SubscriptionBooking>(&query)
            .bind(id)
            .bind(start_date)
            .bind(end_date)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| map_unique_violation(err, || AppError::SubscriptionExists))?;
        Ok(activated)
    }
}
