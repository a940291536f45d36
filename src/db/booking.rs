use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::utils::add_days;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Upcoming,
    Ongoing,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    /// Settlement reference shared by every leg of one purchase.
    pub booking_ref: String,
    pub user_id: Uuid,
    pub vendor_id: Uuid,
    pub package_id: Uuid,
    pub selected_date: DateTime<Utc>,
    pub total_amount: i64,
    pub booking_status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub settlement_done: bool,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    pub fn trip_end(&self, duration_days: i32) -> DateTime<Utc> {
        add_days(self.selected_date, duration_days)
    }

    pub fn is_cancellable(&self, now: DateTime<Utc>) -> bool {
        self.booking_status == BookingStatus::Upcoming && self.selected_date > now
    }
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub booking_ref: String,
    pub user_id: Uuid,
    pub vendor_id: Uuid,
    pub package_id: Uuid,
    pub selected_date: DateTime<Utc>,
    pub total_amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    pub id: Uuid,
    pub name: String,
    pub duration_days: i32,
}

/// Read-only projection of a booking joined with its package, vendor and user.
#[derive(Debug, Clone)]
pub struct SettlementCandidate {
    pub booking: Booking,
    pub package: Option<PackageSummary>,
    pub vendor_name: Option<String>,
    pub user_name: Option<String>,
}

impl SettlementCandidate {
    pub fn trip_end(&self) -> Option<DateTime<Utc>> {
        self.package
            .as_ref()
            .map(|package| self.booking.trip_end(package.duration_days))
    }
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn insert(&self, booking: NewBooking) -> AppResult<Booking>;

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Booking>>;

    async fn find_by_ref(&self, booking_ref: &str) -> AppResult<Vec<Booking>>;

    async fn find_by_vendor(&self, vendor_id: Uuid) -> AppResult<Vec<Booking>>;

    /// Paid, unsettled, non-cancelled bookings whose trip has ended by `now`.
    /// Bookings whose package cannot be resolved are included so the caller can
    /// report them.
    async fn find_completed_but_unsettled(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<SettlementCandidate>>;

    /// Every booking sharing `booking_ref`, due or not.
    async fn settlement_view(&self, booking_ref: &str) -> AppResult<Vec<SettlementCandidate>>;

    /// Sets `settlement_done` and moves the booking to completed. Repeating it is a no-op.
    async fn mark_settled(&self, id: Uuid) -> AppResult<()>;

    /// Cancels an upcoming booking whose date is still ahead of `now`.
    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Booking>;
}

/// Decides which error a refused cancellation maps to.
pub fn cancellation_refusal(booking: Option<&Booking>) -> AppError {
    match booking {
        Some(b) if b.booking_status == BookingStatus::Upcoming => AppError::PastBookingCancellation,
        _ => AppError::BookingNotFound,
    }
}

#[derive(FromRow)]
struct CandidateRow {
    #[sqlx(flatten)]
    booking: Booking,
    resolved_package_id: Option<Uuid>,
    package_name: Option<String>,
    duration_days: Option<i32>,
    vendor_name: Option<String>,
    user_name: Option<String>,
}

impl From<CandidateRow> for SettlementCandidate {
    fn from(row: CandidateRow) -> Self {
        let package = match (row.resolved_package_id, row.package_name, row.duration_days) {
            (Some(id), Some(name), Some(duration_days)) => Some(PackageSummary {
                id,
                name,
                duration_days,
            }),
            _ => None,
        };
        SettlementCandidate {
            booking: row.booking,
            package,
            vendor_name: row.vendor_name,
            user_name: row.user_name,
        }
    }
}

const BOOKING_COLUMNS: &str = "id, booking_ref, user_id, vendor_id, package_id, selected_date, \
     total_amount, booking_status, payment_status, settlement_done, created_at";

const CANDIDATE_SELECT: &str = r#"
    SELECT b.id, b.booking_ref, b.user_id, b.vendor_id, b.package_id, b.selected_date,
           b.total_amount, b.booking_status, b.payment_status, b.settlement_done, b.created_at,
           p.id AS resolved_package_id, p.name AS package_name, p.duration_days,
           v.name AS vendor_name, u.name AS user_name
    FROM bookings b
    LEFT JOIN packages p ON p.id = b.package_id
    LEFT JOIN vendors v ON v.id = b.vendor_id
    LEFT JOIN users u ON u.id = b.user_id
"#;

// Postgres repository
pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn insert(&self, booking: NewBooking) -> AppResult<Booking> {
        let query = format!(
            r#"
            INSERT INTO bookings
                (id, booking_ref, user_id, vendor_id, package_id, selected_date, total_amount,
                 booking_status, payment_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'upcoming', 'paid')
            RETURNING {BOOKING_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, Booking>(&query)
            .bind(Uuid::new_v4())
            .bind(&booking.booking_ref)
            .bind(booking.user_id)
            .bind(booking.vendor_id)
            .bind(booking.package_id)
            .bind(booking.selected_date)
            .bind(booking.total_amount)
            .fetch_one(&self.pool)
            .await?;
        Ok(inserted)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Booking>> {
        let query = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1");
        let booking = sqlx::query_as::<_, Booking>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(booking)
    }

    async fn find_by_ref(&self, booking_ref: &str) -> AppResult<Vec<Booking>> {
        let query = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_ref = $1 ORDER BY selected_date"
        );
        let bookings = sqlx::query_as::<_, Booking>(&query)
            .bind(booking_ref)
            .fetch_all(&self.pool)
            .await?;
        Ok(bookings)
    }

    async fn find_by_vendor(&self, vendor_id: Uuid) -> AppResult<Vec<Booking>> {
        let query = format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE vendor_id = $1 ORDER BY selected_date DESC"
        );
        let bookings = sqlx::query_as::<_, Booking>(&query)
            .bind(vendor_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(bookings)
    }

    async fn find_completed_but_unsettled(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<SettlementCandidate>> {
        let query = format!(
            r#"
            {CANDIDATE_SELECT}
            WHERE b.settlement_done = FALSE
              AND b.booking_status IN ('upcoming', 'ongoing')
              AND b.payment_status = 'paid'
              AND (p.id IS NULL OR b.selected_date + make_interval(days => p.duration_days) <= $1)
            ORDER BY b.booking_ref, b.selected_date
            "#
        );
        let rows = sqlx::query_as::<_, CandidateRow>(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(SettlementCandidate::from).collect())
    }

    async fn settlement_view(&self, booking_ref: &str) -> AppResult<Vec<SettlementCandidate>> {
        let query = format!("{CANDIDATE_SELECT} WHERE b.booking_ref = $1 ORDER BY b.selected_date");
        let rows = sqlx::query_as::<_, CandidateRow>(&query)
            .bind(booking_ref)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(SettlementCandidate::from).collect())
    }

    async fn mark_settled(&self, id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings
            SET settlement_done = TRUE, booking_status = 'completed', updated_at = NOW()
            WHERE id = $1 AND booking_status <> 'cancelled'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::BookingNotFound);
        }
        Ok(())
    }

    async fn cancel(&self, id: Uuid, now: DateTime<Utc>) -> AppResult<Booking> {
        let query = format!(
            r#"
            UPDATE bookings
            SET booking_status = 'cancelled', payment_status = 'refunded', updated_at = NOW()
            WHERE id = $1 AND booking_status = 'upcoming' AND selected_date > $2
            RETURNING {BOOKING_COLUMNS}
            "#
        );
        let cancelled = sqlx::query_as::<_, Booking>(&query)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        match cancelled {
            Some(booking) => Ok(booking),
            None => {
                let current = self.find_by_id(id).await?;
                Err(cancellation_refusal(current.as_ref()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn booking(selected_date: DateTime<Utc>, status: BookingStatus) -> Booking {
        Booking {
            id: Uuid::new_v4(),
            booking_ref: "BK-1001".to_string(),
            user_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            package_id: Uuid::new_v4(),
            selected_date,
            total_amount: 1000,
            booking_status: status,
            payment_status: PaymentStatus::Paid,
            settlement_done: false,
            created_at: selected_date,
        }
    }

    #[test]
    fn trip_end_adds_package_duration() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let b = booking(start, BookingStatus::Upcoming);
        assert_eq!(b.trip_end(4), start + Duration::days(4));

        let candidate = SettlementCandidate {
            booking: b,
            package: None,
            vendor_name: None,
            user_name: None,
        };
        assert_eq!(candidate.trip_end(), None);
    }

    #[test]
    fn only_future_upcoming_bookings_are_cancellable() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        assert!(booking(now + Duration::days(1), BookingStatus::Upcoming).is_cancellable(now));
        assert!(!booking(now - Duration::days(1), BookingStatus::Upcoming).is_cancellable(now));
        assert!(!booking(now + Duration::days(1), BookingStatus::Cancelled).is_cancellable(now));
    }

    #[test]
    fn refusal_distinguishes_past_from_missing() {
        let now = Utc::now();
        let past = booking(now - Duration::days(2), BookingStatus::Upcoming);
        let cancelled = booking(now + Duration::days(2), BookingStatus::Cancelled);

        assert!(matches!(cancellation_refusal(Some(&past)), AppError::PastBookingCancellation));
        assert!(matches!(cancellation_refusal(Some(&cancelled)), AppError::BookingNotFound));
        assert!(matches!(cancellation_refusal(None), AppError::BookingNotFound));
    }
}
