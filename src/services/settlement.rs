//! Settlement of finished trips from the clearing wallet to vendor wallets.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::booking::{BookingStatus, BookingStore, PaymentStatus, SettlementCandidate};
use crate::db::wallet::{
    Transaction, TransactionStatus, TransactionType, WalletOwner, WalletStore,
};
use crate::error::{AppError, AppResult};

/// Share of a booking paid out to the vendor; the remainder is platform commission.
pub const VENDOR_SHARE_PERCENT: i64 = 90;

pub const VENDOR_EARNING_DESCRIPTION: &str = "Trip completed earning";

/// Vendor payout for a booking total, rounded down to whole currency units.
///
/// A one-unit booking floors to a zero share; the whole amount stays as commission.
pub fn vendor_share(total_amount: i64) -> AppResult<i64> {
    if total_amount <= 0 {
        return Err(AppError::InvalidAmount(total_amount));
    }
    (Decimal::from(total_amount) * Decimal::from(VENDOR_SHARE_PERCENT) / Decimal::ONE_HUNDRED)
        .floor()
        .to_i64()
        .ok_or(AppError::InvalidAmount(total_amount))
}

/// What happened to one booking during a settlement pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    Settled,
    NotDue,
    /// No clearing record exists for the reference; nothing was ever charged here.
    NoClearingRecord,
    AlreadySettled,
    Ineligible,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub settled: usize,
    pub not_due: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SettlementReport {
    fn record(&mut self, outcome: SettlementOutcome) {
        match outcome {
            SettlementOutcome::Settled => self.settled += 1,
            SettlementOutcome::NotDue => self.not_due += 1,
            SettlementOutcome::NoClearingRecord
            | SettlementOutcome::AlreadySettled
            | SettlementOutcome::Ineligible => self.skipped += 1,
        }
    }

    fn merge(&mut self, other: SettlementReport) {
        self.settled += other.settled;
        self.not_due += other.not_due;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Manual settlement of one booking reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    /// Settlement reference shared by the bookings to settle.
    pub booking_id: String,
    pub vendor_id: Option<Uuid>,
    pub admin_id: Option<Uuid>,
    pub total_amount: Option<i64>,
}

pub struct SettlementEngine {
    wallets: Arc<dyn WalletStore>,
    bookings: Arc<dyn BookingStore>,
    admin_id: Uuid,
}

impl SettlementEngine {
    pub fn new(wallets: Arc<dyn WalletStore>, bookings: Arc<dyn BookingStore>, admin_id: Uuid) -> Self {
        Self {
            wallets,
            bookings,
            admin_id,
        }
    }

    /// One scheduler tick: settles every finished, unsettled booking.
    ///
    /// Only the initial scan can fail the tick; a failure on any single booking is
    /// logged and counted, and the rest of the batch carries on.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> AppResult<SettlementReport> {
        let candidates = self.bookings.find_completed_but_unsettled(now).await?;

        let mut groups: BTreeMap<String, Vec<SettlementCandidate>> = BTreeMap::new();
        for candidate in candidates {
            groups
                .entry(candidate.booking.booking_ref.clone())
                .or_default()
                .push(candidate);
        }

        let admin = WalletOwner::admin(self.admin_id);
        let mut report = SettlementReport::default();
        for (reference, group) in &groups {
            report.merge(self.settle_group(admin, reference, group, now).await);
        }

        info!(
            groups = groups.len(),
            settled = report.settled,
            not_due = report.not_due,
            skipped = report.skipped,
            failed = report.failed,
            "settlement tick finished"
        );
        Ok(report)
    }

    /// Settles a single reference on demand.
    pub async fn settle_reference(
        &self,
        request: &SettleRequest,
        now: DateTime<Utc>,
    ) -> AppResult<SettlementReport> {
        let mut group = self.bookings.settlement_view(&request.booking_id).await?;
        if let Some(vendor_id) = request.vendor_id {
            group.retain(|c| c.booking.vendor_id == vendor_id);
        }
        if group.is_empty() {
            return Err(AppError::BookingNotFound);
        }

        if let Some(expected) = request.total_amount {
            let actual: i64 = group
                .iter()
                .filter(|c| c.booking.booking_status != BookingStatus::Cancelled)
                .map(|c| c.booking.total_amount)
                .sum();
            if expected != actual {
                warn!(reference = %request.booking_id, expected, actual, "settlement amount mismatch");
                return Err(AppError::BadRequest(format!(
                    "total amount {expected} does not match booking total {actual}"
                )));
            }
        }

        let admin = WalletOwner::admin(request.admin_id.unwrap_or(self.admin_id));
        let report = self.settle_group(admin, &request.booking_id, &group, now).await;
        info!(
            reference = %request.booking_id,
            settled = report.settled,
            failed = report.failed,
            "manual settlement finished"
        );
        Ok(report)
    }

    async fn settle_group(
        &self,
        admin: WalletOwner,
        reference: &str,
        group: &[SettlementCandidate],
        now: DateTime<Utc>,
    ) -> SettlementReport {
        let mut report = SettlementReport::default();

        for candidate in group {
            let booking_id = candidate.booking.id;
            match self.settle_booking(admin, reference, candidate, now).await {
                Ok(outcome) => {
                    debug!(%booking_id, reference, ?outcome, "booking processed");
                    report.record(outcome);
                }
                Err(err) => {
                    error!(%booking_id, reference, error = %err, "booking settlement failed");
                    report.failed += 1;
                }
            }
        }

        // also reached after a crash that settled the last leg but left the gate open
        if let Err(err) = self.close_gate(admin, reference).await {
            error!(reference, error = %err, "failed to close settlement reference");
            report.failed += 1;
        }
        report
    }

    async fn settle_booking(
        &self,
        admin: WalletOwner,
        reference: &str,
        candidate: &SettlementCandidate,
        now: DateTime<Utc>,
    ) -> AppResult<SettlementOutcome> {
        let booking = &candidate.booking;
        if booking.settlement_done {
            return Ok(SettlementOutcome::AlreadySettled);
        }
        if booking.booking_status == BookingStatus::Cancelled
            || booking.payment_status != PaymentStatus::Paid
        {
            return Ok(SettlementOutcome::Ineligible);
        }

        let package = candidate
            .package
            .as_ref()
            .ok_or(AppError::PackageNotFound(booking.id))?;
        if now < booking.trip_end(package.duration_days) {
            return Ok(SettlementOutcome::NotDue);
        }

        let vendor_name = candidate
            .vendor_name
            .as_deref()
            .ok_or(AppError::DirectoryEntryNotFound {
                kind: "vendor",
                id: booking.vendor_id,
            })?;
        let user_name = candidate
            .user_name
            .as_deref()
            .ok_or(AppError::DirectoryEntryNotFound {
                kind: "user",
                id: booking.user_id,
            })?;

        // gate: evaluated here, right before the writes, never cached across bookings
        let Some(gate) = self.wallets.find_transaction_by_ref(admin, reference).await? else {
            return Ok(SettlementOutcome::NoClearingRecord);
        };
        if gate.status == TransactionStatus::Completed {
            return Ok(SettlementOutcome::AlreadySettled);
        }

        let amount = vendor_share(booking.total_amount)?;
        if amount == 0 {
            self.bookings.mark_settled(booking.id).await?;
            info!(booking_id = %booking.id, total = booking.total_amount, "booking settled with no vendor payout");
            return Ok(SettlementOutcome::Settled);
        }

        let payout_ref = booking.id.to_string();
        let vendor = WalletOwner::vendor(booking.vendor_id);

        if self
            .wallets
            .find_transaction(admin, TransactionType::Debit, &payout_ref)
            .await?
            .is_none()
        {
            let description = format!(
                "Payout to vendor {vendor_name} for trip booked by {user_name} ({})",
                package.name
            );
            already_applied(
                self.wallets
                    .debit(admin, amount, &description, Some(&payout_ref))
                    .await,
            )?;
        }

        if self
            .wallets
            .find_transaction(vendor, TransactionType::Credit, &payout_ref)
            .await?
            .is_none()
        {
            already_applied(
                self.wallets
                    .credit(vendor, amount, VENDOR_EARNING_DESCRIPTION, Some(&payout_ref))
                    .await,
            )?;
        }

        self.bookings.mark_settled(booking.id).await?;
        info!(booking_id = %booking.id, vendor_id = %booking.vendor_id, amount, "booking settled");
        Ok(SettlementOutcome::Settled)
    }

    /// Marks the clearing record completed once no leg of the reference is left open.
    async fn close_gate(&self, admin: WalletOwner, reference: &str) -> AppResult<()> {
        let legs = self.bookings.find_by_ref(reference).await?;
        let open = legs
            .iter()
            .any(|b| !b.settlement_done && b.booking_status != BookingStatus::Cancelled);
        if open {
            return Ok(());
        }

        self.wallets
            .set_transaction_status(admin, reference, TransactionStatus::Completed)
            .await?;
        Ok(())
    }
}

/// A duplicate reference means a concurrent or earlier pass already wrote this entry.
fn already_applied(result: AppResult<Transaction>) -> AppResult<()> {
    match result {
        Ok(_) => Ok(()),
        Err(AppError::DuplicateReference(reference)) => {
            debug!(reference, "ledger entry already recorded");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
