mod support;

use chrono::Utc;

use support::{days_ago, days_ahead, TestApp};
use trip_ledger::db::booking::BookingStore;
use trip_ledger::db::wallet::{TransactionStatus, TransactionType, WalletOwner, WalletStore};
use trip_ledger::error::AppError;
use trip_ledger::services::SettleRequest;

async fn count(app: &TestApp, owner: WalletOwner, kind: TransactionType) -> usize {
    app.wallets
        .transactions(owner)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.transaction_type == kind)
        .count()
}

#[tokio::test]
async fn finished_trip_pays_vendor_ninety_percent() {
    let app = TestApp::new();
    let booking = app.paid_trip("BK-100", days_ago(6), 5, 1000).await;

    let report = app.settlement.run_tick(Utc::now()).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 0);

    let vendor = WalletOwner::vendor(booking.vendor_id);
    assert_eq!(app.wallets.balance(vendor).await, 900);
    // 1000 collected at payment, 900 paid out
    assert_eq!(app.wallets.balance(app.admin()).await, 100);

    let credit = app
        .wallets
        .find_transaction(vendor, TransactionType::Credit, &booking.id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credit.description, "Trip completed earning");
    assert_eq!(credit.amount, 900);

    let stored = app.stored(booking.id).await;
    assert!(stored.settlement_done);

    let gate = app
        .wallets
        .find_transaction_by_ref(app.admin(), "BK-100")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gate.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn repeated_ticks_settle_once() {
    let app = TestApp::new();
    let booking = app.paid_trip("BK-101", days_ago(10), 3, 1000).await;

    for _ in 0..5 {
        app.settlement.run_tick(Utc::now()).await.unwrap();
    }

    let vendor = WalletOwner::vendor(booking.vendor_id);
    assert_eq!(count(&app, app.admin(), TransactionType::Debit).await, 1);
    assert_eq!(count(&app, vendor, TransactionType::Credit).await, 1);
    assert_eq!(app.wallets.balance(vendor).await, 900);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_ticks_settle_once() {
    let app = TestApp::new();
    let mut bookings = Vec::new();
    for n in 0..6 {
        bookings.push(app.paid_trip(&format!("BK-2{n:02}"), days_ago(9), 2, 500).await);
    }

    let now = Utc::now();
    let ticks: Vec<_> = (0..4)
        .map(|_| {
            let engine = app.settlement.clone();
            tokio::spawn(async move { engine.run_tick(now).await })
        })
        .collect();
    for tick in ticks {
        tick.await.unwrap().unwrap();
    }

    assert_eq!(count(&app, app.admin(), TransactionType::Debit).await, bookings.len());
    for booking in &bookings {
        let vendor = WalletOwner::vendor(booking.vendor_id);
        assert_eq!(count(&app, vendor, TransactionType::Credit).await, 1);
        assert_eq!(app.wallets.balance(vendor).await, 450);
        assert!(app.stored(booking.id).await.settlement_done);
    }
}

#[tokio::test]
async fn trip_still_running_is_left_alone() {
    let app = TestApp::new();
    let booking = app.paid_trip("BK-102", days_ago(2), 5, 1000).await;

    let report = app.settlement.run_tick(Utc::now()).await.unwrap();
    assert_eq!(report.settled, 0);

    assert_eq!(app.wallets.balance(WalletOwner::vendor(booking.vendor_id)).await, 0);
    assert_eq!(count(&app, app.admin(), TransactionType::Debit).await, 0);
    assert!(!app.stored(booking.id).await.settlement_done);
}

#[tokio::test]
async fn booking_without_clearing_record_is_skipped() {
    let app = TestApp::new();
    let package = app.bookings.add_package("City walk", 1).await;
    let vendor_id = app.bookings.add_vendor("Old Town Guides").await;
    let user_id = app.bookings.add_user("Kim").await;
    let booking = app
        .bookings
        .insert(trip_ledger::db::booking::NewBooking {
            booking_ref: "BK-UNPAID".into(),
            user_id,
            vendor_id,
            package_id: package.id,
            selected_date: days_ago(3),
            total_amount: 800,
        })
        .await
        .unwrap();

    let report = app.settlement.run_tick(Utc::now()).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(app.wallets.balance(WalletOwner::vendor(vendor_id)).await, 0);
    assert!(!app.stored(booking.id).await.settlement_done);
}

#[tokio::test]
async fn one_failing_booking_does_not_block_the_batch() {
    let app = TestApp::new();
    let broken = app.paid_trip("BK-103", days_ago(8), 2, 1000).await;
    let healthy = app.paid_trip("BK-104", days_ago(8), 2, 2000).await;
    let orphan = app.paid_trip("BK-105", days_ago(8), 2, 300).await;
    app.bookings.remove_package(orphan.package_id).await;

    let broken_vendor = WalletOwner::vendor(broken.vendor_id);
    app.wallets.fail_appends_for(broken_vendor).await;

    let report = app.settlement.run_tick(Utc::now()).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(app.wallets.balance(WalletOwner::vendor(healthy.vendor_id)).await, 1800);
    assert!(!app.stored(broken.id).await.settlement_done);
    assert!(!app.stored(orphan.id).await.settlement_done);

    // the next tick resumes after the admin debit that already went through
    app.wallets.restore_appends_for(broken_vendor).await;
    let report = app.settlement.run_tick(Utc::now()).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(app.wallets.balance(broken_vendor).await, 900);
    assert_eq!(count(&app, app.admin(), TransactionType::Debit).await, 2);
}

#[tokio::test]
async fn multi_leg_reference_closes_after_last_leg() {
    let app = TestApp::new();
    let legs = app
        .paid_legs("BK-106", &[(days_ago(6), 3, 1000), (days_ago(1), 4, 500)])
        .await;

    let report = app.settlement.run_tick(Utc::now()).await.unwrap();
    assert_eq!(report.settled, 1);
    assert!(!app.stored(legs[1].id).await.settlement_done);
    let gate = app
        .wallets
        .find_transaction_by_ref(app.admin(), "BK-106")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gate.status, TransactionStatus::Pending);

    let later = days_ahead(4);
    let report = app.settlement.run_tick(later).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(app.wallets.balance(WalletOwner::vendor(legs[0].vendor_id)).await, 900);
    assert_eq!(app.wallets.balance(WalletOwner::vendor(legs[1].vendor_id)).await, 450);

    let gate = app
        .wallets
        .find_transaction_by_ref(app.admin(), "BK-106")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gate.status, TransactionStatus::Completed);
}

#[tokio::test]
async fn manual_settlement_checks_the_total() {
    let app = TestApp::new();
    let booking = app.paid_trip("BK-107", days_ago(5), 2, 1200).await;

    let mismatch = SettleRequest {
        booking_id: "BK-107".into(),
        vendor_id: Some(booking.vendor_id),
        admin_id: None,
        total_amount: Some(1000),
    };
    assert!(matches!(
        app.settlement.settle_reference(&mismatch, Utc::now()).await,
        Err(AppError::BadRequest(_))
    ));

    let request = SettleRequest {
        total_amount: Some(1200),
        ..mismatch
    };
    let report = app.settlement.settle_reference(&request, Utc::now()).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(app.wallets.balance(WalletOwner::vendor(booking.vendor_id)).await, 1080);

    // settling it again is a no-op
    let report = app.settlement.settle_reference(&request, Utc::now()).await.unwrap();
    assert_eq!(report.settled, 0);
    assert_eq!(count(&app, app.admin(), TransactionType::Debit).await, 1);
}

#[tokio::test]
async fn unknown_reference_is_not_found() {
    let app = TestApp::new();
    let request = SettleRequest {
        booking_id: "BK-NOPE".into(),
        vendor_id: None,
        admin_id: None,
        total_amount: None,
    };
    assert!(matches!(
        app.settlement.settle_reference(&request, Utc::now()).await,
        Err(AppError::BookingNotFound)
    ));
}

#[tokio::test]
async fn cancelled_booking_is_refunded_and_never_settled() {
    let app = TestApp::new();
    let booking = app.paid_trip("BK-108", days_ahead(2), 1, 640).await;

    app.booking_service
        .refund_booking(booking.id, Utc::now())
        .await
        .unwrap();
    assert_eq!(app.wallets.balance(WalletOwner::user(booking.user_id)).await, 640);

    let report = app.settlement.run_tick(days_ahead(10)).await.unwrap();
    assert_eq!(report.settled, 0);
    assert_eq!(app.wallets.balance(WalletOwner::vendor(booking.vendor_id)).await, 0);
}

#[tokio::test]
async fn one_unit_booking_settles_without_payout() {
    let app = TestApp::new();
    let booking = app.paid_trip("BK-109", days_ago(5), 2, 1).await;

    let report = app.settlement.run_tick(Utc::now()).await.unwrap();
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 0);

    assert!(app.stored(booking.id).await.settlement_done);
    assert_eq!(app.wallets.balance(WalletOwner::vendor(booking.vendor_id)).await, 0);
    assert_eq!(count(&app, app.admin(), TransactionType::Debit).await, 0);
    assert_eq!(app.wallets.balance(app.admin()).await, 1);

    let gate = app
        .wallets
        .find_transaction_by_ref(app.admin(), "BK-109")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(gate.status, TransactionStatus::Completed);

    let report = app.settlement.run_tick(Utc::now()).await.unwrap();
    assert_eq!(report.settled, 0);
    assert_eq!(report.failed, 0);
}
