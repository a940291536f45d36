use proptest::prelude::*;
use uuid::Uuid;

use trip_ledger::db::memory::MemoryWalletStore;
use trip_ledger::db::wallet::{OwnerType, WalletOwner, WalletStore};
use trip_ledger::error::AppError;
use trip_ledger::services::settlement::vendor_share;

#[derive(Debug, Clone)]
enum Op {
    Credit(i64),
    Debit(i64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-5i64..2_000).prop_map(Op::Credit),
        (-5i64..2_000).prop_map(Op::Debit),
    ]
}

fn owner_strategy() -> impl Strategy<Value = OwnerType> {
    prop_oneof![
        Just(OwnerType::User),
        Just(OwnerType::Vendor),
        Just(OwnerType::Admin)
    ]
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime")
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn balance_equals_credits_minus_debits(
        owner_type in owner_strategy(),
        ops in proptest::collection::vec(op_strategy(), 0..40),
    ) {
        let (wallet, no_unexpected_errors) = block_on(async {
            let store = MemoryWalletStore::new();
            let owner = WalletOwner::new(Uuid::new_v4(), owner_type);
            let mut clean = true;

            for op in &ops {
                let result = match op {
                    Op::Credit(amount) => store.credit(owner, *amount, "credit", None).await,
                    Op::Debit(amount) => store.debit(owner, *amount, "debit", None).await,
                };
                match result {
                    Ok(_) => {}
                    Err(AppError::InvalidAmount(_)) | Err(AppError::InsufficientFunds { .. }) => {}
                    Err(_) => clean = false,
                }
            }

            (store.get_or_create(owner).await.expect("wallet"), clean)
        });

        prop_assert!(no_unexpected_errors);
        prop_assert_eq!(wallet.balance, wallet.ledger_balance());
        if owner_type != OwnerType::Admin {
            prop_assert!(wallet.balance >= 0);
        }
    }

    #[test]
    fn vendor_share_never_exceeds_total(total in 1i64..10_000_000) {
        let share = vendor_share(total).expect("share of a positive total");
        prop_assert!(share < total);
        prop_assert_eq!(share, total * 90 / 100);
    }
}
