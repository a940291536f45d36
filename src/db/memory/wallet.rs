use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::db::wallet::{
    NewTransaction, Transaction, TransactionStatus, TransactionType, Wallet, WalletOwner,
    WalletStore,
};
use crate::error::{AppError, AppResult};

/// Wallet store kept in memory. Each mutation runs under a single write lock.
#[derive(Default)]
pub struct MemoryWalletStore {
    wallets: RwLock<HashMap<WalletOwner, Wallet>>,
    failing_owners: RwLock<HashSet<WalletOwner>>,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every append to `owner` fail, simulating a storage outage for that wallet.
    pub async fn fail_appends_for(&self, owner: WalletOwner) {
        self.failing_owners.write().await.insert(owner);
    }

    pub async fn restore_appends_for(&self, owner: WalletOwner) {
        self.failing_owners.write().await.remove(&owner);
    }

    pub async fn balance(&self, owner: WalletOwner) -> i64 {
        self.wallets
            .read()
            .await
            .get(&owner)
            .map(|w| w.balance)
            .unwrap_or(0)
    }

    fn empty_wallet(owner: WalletOwner) -> Wallet {
        Wallet {
            id: Uuid::new_v4(),
            owner_id: owner.id,
            owner_type: owner.owner_type,
            balance: 0,
            created_at: Utc::now(),
            transactions: Vec::new(),
        }
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn get_or_create(&self, owner: WalletOwner) -> AppResult<Wallet> {
        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .entry(owner)
            .or_insert_with(|| Self::empty_wallet(owner));
        Ok(wallet.clone())
    }

    async fn append(&self, owner: WalletOwner, entry: NewTransaction) -> AppResult<Transaction> {
        entry.validate()?;

        if self.failing_owners.read().await.contains(&owner) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut wallets = self.wallets.write().await;
        let wallet = wallets
            .entry(owner)
            .or_insert_with(|| Self::empty_wallet(owner));

        if let Some(ref_id) = entry.ref_id.as_deref() {
            let taken = wallet.transactions.iter().any(|tx| {
                tx.transaction_type == entry.transaction_type && tx.ref_id.as_deref() == Some(ref_id)
            });
            if taken {
                return Err(AppError::DuplicateReference(ref_id.to_string()));
            }
        }

        let next_balance = wallet
            .balance
            .checked_add(entry.delta())
            .ok_or(AppError::InvalidAmount(entry.amount))?;
        if next_balance < 0 && entry.delta() < 0 && !owner.may_overdraw() {
            return Err(AppError::InsufficientFunds {
                owner_id: owner.id,
                owner_type: owner.owner_type,
            });
        }

        let transaction = Transaction {
            id: Uuid::new_v4(),
            transaction_type: entry.transaction_type,
            amount: entry.amount,
            description: entry.description,
            ref_id: entry.ref_id,
            status: entry.status,
            created_at: Utc::now(),
        };
        wallet.balance = next_balance;
        wallet.transactions.push(transaction.clone());
        Ok(transaction)
    }

    async fn find_transaction_by_ref(
        &self,
        owner: WalletOwner,
        ref_id: &str,
    ) -> AppResult<Option<Transaction>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(&owner).and_then(|w| {
            w.transactions
                .iter()
                .find(|tx| tx.ref_id.as_deref() == Some(ref_id))
                .cloned()
        }))
    }

    async fn find_transaction(
        &self,
        owner: WalletOwner,
        transaction_type: TransactionType,
        ref_id: &str,
    ) -> AppResult<Option<Transaction>> {
        let wallets = self.wallets.read().await;
        Ok(wallets.get(&owner).and_then(|w| {
            w.transactions
                .iter()
                .find(|tx| {
                    tx.transaction_type == transaction_type && tx.ref_id.as_deref() == Some(ref_id)
                })
                .cloned()
        }))
    }

    async fn set_transaction_status(
        &self,
        owner: WalletOwner,
        ref_id: &str,
        status: TransactionStatus,
    ) -> AppResult<u64> {
        let mut wallets = self.wallets.write().await;
        let Some(wallet) = wallets.get_mut(&owner) else {
            return Ok(0);
        };

        let mut changed = 0;
        for tx in wallet
            .transactions
            .iter_mut()
            .filter(|tx| tx.ref_id.as_deref() == Some(ref_id) && tx.status != status)
        {
            tx.status = status;
            changed += 1;
        }
        Ok(changed)
    }

    async fn transactions(&self, owner: WalletOwner) -> AppResult<Vec<Transaction>> {
        let wallets = self.wallets.read().await;
        Ok(wallets
            .get(&owner)
            .map(|w| w.transactions.clone())
            .unwrap_or_default())
    }
}
