use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::utils::map_unique_violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    User,
    Vendor,
    Admin,
}

impl OwnerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerType::User => "user",
            OwnerType::Vendor => "vendor",
            OwnerType::Admin => "admin",
        }
    }
}

impl fmt::Display for OwnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

/// Key of a wallet: one wallet exists per (owner id, owner type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletOwner {
    pub id: Uuid,
    pub owner_type: OwnerType,
}

impl WalletOwner {
    pub fn new(id: Uuid, owner_type: OwnerType) -> Self {
        Self { id, owner_type }
    }

    pub fn user(id: Uuid) -> Self {
        Self::new(id, OwnerType::User)
    }

    pub fn vendor(id: Uuid) -> Self {
        Self::new(id, OwnerType::Vendor)
    }

    pub fn admin(id: Uuid) -> Self {
        Self::new(id, OwnerType::Admin)
    }

    /// The admin wallet is the platform's clearing account and may run negative.
    pub fn may_overdraw(&self) -> bool {
        self.owner_type == OwnerType::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub description: String,
    pub ref_id: Option<String>,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_type: OwnerType,
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub transactions: Vec<Transaction>,
}

impl Wallet {
    /// Balance recomputed from the transaction log.
    pub fn ledger_balance(&self) -> i64 {
        self.transactions
            .iter()
            .map(|tx| match tx.transaction_type {
                TransactionType::Credit => tx.amount,
                TransactionType::Debit => -tx.amount,
            })
            .sum()
    }

    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_balance()
    }
}

/// A transaction about to be appended to a wallet.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub description: String,
    pub ref_id: Option<String>,
    pub status: TransactionStatus,
}

impl NewTransaction {
    pub fn credit(amount: i64, description: impl Into<String>) -> Self {
        Self {
            transaction_type: TransactionType::Credit,
            amount,
            description: description.into(),
            ref_id: None,
            status: TransactionStatus::Completed,
        }
    }

    pub fn debit(amount: i64, description: impl Into<String>) -> Self {
        Self {
            transaction_type: TransactionType::Debit,
            ..Self::credit(amount, description)
        }
    }

    pub fn with_ref(mut self, ref_id: impl Into<String>) -> Self {
        self.ref_id = Some(ref_id.into());
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = TransactionStatus::Pending;
        self
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.amount <= 0 {
            return Err(AppError::InvalidAmount(self.amount));
        }
        Ok(())
    }

    /// Signed effect of this entry on the wallet balance.
    pub fn delta(&self) -> i64 {
        match self.transaction_type {
            TransactionType::Credit => self.amount,
            TransactionType::Debit => -self.amount,
        }
    }
}

/// Balance plus append-only transaction log per wallet owner.
///
/// Balance is only ever changed through [`WalletStore::append`], which records the
/// transaction and moves the balance in one atomic step. A reference id may appear at
/// most once per (wallet, transaction type); a repeat fails with
/// [`AppError::DuplicateReference`].
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get_or_create(&self, owner: WalletOwner) -> AppResult<Wallet>;

    async fn append(&self, owner: WalletOwner, entry: NewTransaction) -> AppResult<Transaction>;

    /// Earliest transaction carrying `ref_id`, of any type.
    async fn find_transaction_by_ref(
        &self,
        owner: WalletOwner,
        ref_id: &str,
    ) -> AppResult<Option<Transaction>>;

    async fn find_transaction(
        &self,
        owner: WalletOwner,
        transaction_type: TransactionType,
        ref_id: &str,
    ) -> AppResult<Option<Transaction>>;

    /// Returns how many transactions changed status.
    async fn set_transaction_status(
        &self,
        owner: WalletOwner,
        ref_id: &str,
        status: TransactionStatus,
    ) -> AppResult<u64>;

    async fn transactions(&self, owner: WalletOwner) -> AppResult<Vec<Transaction>>;

    async fn credit(
        &self,
        owner: WalletOwner,
        amount: i64,
        description: &str,
        ref_id: Option<&str>,
    ) -> AppResult<Transaction> {
        let mut entry = NewTransaction::credit(amount, description);
        entry.ref_id = ref_id.map(str::to_string);
        self.append(owner, entry).await
    }

    async fn debit(
        &self,
        owner: WalletOwner,
        amount: i64,
        description: &str,
        ref_id: Option<&str>,
    ) -> AppResult<Transaction> {
        let mut entry = NewTransaction::debit(amount, description);
        entry.ref_id = ref_id.map(str::to_string);
        self.append(owner, entry).await
    }
}

// Postgres repository
pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn ensure_wallet<'e, E>(executor: E, owner: WalletOwner) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner_id, owner_type)
            VALUES ($1, $2, $3)
            ON CONFLICT (owner_id, owner_type) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner.id)
        .bind(owner.owner_type)
        .execute(executor)
        .await?;
        Ok(())
    }
}

const TRANSACTION_COLUMNS: &str =
    "t.id, t.transaction_type, t.amount, t.description, t.ref_id, t.status, t.created_at";

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn get_or_create(&self, owner: WalletOwner) -> AppResult<Wallet> {
        Self::ensure_wallet(&self.pool, owner).await?;

        let mut wallet = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, owner_id, owner_type, balance, created_at
            FROM wallets
            WHERE owner_id = $1 AND owner_type = $2
            "#,
        )
        .bind(owner.id)
        .bind(owner.owner_type)
        .fetch_one(&self.pool)
        .await?;

        wallet.transactions = self.transactions(owner).await?;
        Ok(wallet)
    }

    async fn append(&self, owner: WalletOwner, entry: NewTransaction) -> AppResult<Transaction> {
        entry.validate()?;

        let mut tx = self.pool.begin().await?;
        Self::ensure_wallet(&mut *tx, owner).await?;

        // atomic increment; the guard rejects overdrafts on user and vendor wallets
        let wallet_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE wallets
            SET balance = balance + $1, updated_at = NOW()
            WHERE owner_id = $2 AND owner_type = $3
              AND ($1 >= 0 OR owner_type = 'admin' OR balance + $1 >= 0)
            RETURNING id
            "#,
        )
        .bind(entry.delta())
        .bind(owner.id)
        .bind(owner.owner_type)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(wallet_id) = wallet_id else {
            tracing::warn!(owner_id = %owner.id, owner_type = %owner.owner_type, amount = entry.amount, "debit rejected");
            return Err(AppError::InsufficientFunds {
                owner_id: owner.id,
                owner_type: owner.owner_type,
            });
        };

        let ref_id = entry.ref_id.clone();
        let transaction = sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO wallet_transactions
                (id, wallet_id, transaction_type, amount, description, ref_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, transaction_type, amount, description, ref_id, status, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(wallet_id)
        .bind(entry.transaction_type)
        .bind(entry.amount)
        .bind(&entry.description)
        .bind(&entry.ref_id)
        .bind(entry.status)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| {
            map_unique_violation(err, || {
                AppError::DuplicateReference(ref_id.unwrap_or_default())
            })
        })?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn find_transaction_by_ref(
        &self,
        owner: WalletOwner,
        ref_id: &str,
    ) -> AppResult<Option<Transaction>> {
        let query = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM wallet_transactions t
            INNER JOIN wallets w ON w.id = t.wallet_id
            WHERE w.owner_id = $1 AND w.owner_type = $2 AND t.ref_id = $3
            ORDER BY t.seq ASC
            LIMIT 1
            "#
        );
        let found = sqlx::query_as::<_, Transaction>(&query)
            .bind(owner.id)
            .bind(owner.owner_type)
            .bind(ref_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found)
    }

    async fn find_transaction(
        &self,
        owner: WalletOwner,
        transaction_type: TransactionType,
        ref_id: &str,
    ) -> AppResult<Option<Transaction>> {
        let query = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM wallet_transactions t
            INNER JOIN wallets w ON w.id = t.wallet_id
            WHERE w.owner_id = $1 AND w.owner_type = $2
              AND t.transaction_type = $3 AND t.ref_id = $4
            "#
        );
        let found = sqlx::query_as::<_, Transaction>(&query)
            .bind(owner.id)
            .bind(owner.owner_type)
            .bind(transaction_type)
            .bind(ref_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found)
    }

    async fn set_transaction_status(
        &self,
        owner: WalletOwner,
        ref_id: &str,
        status: TransactionStatus,
    ) -> AppResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE wallet_transactions t
            SET status = $4
            FROM wallets w
            WHERE w.id = t.wallet_id
              AND w.owner_id = $1 AND w.owner_type = $2
              AND t.ref_id = $3 AND t.status <> $4
            "#,
        )
        .bind(owner.id)
        .bind(owner.owner_type)
        .bind(ref_id)
        .bind(status)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn transactions(&self, owner: WalletOwner) -> AppResult<Vec<Transaction>> {
        let query = format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM wallet_transactions t
            INNER JOIN wallets w ON w.id = t.wallet_id
            WHERE w.owner_id = $1 AND w.owner_type = $2
            ORDER BY t.seq ASC
            "#
        );
        let rows = sqlx::query_as::<_, Transaction>(&query)
            .bind(owner.id)
            .bind(owner.owner_type)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
