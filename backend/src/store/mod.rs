//! # Bank Store
//!
//! The storage seam shared by the services. Accounts, their history log and
//! the withdrawal ledger are all reached through [`BankStore`].
//!
//! | Implementation | Backing | Used for |
//! |----------------|---------|----------|
//! | [`PgBankStore`] | PostgreSQL (deadpool) | production |
//! | [`MemoryBankStore`] | in-process maps | `STORAGE_BACKEND=memory`, tests |
//!
//! ## Atomic units
//!
//! Two operations change balances and must be all-or-nothing per account:
//!
//! - [`BankStore::reserve_withdrawal`]: debit + ledger insert
//! - [`BankStore::transition_withdrawal`]: status change + refund/total update
//!
//! Each implementation serializes them per account (row lock or mutex) and
//! re-checks the business rules against the locked state, so two concurrent
//! requests can never both spend the same balance.
//!
//! [`BankStore::bank_snapshot`] is the matching read: the account, its
//! active entries and its history come from one consistent view, so a
//! reservation is either fully visible in it or not at all.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::amount::Amount;
use crate::db::{AccountRecord, DatabaseError, HistoryEvent, WithdrawalRecord, WithdrawalStatus};
use crate::services::cooldown::{check_cooldown, CooldownDecision};

pub use memory::MemoryBankStore;
pub use postgres::PgBankStore;

/// Storage failures. All of them are safe to retry: an atomic unit that
/// fails leaves no partial effect behind.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A statement failed.
    #[error("Storage query failed: {0}")]
    Query(String),

    /// Stored data could not be decoded.
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::ConnectionError(msg) => StoreError::Unavailable(msg),
            DatabaseError::CorruptRow(msg) => StoreError::Corrupt(msg),
            other => StoreError::Query(other.to_string()),
        }
    }
}

/// Input of one reservation attempt.
#[derive(Debug, Clone)]
pub struct ReserveWithdrawal {
    pub user_id: String,
    /// Lowercased address recorded on the ledger entry.
    pub address: String,
    pub amount: Amount,
    /// Unix seconds; becomes `last_withdrawal` and `created_at`.
    pub now: i64,
    pub cooldown_secs: i64,
}

impl ReserveWithdrawal {
    /// Balance and cooldown rules, in the order they are reported.
    ///
    /// Runs once as a pre-check and again against the locked account.
    pub fn evaluate(&self, account: &AccountRecord) -> Result<(), Rejection> {
        if account.bank_cro < self.amount {
            return Err(Rejection::InsufficientBalance {
                available: account.bank_cro,
                requested: self.amount,
            });
        }

        match check_cooldown(account.last_withdrawal, self.now, self.cooldown_secs) {
            CooldownDecision::Allowed => Ok(()),
            CooldownDecision::Blocked { retry_after_secs } => {
                Err(Rejection::CooldownActive { retry_after_secs })
            }
        }
    }
}

/// A business rule refused the reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InsufficientBalance { available: Amount, requested: Amount },
    CooldownActive { retry_after_secs: i64 },
}

/// Result of [`BankStore::reserve_withdrawal`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// Balance debited and entry enqueued.
    Reserved {
        withdrawal: WithdrawalRecord,
        new_balance: Amount,
    },
    /// Nothing changed.
    Rejected(Rejection),
    /// The account disappeared between resolution and locking.
    AccountMissing,
}

/// Result of [`BankStore::transition_withdrawal`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// Status advanced and the balance side effect applied.
    Applied(WithdrawalRecord),
    /// Entry was already in the requested status; nothing changed.
    Unchanged(WithdrawalRecord),
    /// The requested edge is not part of the lifecycle.
    Invalid {
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },
    NotFound,
}

/// Account, active ledger entries and history read as one unit.
#[derive(Debug)]
pub struct BankSnapshot {
    pub account: AccountRecord,
    /// Non-terminal entries, newest first.
    pub pending: Vec<WithdrawalRecord>,
    /// Newest first. Kept separate so unreadable history does not hide the
    /// balance.
    pub history: Result<Vec<HistoryEvent>, StoreError>,
}

/// Decide what a status update does to an entry currently in `current`.
pub(crate) fn plan_transition(
    current: WithdrawalStatus,
    next: WithdrawalStatus,
) -> Result<bool, (WithdrawalStatus, WithdrawalStatus)> {
    if current == next {
        Ok(false)
    } else if current.can_transition_to(next) {
        Ok(true)
    } else {
        Err((current, next))
    }
}

/// Persistent state of the bank: accounts, history and the withdrawal ledger.
#[async_trait]
pub trait BankStore: Send + Sync {
    /// Find the account whose `user_id` or `linked_wallet` equals the
    /// identifier, ignoring case and surrounding whitespace.
    async fn resolve_account(&self, identifier: &str)
        -> Result<Option<AccountRecord>, StoreError>;

    /// Insert or replace an account. Provisioning hook; balances are
    /// otherwise only changed by the atomic units below.
    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), StoreError>;

    /// Resolve `identifier` and read everything the bank view shows from a
    /// single consistent state. Active entries also match `identifier` as
    /// an address.
    async fn bank_snapshot(
        &self,
        identifier: &str,
        limit: usize,
    ) -> Result<Option<BankSnapshot>, StoreError>;

    /// Debit the account and enqueue a `pending` entry as one unit.
    async fn reserve_withdrawal(
        &self,
        request: &ReserveWithdrawal,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Advance a ledger entry and apply its balance side effect as one unit.
    ///
    /// `completed` stores `txhash` and adds the amount to
    /// `cro_withdrawn_total`; `failed` credits the amount back to `bank_cro`.
    async fn transition_withdrawal(
        &self,
        id: i64,
        next: WithdrawalStatus,
        txhash: Option<&str>,
        now: i64,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Non-terminal entries owned by `user_id` or recorded under `address`,
    /// newest first.
    async fn list_active_withdrawals(
        &self,
        user_id: &str,
        address: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, StoreError>;

    /// Entries of any status owned by `user_id`, newest first.
    async fn list_recent_withdrawals(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, StoreError>;

    /// Append one event, keeping only the newest `max_retained`.
    async fn append_history(
        &self,
        user_id: &str,
        event: &HistoryEvent,
        max_retained: usize,
    ) -> Result<(), StoreError>;

    /// Newest-first history, at most `limit` events.
    async fn recent_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEvent>, StoreError>;

    /// Cheap liveness probe for `/health`.
    async fn is_healthy(&self) -> bool;
}

/// Parse a JSON array of accounts (`SEED_ACCOUNTS_FILE`).
pub fn parse_seed_accounts(json: &str) -> Result<Vec<AccountRecord>, StoreError> {
    serde_json::from_str(json)
        .map_err(|e| StoreError::Corrupt(format!("invalid seed accounts: {}", e)))
}

/// Upsert every seed account into `store`. Returns how many were written.
pub async fn seed_accounts(
    store: &dyn BankStore,
    accounts: &[AccountRecord],
) -> Result<usize, StoreError> {
    for account in accounts {
        store.upsert_account(account).await?;
    }
    Ok(accounts.len())
}
