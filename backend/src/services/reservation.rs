//! # Reservation Service
//!
//! Accepts a withdrawal request and reserves the funds for it.
//!
//! ## Flow
//!
//! ```text
//! 1. Validate amount (> 0, >= minimum)
//!                ↓
//! 2. Resolve account by wallet or user id
//!                ↓
//! 3. Pre-check balance and cooldown on the read copy
//!                ↓
//! 4. Store atomic unit: lock account, re-check, debit, insert `pending`
//!                ↓
//! 5. Append `withdraw_request` history (best effort)
//! ```
//!
//! The balance is debited when the request is accepted, not when the
//! payout completes. A slow or crashed payout leaves a `pending` entry
//! behind, never a second spend.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::amount::Amount;
use crate::config::AppConfig;
use crate::db::{HistoryEvent, HistoryEventType};
use crate::store::{BankStore, Rejection, ReserveOutcome, ReserveWithdrawal, StoreError};
use crate::utils::{normalize_identifier, truncate_string};

/// Errors that can occur when requesting a withdrawal.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    /// Amount is not positive or below the minimum.
    #[error("{0}")]
    Validation(String),

    /// No account for the given address or user id.
    #[error("Account not found: {0}")]
    NotFound(String),

    /// Not enough withdrawable balance.
    #[error("Insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance { available: Amount, requested: Amount },

    /// The previous withdrawal is too recent.
    #[error("Cooldown active. Try again in {retry_after_secs} seconds")]
    CooldownActive { retry_after_secs: i64 },

    /// Storage failed; nothing was changed and the request can be retried.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<Rejection> for ReservationError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::InsufficientBalance {
                available,
                requested,
            } => ReservationError::InsufficientBalance {
                available,
                requested,
            },
            Rejection::CooldownActive { retry_after_secs } => {
                ReservationError::CooldownActive { retry_after_secs }
            }
        }
    }
}

/// Limits applied to every reservation.
#[derive(Debug, Clone)]
pub struct ReservationPolicy {
    pub min_withdraw: Amount,
    pub cooldown_secs: i64,
    pub history_max_retained: usize,
}

impl ReservationPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            min_withdraw: config.min_withdraw,
            cooldown_secs: config.withdraw_cooldown_secs,
            history_max_retained: config.history_max_retained,
        }
    }
}

/// An accepted withdrawal.
#[derive(Debug, Clone, PartialEq)]
pub struct Reservation {
    pub withdrawal_id: i64,
    pub user_id: String,
    pub amount: Amount,
    pub new_balance: Amount,
}

/// Turns withdrawal requests into reserved ledger entries.
///
/// ## Usage
///
/// ```rust,ignore
/// let service = ReservationService::new(store, ReservationPolicy::from_config(&config));
/// let reservation = service
///     .request_withdraw("0xabc...", Amount::from_float(2.0), unix_now())
///     .await?;
/// ```
#[derive(Clone)]
pub struct ReservationService {
    store: Arc<dyn BankStore>,
    policy: ReservationPolicy,
}

impl ReservationService {
    pub fn new(store: Arc<dyn BankStore>, policy: ReservationPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Request a withdrawal of `amount` for the account named by
    /// `address_or_id`, as of unix time `now`.
    ///
    /// ## Returns
    ///
    /// * `Ok(Reservation)` - Funds debited and a `pending` entry enqueued
    /// * `Err(ReservationError)` - Nothing was changed
    pub async fn request_withdraw(
        &self,
        address_or_id: &str,
        amount: Amount,
        now: i64,
    ) -> Result<Reservation, ReservationError> {
        if !amount.is_positive() {
            return Err(ReservationError::Validation(
                "Amount must be greater than zero".to_string(),
            ));
        }
        if amount < self.policy.min_withdraw {
            return Err(ReservationError::Validation(format!(
                "Minimum withdrawal is {} CRO",
                self.policy.min_withdraw
            )));
        }

        let address = normalize_identifier(address_or_id);
        let account = self
            .store
            .resolve_account(&address)
            .await
            .map_err(|e| {
                error!("Account lookup failed for {}: {}", truncate_string(&address, 16), e);
                e
            })?
            .ok_or_else(|| ReservationError::NotFound(address_or_id.trim().to_string()))?;

        let request = ReserveWithdrawal {
            user_id: account.user_id.clone(),
            address,
            amount,
            now,
            cooldown_secs: self.policy.cooldown_secs,
        };

        if let Err(rejection) = request.evaluate(&account) {
            warn!(
                "Withdrawal rejected for {}: {:?}",
                account.user_id, rejection
            );
            return Err(rejection.into());
        }

        let outcome = self.store.reserve_withdrawal(&request).await.map_err(|e| {
            error!("Reservation failed for {}: {}", account.user_id, e);
            e
        })?;

        let (withdrawal, new_balance) = match outcome {
            ReserveOutcome::Reserved {
                withdrawal,
                new_balance,
            } => (withdrawal, new_balance),
            ReserveOutcome::Rejected(rejection) => {
                warn!(
                    "Withdrawal rejected under lock for {}: {:?}",
                    account.user_id, rejection
                );
                return Err(rejection.into());
            }
            ReserveOutcome::AccountMissing => {
                return Err(ReservationError::NotFound(address_or_id.trim().to_string()));
            }
        };

        info!(
            "Withdrawal {} reserved: {} CRO for {} (balance now {})",
            withdrawal.id, amount, account.user_id, new_balance
        );

        let event = HistoryEvent::new(HistoryEventType::WithdrawRequest, amount, now);
        if let Err(e) = self
            .store
            .append_history(&account.user_id, &event, self.policy.history_max_retained)
            .await
        {
            warn!(
                "History append failed for {} (withdrawal {}): {}",
                account.user_id, withdrawal.id, e
            );
        }

        Ok(Reservation {
            withdrawal_id: withdrawal.id,
            user_id: account.user_id,
            amount,
            new_balance,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{AccountRecord, WithdrawalRecord, WithdrawalStatus};
    use crate::store::{BankSnapshot, MemoryBankStore, TransitionOutcome};
    use async_trait::async_trait;
    use futures::future::join_all;
    use tokio::sync::Barrier;

    fn policy(cooldown_secs: i64) -> ReservationPolicy {
        ReservationPolicy {
            min_withdraw: Amount::from_float(1.0),
            cooldown_secs,
            history_max_retained: 200,
        }
    }

    async fn service_with(
        accounts: Vec<AccountRecord>,
        cooldown_secs: i64,
    ) -> (ReservationService, Arc<MemoryBankStore>) {
        let store = Arc::new(MemoryBankStore::with_accounts(accounts).await);
        let service = ReservationService::new(store.clone(), policy(cooldown_secs));
        (service, store)
    }

    fn cro(value: f64) -> Amount {
        Amount::from_float(value)
    }

    #[tokio::test]
    async fn worked_example() {
        let (service, store) = service_with(
            vec![AccountRecord::new("player-1", cro(5.0)).with_wallet("0xAbC")],
            1800,
        )
        .await;

        let reservation = service.request_withdraw("0xabc", cro(2.0), 1000).await.unwrap();
        assert_eq!(reservation.new_balance, cro(3.0));
        assert_eq!(reservation.user_id, "player-1");

        let pending = store
            .list_active_withdrawals("player-1", "0xabc", 20)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].amount, cro(2.0));
        assert_eq!(pending[0].status, WithdrawalStatus::Pending);
        assert_eq!(pending[0].id, reservation.withdrawal_id);

        let err = service.request_withdraw("0xABC", cro(1.0), 1500).await.unwrap_err();
        assert!(matches!(
            err,
            ReservationError::CooldownActive { retry_after_secs: 1300 }
        ));
        assert_eq!(err.to_string(), "Cooldown active. Try again in 1300 seconds");
    }

    #[tokio::test]
    async fn records_history_event() {
        let (service, store) =
            service_with(vec![AccountRecord::new("player-1", cro(5.0))], 1800).await;

        service.request_withdraw("player-1", cro(2.0), 1000).await.unwrap();

        let history = store.recent_history("player-1", 20).await.unwrap();
        assert_eq!(
            history,
            vec![HistoryEvent::new(HistoryEventType::WithdrawRequest, cro(2.0), 1000)]
        );
    }

    #[tokio::test]
    async fn insufficient_balance_changes_nothing() {
        let (service, store) =
            service_with(vec![AccountRecord::new("player-1", cro(1.5))], 1800).await;

        let err = service.request_withdraw("player-1", cro(2.0), 1000).await.unwrap_err();
        assert!(matches!(err, ReservationError::InsufficientBalance { .. }));

        let account = store.resolve_account("player-1").await.unwrap().unwrap();
        assert_eq!(account.bank_cro, cro(1.5));
        assert_eq!(account.last_withdrawal, 0);
        assert!(store
            .list_active_withdrawals("player-1", "", 20)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn allowed_again_after_cooldown() {
        let (service, _) =
            service_with(vec![AccountRecord::new("player-1", cro(5.0))], 1800).await;

        service.request_withdraw("player-1", cro(2.0), 1000).await.unwrap();
        let second = service.request_withdraw("player-1", cro(2.0), 2800).await.unwrap();
        assert_eq!(second.new_balance, cro(1.0));
    }

    #[tokio::test]
    async fn validation_errors() {
        let (service, _) =
            service_with(vec![AccountRecord::new("player-1", cro(5.0))], 1800).await;

        for amount in [0.0, -1.0, 0.5] {
            let err = service
                .request_withdraw("player-1", cro(amount), 1000)
                .await
                .unwrap_err();
            assert!(matches!(err, ReservationError::Validation(_)), "amount {}", amount);
        }

    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let (service, _) = service_with(vec![], 1800).await;
        for address in ["0xnobody", "   "] {
            let err = service.request_withdraw(address, cro(2.0), 1000).await.unwrap_err();
            assert!(matches!(err, ReservationError::NotFound(_)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_never_overspend() {
        const N: usize = 8;
        let (service, store) = service_with(
            vec![AccountRecord::new("player-1", cro(N as f64 - 1.0))],
            0,
        )
        .await;
        let barrier = Arc::new(Barrier::new(N));

        let handles = (0..N).map(|_| {
            let service = service.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                service.request_withdraw("player-1", cro(1.0), 1000).await
            })
        });
        let results: Vec<_> = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let accepted = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(ReservationError::InsufficientBalance { .. })))
            .count();
        assert_eq!(accepted, N - 1);
        assert_eq!(insufficient, 1);

        let account = store.resolve_account("player-1").await.unwrap().unwrap();
        assert_eq!(account.bank_cro, Amount::ZERO);
        assert_eq!(store.reserved_total("player-1").await, cro(N as f64 - 1.0));
    }

    /// Delegates to a memory store, failing the operations it is told to.
    pub(crate) struct FlakyStore {
        pub inner: MemoryBankStore,
        pub fail_reserve: bool,
        pub fail_history: bool,
    }

    #[async_trait]
    impl BankStore for FlakyStore {
        async fn resolve_account(
            &self,
            identifier: &str,
        ) -> Result<Option<AccountRecord>, StoreError> {
            self.inner.resolve_account(identifier).await
        }

        async fn upsert_account(&self, account: &AccountRecord) -> Result<(), StoreError> {
            self.inner.upsert_account(account).await
        }

        async fn bank_snapshot(
            &self,
            identifier: &str,
            limit: usize,
        ) -> Result<Option<BankSnapshot>, StoreError> {
            let mut snapshot = self.inner.bank_snapshot(identifier, limit).await?;
            if self.fail_history {
                if let Some(snapshot) = snapshot.as_mut() {
                    snapshot.history = Err(StoreError::Corrupt("bad history row".into()));
                }
            }
            Ok(snapshot)
        }

        async fn reserve_withdrawal(
            &self,
            request: &ReserveWithdrawal,
        ) -> Result<ReserveOutcome, StoreError> {
            if self.fail_reserve {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            self.inner.reserve_withdrawal(request).await
        }

        async fn transition_withdrawal(
            &self,
            id: i64,
            next: WithdrawalStatus,
            txhash: Option<&str>,
            now: i64,
        ) -> Result<TransitionOutcome, StoreError> {
            self.inner.transition_withdrawal(id, next, txhash, now).await
        }

        async fn list_active_withdrawals(
            &self,
            user_id: &str,
            address: &str,
            limit: usize,
        ) -> Result<Vec<WithdrawalRecord>, StoreError> {
            self.inner.list_active_withdrawals(user_id, address, limit).await
        }

        async fn list_recent_withdrawals(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<WithdrawalRecord>, StoreError> {
            self.inner.list_recent_withdrawals(user_id, limit).await
        }

        async fn append_history(
            &self,
            user_id: &str,
            event: &HistoryEvent,
            max_retained: usize,
        ) -> Result<(), StoreError> {
            if self.fail_history {
                return Err(StoreError::Query("history table locked".into()));
            }
            self.inner.append_history(user_id, event, max_retained).await
        }

        async fn recent_history(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<HistoryEvent>, StoreError> {
            if self.fail_history {
                return Err(StoreError::Corrupt("bad history row".into()));
            }
            self.inner.recent_history(user_id, limit).await
        }

        async fn is_healthy(&self) -> bool {
            !self.fail_reserve
        }
    }

    pub(crate) async fn flaky_store(
        accounts: Vec<AccountRecord>,
        fail_reserve: bool,
        fail_history: bool,
    ) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: MemoryBankStore::with_accounts(accounts).await,
            fail_reserve,
            fail_history,
        })
    }

    #[tokio::test]
    async fn history_failure_does_not_undo_reservation() {
        let store = flaky_store(vec![AccountRecord::new("player-1", cro(5.0))], false, true).await;
        let service = ReservationService::new(store.clone(), policy(1800));

        let reservation = service.request_withdraw("player-1", cro(2.0), 1000).await.unwrap();
        assert_eq!(reservation.new_balance, cro(3.0));

        let account = store.resolve_account("player-1").await.unwrap().unwrap();
        assert_eq!(account.bank_cro, cro(3.0));
    }

    #[tokio::test]
    async fn storage_failure_leaves_state_untouched() {
        let store = flaky_store(vec![AccountRecord::new("player-1", cro(5.0))], true, false).await;
        let service = ReservationService::new(store.clone(), policy(1800));

        let err = service.request_withdraw("player-1", cro(2.0), 1000).await.unwrap_err();
        assert!(matches!(err, ReservationError::Storage(StoreError::Unavailable(_))));

        let account = store.resolve_account("player-1").await.unwrap().unwrap();
        assert_eq!(account.bank_cro, cro(5.0));
        assert_eq!(account.last_withdrawal, 0);
    }
}
