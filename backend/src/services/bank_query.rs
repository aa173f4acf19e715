//! # Bank Query Service
//!
//! Read-only views over an account: balances, reserved withdrawals and
//! recent history. Nothing here takes a lock or writes.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::store::{BankStore, StoreError};
use crate::models::{BankView, WithdrawalEntryResponse, WithdrawalSummary};

/// Errors that can occur while building a view.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The account lookup itself failed.
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Assembles [`BankView`]s and withdrawal summaries.
#[derive(Clone)]
pub struct BankQueryService {
    store: Arc<dyn BankStore>,
    /// Max pending entries and history events in a view.
    view_limit: usize,
}

impl BankQueryService {
    pub fn new(store: Arc<dyn BankStore>, view_limit: usize) -> Self {
        Self { store, view_limit }
    }

    /// Build the view for `address_or_id`.
    ///
    /// The balance, pending entries and history come from one
    /// [`BankStore::bank_snapshot`], so an in-flight reservation is never
    /// counted twice. An unknown account yields [`BankView::zeroed`]. A
    /// history read that fails is logged and shown as an empty list.
    pub async fn get_bank(&self, address_or_id: &str) -> Result<BankView, QueryError> {
        let snapshot = match self.store.bank_snapshot(address_or_id, self.view_limit).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No account for {}, returning zeroed view", address_or_id.trim());
                return Ok(BankView::zeroed());
            }
            Err(e) => {
                error!("Bank snapshot failed: {}", e);
                return Err(e.into());
            }
        };

        let account = snapshot.account;
        let history = snapshot.history.unwrap_or_else(|e| {
            warn!("History unreadable for {}: {}", account.user_id, e);
            Vec::new()
        });

        Ok(BankView {
            bank_cro: account.bank_cro,
            dirty_cro: account.dirty_cro,
            cro_withdrawn_total: account.cro_withdrawn_total,
            last_withdrawal: account.last_withdrawal,
            pending: snapshot
                .pending
                .iter()
                .map(WithdrawalEntryResponse::from)
                .collect(),
            history,
        })
    }

    /// Lifetime withdrawn total and the newest `limit` entries of any status.
    pub async fn withdrawal_summary(
        &self,
        address_or_id: &str,
        limit: usize,
    ) -> Result<WithdrawalSummary, QueryError> {
        let Some(account) = self.store.resolve_account(address_or_id).await? else {
            return Ok(WithdrawalSummary::empty());
        };

        let withdrawals = self
            .store
            .list_recent_withdrawals(&account.user_id, limit)
            .await?;

        Ok(WithdrawalSummary {
            cro_withdrawn_total: account.cro_withdrawn_total,
            withdrawals: withdrawals.iter().map(WithdrawalEntryResponse::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::db::{AccountRecord, HistoryEvent, HistoryEventType, WithdrawalStatus};
    use crate::db::WithdrawalRecord;
    use crate::services::reservation::tests::flaky_store;
    use crate::store::{
        BankSnapshot, MemoryBankStore, ReserveOutcome, ReserveWithdrawal, TransitionOutcome,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn cro(value: f64) -> Amount {
        Amount::from_float(value)
    }

    async fn reserve(store: &dyn BankStore, user_id: &str, amount: f64, now: i64) -> i64 {
        let outcome = store
            .reserve_withdrawal(&ReserveWithdrawal {
                user_id: user_id.to_string(),
                address: "0xabc".to_string(),
                amount: cro(amount),
                now,
                cooldown_secs: 0,
            })
            .await
            .unwrap();
        match outcome {
            ReserveOutcome::Reserved { withdrawal, .. } => withdrawal.id,
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    /// Commits a 2.0 reservation for `player-1` right after the first read
    /// it serves, landing between any two reads the caller makes.
    struct InterleavingStore {
        inner: MemoryBankStore,
        armed: AtomicBool,
    }

    impl InterleavingStore {
        async fn after_read(&self) {
            if self.armed.swap(false, Ordering::SeqCst) {
                reserve(&self.inner, "player-1", 2.0, 1000).await;
            }
        }
    }

    #[async_trait]
    impl BankStore for InterleavingStore {
        async fn resolve_account(
            &self,
            identifier: &str,
        ) -> Result<Option<AccountRecord>, StoreError> {
            let account = self.inner.resolve_account(identifier).await;
            self.after_read().await;
            account
        }

        async fn upsert_account(&self, account: &AccountRecord) -> Result<(), StoreError> {
            self.inner.upsert_account(account).await
        }

        async fn bank_snapshot(
            &self,
            identifier: &str,
            limit: usize,
        ) -> Result<Option<BankSnapshot>, StoreError> {
            let snapshot = self.inner.bank_snapshot(identifier, limit).await;
            self.after_read().await;
            snapshot
        }

        async fn reserve_withdrawal(
            &self,
            request: &ReserveWithdrawal,
        ) -> Result<ReserveOutcome, StoreError> {
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
            let entries = self.inner.list_active_withdrawals(user_id, address, limit).await;
            self.after_read().await;
            entries
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
            self.inner.append_history(user_id, event, max_retained).await
        }

        async fn recent_history(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<HistoryEvent>, StoreError> {
            let history = self.inner.recent_history(user_id, limit).await;
            self.after_read().await;
            history
        }

        async fn is_healthy(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn view_never_counts_a_reservation_twice() {
        let store = Arc::new(InterleavingStore {
            inner: MemoryBankStore::with_accounts([AccountRecord::new("player-1", cro(5.0))])
                .await,
            armed: AtomicBool::new(true),
        });
        let service = BankQueryService::new(store, 20);

        let view = service.get_bank("player-1").await.unwrap();
        let reserved = view.pending.iter().fold(Amount::ZERO, |acc, e| acc + e.amount);
        assert_eq!(view.bank_cro + reserved, cro(5.0));

        // The interleaved reservation is fully visible on the next read.
        let after = service.get_bank("player-1").await.unwrap();
        assert_eq!(after.bank_cro, cro(3.0));
        assert_eq!(after.pending.len(), 1);
        assert_eq!(after.pending[0].amount, cro(2.0));
    }

    #[tokio::test]
    async fn unknown_account_gets_zeroed_view() {
        let store = Arc::new(MemoryBankStore::new());
        let service = BankQueryService::new(store, 20);

        assert_eq!(service.get_bank("0xnobody").await.unwrap(), BankView::zeroed());
    }

    #[tokio::test]
    async fn view_lists_pending_and_history_newest_first() {
        let mut account = AccountRecord::new("player-1", cro(10.0)).with_wallet("0xABC");
        account.dirty_cro = cro(4.0);
        let store = Arc::new(MemoryBankStore::with_accounts([account]).await);

        let first = reserve(&*store, "player-1", 2.0, 1000).await;
        let second = reserve(&*store, "player-1", 3.0, 1100).await;
        for (amount, at) in [(2.0, 1000), (3.0, 1100)] {
            store
                .append_history(
                    "player-1",
                    &HistoryEvent::new(HistoryEventType::WithdrawRequest, cro(amount), at),
                    200,
                )
                .await
                .unwrap();
        }

        let service = BankQueryService::new(store, 20);
        let view = service.get_bank("0xabc").await.unwrap();

        assert_eq!(view.bank_cro, cro(5.0));
        assert_eq!(view.dirty_cro, cro(4.0));
        assert_eq!(view.last_withdrawal, 1100);
        assert_eq!(
            view.pending.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![second, first]
        );
        assert_eq!(view.history[0].created_at, 1100);
        assert_eq!(view.history[1].created_at, 1000);
    }

    #[tokio::test]
    async fn view_respects_limit() {
        let store = Arc::new(
            MemoryBankStore::with_accounts([AccountRecord::new("player-1", cro(100.0))]).await,
        );
        for i in 0..5 {
            reserve(&*store, "player-1", 1.0, 1000 + i).await;
        }

        let service = BankQueryService::new(store, 3);
        let view = service.get_bank("player-1").await.unwrap();
        assert_eq!(view.pending.len(), 3);
    }

    #[tokio::test]
    async fn unreadable_history_degrades_to_empty() {
        let store = flaky_store(vec![AccountRecord::new("player-1", cro(5.0))], false, true).await;
        let service = BankQueryService::new(store, 20);

        let view = service.get_bank("player-1").await.unwrap();
        assert_eq!(view.bank_cro, cro(5.0));
        assert!(view.history.is_empty());
    }

    #[tokio::test]
    async fn summary_includes_terminal_entries() {
        let store = Arc::new(
            MemoryBankStore::with_accounts([AccountRecord::new("player-1", cro(10.0))]).await,
        );
        let id = reserve(&*store, "player-1", 2.0, 1000).await;
        for next in [
            WithdrawalStatus::Queued,
            WithdrawalStatus::Processing,
            WithdrawalStatus::Completed,
        ] {
            store
                .transition_withdrawal(id, next, Some("0xhash"), 1200)
                .await
                .unwrap();
        }

        let service = BankQueryService::new(store, 20);
        let summary = service.withdrawal_summary("player-1", 10).await.unwrap();
        assert_eq!(summary.cro_withdrawn_total, cro(2.0));
        assert_eq!(summary.withdrawals.len(), 1);
        assert_eq!(summary.withdrawals[0].status, WithdrawalStatus::Completed);
        assert_eq!(summary.withdrawals[0].txhash.as_deref(), Some("0xhash"));

        let view = service.get_bank("player-1").await.unwrap();
        assert!(view.pending.is_empty());
    }

    #[tokio::test]
    async fn summary_for_unknown_account_is_empty() {
        let service = BankQueryService::new(Arc::new(MemoryBankStore::new()), 20);
        assert_eq!(
            service.withdrawal_summary("nobody", 10).await.unwrap(),
            WithdrawalSummary::empty()
        );
    }
}
