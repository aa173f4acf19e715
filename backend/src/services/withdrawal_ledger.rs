//! # Withdrawal Ledger Service
//!
//! Entry point for the payout worker. The worker reports each status change
//! of a withdrawal it is paying out; this service validates the edge and
//! applies the balance side effect:
//!
//! | New status | Side effect |
//! |------------|-------------|
//! | `queued`, `processing` | none |
//! | `completed` | txhash stored, amount added to `cro_withdrawn_total` |
//! | `failed` | amount credited back to `bank_cro` |
//!
//! Reporting the status an entry already has is a no-op, so the worker can
//! safely retry after a timeout.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::db::{HistoryEvent, HistoryEventType, WithdrawalRecord, WithdrawalStatus};
use crate::store::{BankStore, StoreError, TransitionOutcome};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Withdrawal not found: {0}")]
    NotFound(i64),

    #[error("Cannot move withdrawal from {from} to {to}")]
    InvalidTransition {
        from: WithdrawalStatus,
        to: WithdrawalStatus,
    },

    #[error("A completed withdrawal needs a txhash")]
    MissingTxHash,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Clone)]
pub struct WithdrawalLedgerService {
    store: Arc<dyn BankStore>,
    history_max_retained: usize,
}

impl WithdrawalLedgerService {
    pub fn new(store: Arc<dyn BankStore>, history_max_retained: usize) -> Self {
        Self {
            store,
            history_max_retained,
        }
    }

    /// Move withdrawal `id` to `next`.
    ///
    /// `txhash` is required for `completed` and ignored otherwise. Returns
    /// the entry as stored after the call.
    pub async fn advance_withdrawal(
        &self,
        id: i64,
        next: WithdrawalStatus,
        txhash: Option<&str>,
        now: i64,
    ) -> Result<WithdrawalRecord, LedgerError> {
        let txhash = txhash.map(str::trim).filter(|h| !h.is_empty());
        if next == WithdrawalStatus::Completed && txhash.is_none() {
            return Err(LedgerError::MissingTxHash);
        }

        let outcome = self
            .store
            .transition_withdrawal(id, next, txhash, now)
            .await
            .map_err(|e| {
                error!("Status update for withdrawal {} failed: {}", id, e);
                e
            })?;

        let updated = match outcome {
            TransitionOutcome::NotFound => return Err(LedgerError::NotFound(id)),
            TransitionOutcome::Invalid { from, to } => {
                warn!("Rejected status change for withdrawal {}: {} -> {}", id, from, to);
                return Err(LedgerError::InvalidTransition { from, to });
            }
            TransitionOutcome::Unchanged(current) => {
                if next == WithdrawalStatus::Completed && current.txhash.as_deref() != txhash {
                    warn!(
                        "Withdrawal {} already completed with a different txhash",
                        id
                    );
                    return Err(LedgerError::InvalidTransition {
                        from: current.status,
                        to: next,
                    });
                }
                return Ok(current);
            }
            TransitionOutcome::Applied(updated) => updated,
        };

        info!(
            "Withdrawal {} for {} is now {}",
            updated.id, updated.user_id, updated.status
        );

        let event_type = match next {
            WithdrawalStatus::Completed => Some(HistoryEventType::WithdrawCompleted),
            WithdrawalStatus::Failed => Some(HistoryEventType::WithdrawRefund),
            _ => None,
        };

        if let Some(event_type) = event_type {
            let event = HistoryEvent::new(event_type, updated.amount, now);
            if let Err(e) = self
                .store
                .append_history(&updated.user_id, &event, self.history_max_retained)
                .await
            {
                warn!(
                    "History append failed for {} (withdrawal {}): {}",
                    updated.user_id, updated.id, e
                );
            }
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::db::AccountRecord;
    use crate::store::{MemoryBankStore, ReserveOutcome, ReserveWithdrawal};

    fn cro(value: f64) -> Amount {
        Amount::from_float(value)
    }

    /// Store with one account holding 5 CRO, 2 of which are reserved.
    async fn setup() -> (WithdrawalLedgerService, Arc<MemoryBankStore>, i64) {
        let store = Arc::new(
            MemoryBankStore::with_accounts([AccountRecord::new("player-1", cro(5.0))]).await,
        );
        let outcome = store
            .reserve_withdrawal(&ReserveWithdrawal {
                user_id: "player-1".to_string(),
                address: "player-1".to_string(),
                amount: cro(2.0),
                now: 1000,
                cooldown_secs: 1800,
            })
            .await
            .unwrap();
        let ReserveOutcome::Reserved { withdrawal, .. } = outcome else {
            panic!("reservation rejected");
        };
        let service = WithdrawalLedgerService::new(store.clone(), 200);
        (service, store, withdrawal.id)
    }

    async fn walk_to_processing(service: &WithdrawalLedgerService, id: i64) {
        service
            .advance_withdrawal(id, WithdrawalStatus::Queued, None, 1100)
            .await
            .unwrap();
        service
            .advance_withdrawal(id, WithdrawalStatus::Processing, None, 1200)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn completion_records_total_and_history() {
        let (service, store, id) = setup().await;
        walk_to_processing(&service, id).await;

        let entry = service
            .advance_withdrawal(id, WithdrawalStatus::Completed, Some("0xfeed"), 1300)
            .await
            .unwrap();
        assert_eq!(entry.status, WithdrawalStatus::Completed);
        assert_eq!(entry.txhash.as_deref(), Some("0xfeed"));
        assert_eq!(entry.updated_at, 1300);

        let account = store.resolve_account("player-1").await.unwrap().unwrap();
        assert_eq!(account.bank_cro, cro(3.0));
        assert_eq!(account.cro_withdrawn_total, cro(2.0));

        let history = store.recent_history("player-1", 20).await.unwrap();
        assert_eq!(history[0].event_type, HistoryEventType::WithdrawCompleted);
    }

    #[tokio::test]
    async fn failure_refunds_balance() {
        let (service, store, id) = setup().await;
        walk_to_processing(&service, id).await;

        service
            .advance_withdrawal(id, WithdrawalStatus::Failed, None, 1300)
            .await
            .unwrap();

        let account = store.resolve_account("player-1").await.unwrap().unwrap();
        assert_eq!(account.bank_cro, cro(5.0));
        assert_eq!(account.cro_withdrawn_total, Amount::ZERO);
        assert_eq!(store.reserved_total("player-1").await, Amount::ZERO);

        let history = store.recent_history("player-1", 20).await.unwrap();
        assert_eq!(history[0].event_type, HistoryEventType::WithdrawRefund);
        assert_eq!(history[0].amount, cro(2.0));
    }

    #[tokio::test]
    async fn repeated_report_is_a_no_op() {
        let (service, store, id) = setup().await;
        walk_to_processing(&service, id).await;

        service
            .advance_withdrawal(id, WithdrawalStatus::Failed, None, 1300)
            .await
            .unwrap();
        let again = service
            .advance_withdrawal(id, WithdrawalStatus::Failed, None, 1400)
            .await
            .unwrap();
        assert_eq!(again.updated_at, 1300);

        let account = store.resolve_account("player-1").await.unwrap().unwrap();
        assert_eq!(account.bank_cro, cro(5.0));
        assert_eq!(store.recent_history("player-1", 20).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn completed_twice_needs_same_txhash() {
        let (service, _, id) = setup().await;
        walk_to_processing(&service, id).await;

        service
            .advance_withdrawal(id, WithdrawalStatus::Completed, Some("0xfeed"), 1300)
            .await
            .unwrap();

        assert!(service
            .advance_withdrawal(id, WithdrawalStatus::Completed, Some("0xfeed"), 1400)
            .await
            .is_ok());

        let err = service
            .advance_withdrawal(id, WithdrawalStatus::Completed, Some("0xbeef"), 1400)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn skipping_states_is_rejected() {
        let (service, store, id) = setup().await;

        let err = service
            .advance_withdrawal(id, WithdrawalStatus::Failed, None, 1100)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidTransition {
                from: WithdrawalStatus::Pending,
                to: WithdrawalStatus::Failed
            }
        ));

        let account = store.resolve_account("player-1").await.unwrap().unwrap();
        assert_eq!(account.bank_cro, cro(3.0));
    }

    #[tokio::test]
    async fn completion_without_txhash_is_rejected() {
        let (service, _, id) = setup().await;
        walk_to_processing(&service, id).await;

        for hash in [None, Some("   ")] {
            let err = service
                .advance_withdrawal(id, WithdrawalStatus::Completed, hash, 1300)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::MissingTxHash));
        }
    }

    #[tokio::test]
    async fn unknown_withdrawal() {
        let (service, _, _) = setup().await;
        let err = service
            .advance_withdrawal(999, WithdrawalStatus::Queued, None, 1100)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(999)));
    }
}
