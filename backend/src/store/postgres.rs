//! PostgreSQL [`BankStore`] backed by the deadpool pool in [`Database`].

use async_trait::async_trait;
use tracing::warn;

use super::{
    BankSnapshot, BankStore, ReserveOutcome, ReserveWithdrawal, StoreError, TransitionOutcome,
};
use crate::db::{queries, AccountRecord, Database, HistoryEvent, WithdrawalRecord, WithdrawalStatus};

#[derive(Clone)]
pub struct PgBankStore {
    db: Database,
}

impl PgBankStore {
    /// Wrap a connected, migrated database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn as_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl BankStore for PgBankStore {
    async fn resolve_account(
        &self,
        identifier: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        Ok(queries::resolve_account(self.db.pool(), identifier).await?)
    }

    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), StoreError> {
        Ok(queries::upsert_account(self.db.pool(), account).await?)
    }

    async fn bank_snapshot(
        &self,
        identifier: &str,
        limit: usize,
    ) -> Result<Option<BankSnapshot>, StoreError> {
        Ok(queries::bank_snapshot(self.db.pool(), identifier, as_limit(limit)).await?)
    }

    async fn reserve_withdrawal(
        &self,
        request: &ReserveWithdrawal,
    ) -> Result<ReserveOutcome, StoreError> {
        Ok(queries::reserve_withdrawal(self.db.pool(), request).await?)
    }

    async fn transition_withdrawal(
        &self,
        id: i64,
        next: WithdrawalStatus,
        txhash: Option<&str>,
        now: i64,
    ) -> Result<TransitionOutcome, StoreError> {
        Ok(queries::transition_withdrawal(self.db.pool(), id, next, txhash, now).await?)
    }

    async fn list_active_withdrawals(
        &self,
        user_id: &str,
        address: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, StoreError> {
        Ok(
            queries::list_active_withdrawals(self.db.pool(), user_id, address, as_limit(limit))
                .await?,
        )
    }

    async fn list_recent_withdrawals(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, StoreError> {
        Ok(queries::list_recent_withdrawals(self.db.pool(), user_id, as_limit(limit)).await?)
    }

    async fn append_history(
        &self,
        user_id: &str,
        event: &HistoryEvent,
        max_retained: usize,
    ) -> Result<(), StoreError> {
        Ok(queries::append_history(self.db.pool(), user_id, event, as_limit(max_retained)).await?)
    }

    async fn recent_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEvent>, StoreError> {
        Ok(queries::recent_history(self.db.pool(), user_id, as_limit(limit)).await?)
    }

    async fn is_healthy(&self) -> bool {
        match self.db.pool().get().await {
            Ok(client) => client.query_one("SELECT 1", &[]).await.is_ok(),
            Err(e) => {
                warn!("Database health check failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_saturate() {
        assert_eq!(as_limit(20), 20);
        assert_eq!(as_limit(usize::MAX), i64::MAX);
    }
}
