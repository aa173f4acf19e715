//! In-memory [`BankStore`].
//!
//! Every account sits behind its own `tokio::sync::Mutex`, held across the
//! whole read-check-write of an atomic unit. Lock order is always
//! account slot first, then the ledger.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error};

use super::{
    plan_transition, BankSnapshot, BankStore, ReserveOutcome, ReserveWithdrawal, StoreError,
    TransitionOutcome,
};
use crate::db::{AccountRecord, HistoryEvent, WithdrawalRecord, WithdrawalStatus};
use crate::utils::normalize_identifier;

struct AccountSlot {
    record: AccountRecord,
    history: VecDeque<HistoryEvent>,
}

#[derive(Default)]
struct Ledger {
    entries: Vec<WithdrawalRecord>,
    next_id: i64,
}

impl Ledger {
    fn position(&self, id: i64) -> Option<usize> {
        // ids are assigned in insertion order
        self.entries.binary_search_by_key(&id, |e| e.id).ok()
    }

    /// Non-terminal entries of `user_id` or of the normalized `address`.
    fn active_for(&self, user_id: &str, address: &str, limit: usize) -> Vec<WithdrawalRecord> {
        self.entries
            .iter()
            .rev()
            .filter(|e| !e.status.is_terminal())
            .filter(|e| e.user_id == user_id || (!address.is_empty() && e.address == address))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[derive(Default)]
pub struct MemoryBankStore {
    accounts: RwLock<HashMap<String, Arc<Mutex<AccountSlot>>>>,
    ledger: Mutex<Ledger>,
}

impl MemoryBankStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, user_id: &str) -> Option<Arc<Mutex<AccountSlot>>> {
        self.accounts.read().await.get(user_id).cloned()
    }

    async fn find_slot(&self, identifier: &str) -> Option<Arc<Mutex<AccountSlot>>> {
        let key = normalize_identifier(identifier);
        if key.is_empty() {
            return None;
        }

        // A wallet match wins over a user id match.
        let slots: Vec<_> = self.accounts.read().await.values().cloned().collect();
        let mut by_user_id = None;
        for slot in slots {
            let (wallet, user_id) = {
                let account = slot.lock().await;
                (
                    account.record.wallet_matches(&key),
                    account.record.user_id_matches(&key),
                )
            };
            if wallet {
                return Some(slot);
            }
            if user_id && by_user_id.is_none() {
                by_user_id = Some(slot);
            }
        }
        by_user_id
    }
}

#[async_trait]
impl BankStore for MemoryBankStore {
    async fn resolve_account(
        &self,
        identifier: &str,
    ) -> Result<Option<AccountRecord>, StoreError> {
        debug!("Resolving account in memory: {}", identifier);
        match self.find_slot(identifier).await {
            Some(slot) => Ok(Some(slot.lock().await.record.clone())),
            None => Ok(None),
        }
    }

    async fn upsert_account(&self, account: &AccountRecord) -> Result<(), StoreError> {
        if let Some(slot) = self.slot(&account.user_id).await {
            slot.lock().await.record = account.clone();
            return Ok(());
        }

        let mut map = self.accounts.write().await;
        match map.get(&account.user_id) {
            Some(slot) => slot.lock().await.record = account.clone(),
            None => {
                map.insert(
                    account.user_id.clone(),
                    Arc::new(Mutex::new(AccountSlot {
                        record: account.clone(),
                        history: VecDeque::new(),
                    })),
                );
            }
        }
        Ok(())
    }

    async fn bank_snapshot(
        &self,
        identifier: &str,
        limit: usize,
    ) -> Result<Option<BankSnapshot>, StoreError> {
        let Some(slot) = self.find_slot(identifier).await else {
            return Ok(None);
        };

        // Same order as the atomic units: account slot, then ledger.
        let account = slot.lock().await;
        let ledger = self.ledger.lock().await;
        let pending = ledger.active_for(
            &account.record.user_id,
            &normalize_identifier(identifier),
            limit,
        );

        Ok(Some(BankSnapshot {
            account: account.record.clone(),
            pending,
            history: Ok(account.history.iter().rev().take(limit).cloned().collect()),
        }))
    }

    async fn reserve_withdrawal(
        &self,
        request: &ReserveWithdrawal,
    ) -> Result<ReserveOutcome, StoreError> {
        let Some(slot) = self.slot(&request.user_id).await else {
            return Ok(ReserveOutcome::AccountMissing);
        };

        let mut account = slot.lock().await;
        if let Err(rejection) = request.evaluate(&account.record) {
            return Ok(ReserveOutcome::Rejected(rejection));
        }

        let mut ledger = self.ledger.lock().await;
        ledger.next_id += 1;
        let withdrawal = WithdrawalRecord {
            id: ledger.next_id,
            user_id: request.user_id.clone(),
            address: request.address.clone(),
            amount: request.amount,
            status: WithdrawalStatus::Pending,
            created_at: request.now,
            updated_at: request.now,
            txhash: None,
        };
        ledger.entries.push(withdrawal.clone());

        account.record.bank_cro -= request.amount;
        account.record.last_withdrawal = request.now;

        Ok(ReserveOutcome::Reserved {
            withdrawal,
            new_balance: account.record.bank_cro,
        })
    }

    async fn transition_withdrawal(
        &self,
        id: i64,
        next: WithdrawalStatus,
        txhash: Option<&str>,
        now: i64,
    ) -> Result<TransitionOutcome, StoreError> {
        let owner = {
            let ledger = self.ledger.lock().await;
            match ledger.position(id) {
                Some(pos) => ledger.entries[pos].user_id.clone(),
                None => return Ok(TransitionOutcome::NotFound),
            }
        };

        let slot = self.slot(&owner).await;
        let mut account = match &slot {
            Some(slot) => Some(slot.lock().await),
            None => None,
        };
        let mut ledger = self.ledger.lock().await;
        let Some(pos) = ledger.position(id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        let entry = &mut ledger.entries[pos];

        match plan_transition(entry.status, next) {
            Err((from, to)) => return Ok(TransitionOutcome::Invalid { from, to }),
            Ok(false) => return Ok(TransitionOutcome::Unchanged(entry.clone())),
            Ok(true) => {}
        }

        if next.is_terminal() && account.is_none() {
            error!(
                "Withdrawal {} belongs to missing account {}; refusing to move it to {}",
                id, owner, next
            );
            return Err(StoreError::Corrupt(format!(
                "withdrawal {} has no account {}",
                id, owner
            )));
        }

        entry.status = next;
        entry.updated_at = now;
        if next == WithdrawalStatus::Completed {
            entry.txhash = txhash.map(str::to_string);
        }

        if let Some(account) = account.as_mut() {
            match next {
                WithdrawalStatus::Completed => account.record.cro_withdrawn_total += entry.amount,
                WithdrawalStatus::Failed => account.record.bank_cro += entry.amount,
                _ => {}
            }
        }

        Ok(TransitionOutcome::Applied(entry.clone()))
    }

    async fn list_active_withdrawals(
        &self,
        user_id: &str,
        address: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, StoreError> {
        let address = normalize_identifier(address);
        let ledger = self.ledger.lock().await;
        Ok(ledger.active_for(user_id, &address, limit))
    }

    async fn list_recent_withdrawals(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<WithdrawalRecord>, StoreError> {
        let ledger = self.ledger.lock().await;
        Ok(ledger
            .entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_history(
        &self,
        user_id: &str,
        event: &HistoryEvent,
        max_retained: usize,
    ) -> Result<(), StoreError> {
        let slot = self
            .slot(user_id)
            .await
            .ok_or_else(|| StoreError::Query(format!("no account for history: {}", user_id)))?;

        let mut account = slot.lock().await;
        account.history.push_back(event.clone());
        while account.history.len() > max_retained {
            account.history.pop_front();
        }
        Ok(())
    }

    async fn recent_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEvent>, StoreError> {
        match self.slot(user_id).await {
            Some(slot) => Ok(slot
                .lock()
                .await
                .history
                .iter()
                .rev()
                .take(limit)
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
impl MemoryBankStore {
    /// Build a store pre-populated with `accounts`.
    pub(crate) async fn with_accounts(accounts: impl IntoIterator<Item = AccountRecord>) -> Self {
        let store = Self::new();
        for record in accounts {
            store.upsert_account(&record).await.expect("memory upsert");
        }
        store
    }

    pub(crate) async fn remove_account(&self, user_id: &str) {
        self.accounts.write().await.remove(user_id);
    }

    /// Sum of amounts still reserved by non-terminal entries of `user_id`.
    pub(crate) async fn reserved_total(&self, user_id: &str) -> crate::amount::Amount {
        let ledger = self.ledger.lock().await;
        ledger
            .entries
            .iter()
            .filter(|e| e.user_id == user_id && !e.status.is_terminal())
            .fold(crate::amount::Amount::ZERO, |acc, e| acc + e.amount)
    }
}
