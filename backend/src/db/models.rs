//! # Database Models
//!
//! This module defines the data structures that map to database tables.
//! Each struct represents a row in a table.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `bank_accounts` | Per-user CRO balances |
//! | `bank_withdrawals` | Withdrawal ledger (append-only, status lifecycle) |
//! | `bank_account_history` | Bounded per-user event log |
//!
//! ## Relationship Diagram
//!
//! ```text
//! ┌───────────────┐       ┌──────────────────┐
//! │ bank_accounts │──────<│ bank_withdrawals │
//! │               │       │                  │
//! │ user_id (PK)  │       │ user_id          │
//! │ bank_cro      │       │ amount           │
//! │ ...           │       │ status           │
//! └───────────────┘       └──────────────────┘
//!        │
//!        ▼
//! ┌──────────────────────┐
//! │ bank_account_history │
//! │ user_id              │
//! │ event_type           │
//! └──────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// A user's bank account.
///
/// Provisioned outside this service; here it is read, debited by
/// reservations and credited by payout refunds.
///
/// ## Fields
///
/// | Field | Description |
/// |-------|-------------|
/// | user_id | Stable owner identifier (primary key) |
/// | linked_wallet | Optional external address, matched case-insensitively |
/// | bank_cro | Withdrawable balance, never negative |
/// | dirty_cro | Balance not yet eligible for withdrawal |
/// | cro_withdrawn_total | Lifetime completed withdrawals |
/// | last_withdrawal | Unix seconds of the last accepted request, 0 = never |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub user_id: String,

    #[serde(default)]
    pub linked_wallet: Option<String>,

    #[serde(default)]
    pub bank_cro: Amount,

    #[serde(default)]
    pub dirty_cro: Amount,

    #[serde(default)]
    pub cro_withdrawn_total: Amount,

    #[serde(default)]
    pub last_withdrawal: i64,
}

impl AccountRecord {
    /// A fresh account with the given withdrawable balance.
    pub fn new(user_id: impl Into<String>, bank_cro: Amount) -> Self {
        Self {
            user_id: user_id.into(),
            linked_wallet: None,
            bank_cro,
            dirty_cro: Amount::ZERO,
            cro_withdrawn_total: Amount::ZERO,
            last_withdrawal: 0,
        }
    }

    #[cfg(test)]
    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.linked_wallet = Some(wallet.into());
        self
    }

    /// Whether the linked wallet equals `identifier` (already trimmed and
    /// lowercased).
    pub fn wallet_matches(&self, identifier: &str) -> bool {
        self.linked_wallet
            .as_deref()
            .map(|w| w.to_lowercase() == identifier)
            .unwrap_or(false)
    }

    pub fn user_id_matches(&self, identifier: &str) -> bool {
        self.user_id.to_lowercase() == identifier
    }
}

/// Withdrawal status.
///
/// ```text
/// pending -> queued -> processing -> completed
///                                 \-> failed
/// ```
///
/// Only `pending` is ever written by this service's reservation path;
/// later states are reported by the payout worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Funds reserved, waiting for the payout worker
    Pending,
    /// Picked up by the payout worker
    Queued,
    /// Transfer in flight
    Processing,
    /// Paid out; txhash is set
    Completed,
    /// Payout failed; amount is credited back
    Failed,
}

impl WithdrawalStatus {
    /// Statuses whose funds are reserved but not yet paid out.
    pub const ACTIVE: [WithdrawalStatus; 3] = [
        WithdrawalStatus::Pending,
        WithdrawalStatus::Queued,
        WithdrawalStatus::Processing,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Queued => "queued",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WithdrawalStatus::Completed | WithdrawalStatus::Failed)
    }

    /// Whether `next` is a legal single step from `self`.
    pub fn can_transition_to(self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Queued, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(WithdrawalStatus::Pending),
            "queued" => Ok(WithdrawalStatus::Queued),
            "processing" => Ok(WithdrawalStatus::Processing),
            "completed" => Ok(WithdrawalStatus::Completed),
            "failed" => Ok(WithdrawalStatus::Failed),
            other => Err(format!("unknown withdrawal status: {}", other)),
        }
    }
}

/// A row in the withdrawal ledger.
///
/// Never deleted. `user_id` and `amount` are kept so a failed payout can
/// be refunded to the right account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    /// Monotonic id assigned at insertion.
    pub id: i64,

    pub user_id: String,

    /// Lowercased address supplied with the request.
    pub address: String,

    pub amount: Amount,

    pub status: WithdrawalStatus,

    /// Unix seconds of insertion.
    pub created_at: i64,

    /// Unix seconds of the latest status change.
    pub updated_at: i64,

    /// Payout transaction reference, set on completion.
    pub txhash: Option<String>,
}

/// History event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEventType {
    /// A withdrawal was reserved
    WithdrawRequest,
    /// A withdrawal was paid out
    WithdrawCompleted,
    /// A failed withdrawal was credited back
    WithdrawRefund,
}

impl HistoryEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryEventType::WithdrawRequest => "withdraw_request",
            HistoryEventType::WithdrawCompleted => "withdraw_completed",
            HistoryEventType::WithdrawRefund => "withdraw_refund",
        }
    }
}

impl FromStr for HistoryEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "withdraw_request" => Ok(HistoryEventType::WithdrawRequest),
            "withdraw_completed" => Ok(HistoryEventType::WithdrawCompleted),
            "withdraw_refund" => Ok(HistoryEventType::WithdrawRefund),
            other => Err(format!("unknown history event type: {}", other)),
        }
    }
}

/// One entry of an account's history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    #[serde(rename = "type")]
    pub event_type: HistoryEventType,

    pub amount: Amount,

    /// Unix seconds.
    pub created_at: i64,
}

impl HistoryEvent {
    pub fn new(event_type: HistoryEventType, amount: Amount, created_at: i64) -> Self {
        Self {
            event_type,
            amount,
            created_at,
        }
    }
}
