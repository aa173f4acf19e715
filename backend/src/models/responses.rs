//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//!
//! Errors and the auxiliary endpoints use the [`ApiResponse`] envelope.
//! The bank view and the withdraw receipt are returned bare, in the shape
//! existing clients already read.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::db::{HistoryEvent, WithdrawalRecord, WithdrawalStatus};

/// Standard API response wrapper.
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "COOLDOWN_ACTIVE",
///         "message": "Cooldown active. Try again in 1300 seconds"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "INSUFFICIENT_BALANCE").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// One withdrawal ledger entry as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalEntryResponse {
    pub id: i64,
    pub address: String,
    pub amount: Amount,
    pub status: WithdrawalStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub txhash: Option<String>,
}

impl From<&WithdrawalRecord> for WithdrawalEntryResponse {
    fn from(record: &WithdrawalRecord) -> Self {
        Self {
            id: record.id,
            address: record.address.clone(),
            amount: record.amount,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            txhash: record.txhash.clone(),
        }
    }
}

/// Read-only view of an account.
///
/// ## Example Response
///
/// ```json
/// {
///     "bank_cro": 3.0,
///     "dirty_cro": 0.0,
///     "cro_withdrawn_total": 0.0,
///     "last_withdrawal": 1000,
///     "pending": [{ "id": 1, "amount": 2.0, "status": "pending", ... }],
///     "history": [{ "type": "withdraw_request", "amount": 2.0, "created_at": 1000 }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankView {
    pub bank_cro: Amount,
    pub dirty_cro: Amount,
    pub cro_withdrawn_total: Amount,
    pub last_withdrawal: i64,
    /// Non-terminal withdrawals, newest first.
    pub pending: Vec<WithdrawalEntryResponse>,
    /// Newest first.
    pub history: Vec<HistoryEvent>,
}

impl BankView {
    /// The view returned for an address that resolves to no account.
    pub fn zeroed() -> Self {
        Self {
            bank_cro: Amount::ZERO,
            dirty_cro: Amount::ZERO,
            cro_withdrawn_total: Amount::ZERO,
            last_withdrawal: 0,
            pending: Vec::new(),
            history: Vec::new(),
        }
    }
}

/// Receipt for an accepted withdrawal.
///
/// ## Example Response
///
/// ```json
/// {
///     "ok": true,
///     "withdrawal_id": 42,
///     "new_balance": 3.0
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawResponse {
    pub ok: bool,
    pub withdrawal_id: i64,
    pub new_balance: Amount,
}

/// Lifetime total plus the most recent withdrawals of an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawalSummary {
    pub cro_withdrawn_total: Amount,
    /// Any status, newest first.
    pub withdrawals: Vec<WithdrawalEntryResponse>,
}

impl WithdrawalSummary {
    pub fn empty() -> Self {
        Self {
            cro_withdrawn_total: Amount::ZERO,
            withdrawals: Vec::new(),
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status: "healthy" or "unhealthy".
    pub status: String,

    /// Storage backend in use: "postgres" or "memory".
    pub storage: String,

    /// Whether the storage backend answered.
    pub storage_ok: bool,

    /// Service version.
    pub version: String,

    /// Current unix time.
    pub timestamp: i64,
}
