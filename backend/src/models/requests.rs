//! # API Request Models
//!
//! Structures for incoming API request bodies and query strings.
//! Each struct represents the expected input for an endpoint.

use serde::{Deserialize, Serialize};

/// Request to withdraw CRO from the bank.
///
/// ## Example JSON
///
/// ```json
/// {
///     "address": "0xAbC123...",
///     "amount": 2.5
/// }
/// ```
///
/// ## Notes
///
/// - `address` is a linked wallet or a user id, matched case-insensitively
/// - `amount` is in CRO; precision beyond 6 decimals is rounded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    /// Wallet address or user id.
    pub address: String,

    /// Amount to withdraw, in CRO.
    pub amount: f64,
}

/// Query parameters for the bank view.
///
/// ## Example URL
///
/// ```text
/// GET /bank?address=0xabc123...
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankQuery {
    #[serde(default)]
    pub address: String,
}

/// Query parameters for the withdrawal summary.
///
/// ## Example URL
///
/// ```text
/// GET /bank/withdrawals?address=0xabc123...&limit=10
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalsQuery {
    #[serde(default)]
    pub address: String,

    /// Maximum number of entries to return.
    /// Default: 10, Max: 100
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

/// Status report from the payout worker.
///
/// ## Example JSON
///
/// ```json
/// {
///     "status": "completed",
///     "txhash": "0x9f3c..."
/// }
/// ```
///
/// `txhash` is required when `status` is `completed` and ignored otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,

    #[serde(default)]
    pub txhash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn withdrawals_query_defaults_limit() {
        let query: WithdrawalsQuery = serde_json::from_str(r#"{"address":"0xabc"}"#).unwrap();
        assert_eq!(query.limit, 10);
    }

    #[test]
    fn status_update_txhash_is_optional() {
        let body: StatusUpdateRequest = serde_json::from_str(r#"{"status":"queued"}"#).unwrap();
        assert_eq!(body.status, "queued");
        assert!(body.txhash.is_none());
    }
}
