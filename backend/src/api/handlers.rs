//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data
//! 2. Calls the appropriate service
//! 3. Maps service errors to a status code and error code
//! 4. Returns a formatted response
//!
//! ## Error Codes
//!
//! | Code | Status | Meaning |
//! |------|--------|---------|
//! | `INVALID_AMOUNT` | 400 | Amount not positive or below the minimum |
//! | `ACCOUNT_NOT_FOUND` | 404 | Address resolves to no account |
//! | `INSUFFICIENT_BALANCE` | 400 | Amount exceeds `bank_cro` |
//! | `COOLDOWN_ACTIVE` | 429 | Previous withdrawal too recent |
//! | `STORAGE_UNAVAILABLE` | 503 | Storage failed, nothing changed, retry |
//! | `INVALID_STATUS` | 400 | Unknown status name |
//! | `MISSING_TXHASH` | 400 | `completed` without a txhash |
//! | `WITHDRAWAL_NOT_FOUND` | 404 | Unknown withdrawal id |
//! | `INVALID_TRANSITION` | 409 | Status change not allowed |

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::{info, warn};

use crate::amount::Amount;
use crate::db::WithdrawalStatus;
use crate::models::{
    ApiResponse, BankQuery, HealthResponse, StatusUpdateRequest, WithdrawRequest,
    WithdrawResponse, WithdrawalEntryResponse, WithdrawalsQuery,
};
use crate::services::{LedgerError, ReservationError};
use crate::utils::{truncate_string, unix_now};
use crate::AppState;

/// Upper bound for `limit` on the withdrawals endpoint.
const MAX_WITHDRAWALS_LIMIT: usize = 100;

fn error_response(status: StatusCode, code: &str, message: &str) -> HttpResponse {
    HttpResponse::build(status).json(ApiResponse::<()>::error(code, message))
}

fn reservation_error_code(err: &ReservationError) -> (StatusCode, &'static str) {
    match err {
        ReservationError::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        ReservationError::NotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
        ReservationError::InsufficientBalance { .. } => {
            (StatusCode::BAD_REQUEST, "INSUFFICIENT_BALANCE")
        }
        ReservationError::CooldownActive { .. } => {
            (StatusCode::TOO_MANY_REQUESTS, "COOLDOWN_ACTIVE")
        }
        ReservationError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
    }
}

fn ledger_error_code(err: &LedgerError) -> (StatusCode, &'static str) {
    match err {
        LedgerError::NotFound(_) => (StatusCode::NOT_FOUND, "WITHDRAWAL_NOT_FOUND"),
        LedgerError::InvalidTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
        LedgerError::MissingTxHash => (StatusCode::BAD_REQUEST, "MISSING_TXHASH"),
        LedgerError::Storage(_) => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
    }
}

/// API information endpoint (root).
///
/// ## Endpoint
///
/// `GET /`
pub async fn api_info(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let policy = state.reservations.policy();
    let info = json!({
        "name": "Bank Withdrawal API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Balance queries and withdrawal reservations for the in-game bank",
        "policy": {
            "min_withdraw": policy.min_withdraw,
            "cooldown_secs": policy.cooldown_secs,
        },
        "endpoints": {
            "health": {
                "method": "GET",
                "path": "/health",
                "description": "Health check endpoint"
            },
            "bank": {
                "view": {
                    "method": "GET",
                    "path": "/bank?address={address}",
                    "description": "Balances, pending withdrawals and recent history"
                },
                "withdraw": {
                    "method": "POST",
                    "path": "/bank/withdraw",
                    "description": "Reserve a withdrawal of bank CRO"
                },
                "withdrawals": {
                    "method": "GET",
                    "path": "/bank/withdrawals?address={address}&limit={n}",
                    "description": "Lifetime withdrawn total and recent withdrawals"
                },
                "status": {
                    "method": "POST",
                    "path": "/bank/withdrawals/{id}/status",
                    "description": "Payout worker status report"
                }
            }
        }
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
///
/// ## Response
///
/// ```json
/// {
///     "success": true,
///     "data": {
///         "status": "healthy",
///         "storage": "postgres",
///         "storage_ok": true,
///         "version": "0.1.0",
///         "timestamp": 1733659200
///     }
/// }
/// ```
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let storage_ok = state.store.is_healthy().await;

    let response = HealthResponse {
        status: if storage_ok { "healthy" } else { "unhealthy" }.to_string(),
        storage: state.config.storage_backend.as_str().to_string(),
        storage_ok,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: unix_now(),
    };

    let status_code = if storage_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

/// Bank view for an address or user id.
///
/// ## Endpoint
///
/// `GET /bank?address={address}`
///
/// Unknown addresses get a zeroed view, never an error.
///
/// ## Example
///
/// ```bash
/// curl "http://127.0.0.1:8080/bank?address=0xabc..."
/// ```
pub async fn get_bank(
    state: web::Data<Arc<AppState>>,
    query: web::Query<BankQuery>,
) -> HttpResponse {
    match state.queries.get_bank(&query.address).await {
        Ok(view) => HttpResponse::Ok().json(view),
        Err(e) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "STORAGE_UNAVAILABLE",
            &e.to_string(),
        ),
    }
}

/// Request a withdrawal.
///
/// ## Endpoint
///
/// `POST /bank/withdraw`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/bank/withdraw \
///   -H "Content-Type: application/json" \
///   -d '{"address": "0xabc...", "amount": 2.0}'
/// ```
///
/// ## Response
///
/// ```json
/// { "ok": true, "withdrawal_id": 42, "new_balance": 3.0 }
/// ```
pub async fn withdraw(
    state: web::Data<Arc<AppState>>,
    body: web::Json<WithdrawRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    info!(
        "Withdraw request: {} CRO for {}",
        body.amount,
        truncate_string(body.address.trim(), 24)
    );

    let amount = Amount::from_float(body.amount);

    match state
        .reservations
        .request_withdraw(&body.address, amount, unix_now())
        .await
    {
        Ok(reservation) => {
            info!(
                "Withdrawal {} accepted: {} CRO for {}",
                reservation.withdrawal_id, reservation.amount, reservation.user_id
            );
            HttpResponse::Ok().json(WithdrawResponse {
                ok: true,
                withdrawal_id: reservation.withdrawal_id,
                new_balance: reservation.new_balance,
            })
        }
        Err(e) => {
            warn!("Withdraw request rejected: {}", e);
            let (status, code) = reservation_error_code(&e);
            let mut response = HttpResponse::build(status);
            if let ReservationError::CooldownActive { retry_after_secs } = &e {
                response.insert_header(("Retry-After", retry_after_secs.to_string()));
            }
            response.json(ApiResponse::<()>::error(code, &e.to_string()))
        }
    }
}

/// Withdrawn total and recent withdrawals of any status.
///
/// ## Endpoint
///
/// `GET /bank/withdrawals?address={address}&limit={n}`
///
/// `limit` defaults to 10 and is capped at 100.
pub async fn get_withdrawals(
    state: web::Data<Arc<AppState>>,
    query: web::Query<WithdrawalsQuery>,
) -> HttpResponse {
    let limit = query.limit.clamp(1, MAX_WITHDRAWALS_LIMIT);

    match state.queries.withdrawal_summary(&query.address, limit).await {
        Ok(summary) => HttpResponse::Ok().json(ApiResponse::success(summary)),
        Err(e) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "STORAGE_UNAVAILABLE",
            &e.to_string(),
        ),
    }
}

/// Status report from the payout worker.
///
/// ## Endpoint
///
/// `POST /bank/withdrawals/{id}/status`
///
/// ## Example
///
/// ```bash
/// curl -X POST http://127.0.0.1:8080/bank/withdrawals/42/status \
///   -H "Content-Type: application/json" \
///   -d '{"status": "completed", "txhash": "0x9f3c..."}'
/// ```
pub async fn update_withdrawal_status(
    state: web::Data<Arc<AppState>>,
    path: web::Path<i64>,
    body: web::Json<StatusUpdateRequest>,
) -> HttpResponse {
    let id = path.into_inner();
    let body = body.into_inner();

    let next: WithdrawalStatus = match body.status.parse() {
        Ok(status) => status,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "INVALID_STATUS", &e),
    };

    match state
        .ledger
        .advance_withdrawal(id, next, body.txhash.as_deref(), unix_now())
        .await
    {
        Ok(entry) => {
            HttpResponse::Ok().json(ApiResponse::success(WithdrawalEntryResponse::from(&entry)))
        }
        Err(e) => {
            let (status, code) = ledger_error_code(&e);
            error_response(status, code, &e.to_string())
        }
    }
}
