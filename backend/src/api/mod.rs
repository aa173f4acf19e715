//! # REST API Module
//!
//! This module defines all HTTP endpoints of the bank backend.
//!
//! ## Endpoint Overview
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/` | API information |
//! | GET | `/health` | Health check |
//! | GET | `/bank?address=` | Balances, pending withdrawals, history |
//! | POST | `/bank/withdraw` | Request a withdrawal |
//! | GET | `/bank/withdrawals?address=&limit=` | Withdrawn total and recent withdrawals |
//! | POST | `/bank/withdrawals/{id}/status` | Payout worker status report |
//!
//! ## Request/Response Format
//!
//! `GET /bank` and `POST /bank/withdraw` answer with bare JSON objects.
//! Every other success, and every error, uses the envelope:
//!
//! ```json
//! // Success response
//! {
//!     "success": true,
//!     "data": { ... }
//! }
//!
//! // Error response
//! {
//!     "success": false,
//!     "error": {
//!         "code": "ERROR_CODE",
//!         "message": "Human readable message"
//!     }
//! }
//! ```

pub mod handlers;
pub mod routes;

use actix_cors::Cors;
use actix_web::http::header;

use crate::config::AppConfig;

pub use routes::configure_routes;

/// CORS policy for the browser client.
///
/// Allows only `ALLOWED_ORIGIN` when it is set, any origin otherwise.
pub fn cors_policy(config: &AppConfig) -> Cors {
    let cors = match &config.allowed_origin {
        Some(origin) => Cors::default().allowed_origin(origin),
        None => Cors::default().allow_any_origin(),
    };

    cors.allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allowed_headers(vec![header::CONTENT_TYPE, header::ACCEPT])
        .max_age(3600)
}
