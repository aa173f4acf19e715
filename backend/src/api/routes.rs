//! # API Route Configuration
//!
//! This module sets up all the HTTP routes for the API.

use actix_web::{error, web, HttpResponse};

use super::handlers;
use crate::models::ApiResponse;

/// Configure all API routes.
///
/// This function is called from main.rs to set up
/// all the endpoint routes.
///
/// ## Route Structure
///
/// ```text
/// /
/// ├── /health                       GET - Health check
/// └── /bank                         GET - Bank view
///     ├── /withdraw                 POST - Request withdrawal
///     ├── /withdrawals              GET - Withdrawal summary
///     └── /withdrawals/{id}/status  POST - Payout status update
/// ```
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Malformed bodies and query strings get the error envelope
        .app_data(web::JsonConfig::default().error_handler(|err, _req| {
            let message = err.to_string();
            error::InternalError::from_response(
                err,
                HttpResponse::BadRequest()
                    .json(ApiResponse::<()>::error("INVALID_REQUEST", &message)),
            )
            .into()
        }))
        .app_data(web::QueryConfig::default().error_handler(|err, _req| {
            let message = err.to_string();
            error::InternalError::from_response(
                err,
                HttpResponse::BadRequest()
                    .json(ApiResponse::<()>::error("INVALID_REQUEST", &message)),
            )
            .into()
        }))

        // Root endpoint - API information
        .route("/", web::get().to(handlers::api_info))

        // Health check endpoint
        .route("/health", web::get().to(handlers::health_check))

        // Bank endpoints
        .service(
            web::scope("/bank")
                // Balance view
                .route("", web::get().to(handlers::get_bank))

                // Reserve a withdrawal
                .route("/withdraw", web::post().to(handlers::withdraw))

                // Withdrawn total and recent withdrawals
                .route("/withdrawals", web::get().to(handlers::get_withdrawals))

                // Payout worker status report
                .route(
                    "/withdrawals/{id}/status",
                    web::post().to(handlers::update_withdrawal_status),
                ),
        );
}
