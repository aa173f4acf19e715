//! # Bank Withdrawal Backend Service
//!
//! This is the main entry point for the backend that manages the in-game
//! CRO bank. It provides:
//!
//! - REST API for balance queries and withdrawal requests
//! - A status endpoint for the external payout worker
//! - Database storage for accounts, the withdrawal ledger and history
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                           │
//! │                                                                  │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                  REST API (Actix)                          │  │
//! │  │  GET /bank   POST /bank/withdraw   /bank/withdrawals/...   │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                          │                                       │
//! │  ┌───────────────────────┴───────────────────────────────────┐  │
//! │  │                    SERVICE LAYER                           │  │
//! │  │  ┌──────────────┐ ┌──────────────┐ ┌──────────────────┐   │  │
//! │  │  │ Reservation  │ │  BankQuery   │ │ WithdrawalLedger │   │  │
//! │  │  └──────────────┘ └──────────────┘ └──────────────────┘   │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                          │                                       │
//! │                  Arc<dyn BankStore>                              │
//! │         ┌────────────────┴────────────────┐                     │
//! │  ┌──────┴──────┐                   ┌──────┴──────┐              │
//! │  │  PostgreSQL │                   │  In-memory  │              │
//! │  │  (deadpool) │                   │  (dev/test) │              │
//! │  └─────────────┘                   └─────────────┘              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Set `DATABASE_URL` in `.env` (or `STORAGE_BACKEND=memory`)
//! 3. Start the server: `cargo run`; the schema is applied on startup
//!
//! ## Environment Variables
//!
//! See [`config`] for all settings.

use std::io;
use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod amount;
mod api;
mod config;
mod db;
mod models;
mod services;
mod store;
mod utils;

use config::{AppConfig, StorageBackend};
use db::Database;
use services::{BankQueryService, ReservationPolicy, ReservationService, WithdrawalLedgerService};
use store::{parse_seed_accounts, seed_accounts, BankStore, MemoryBankStore, PgBankStore};

/// Application state shared across all handlers.
pub struct AppState {
    /// Accounts, ledger and history
    pub store: Arc<dyn BankStore>,

    /// Withdrawal requests
    pub reservations: ReservationService,

    /// Read-only views
    pub queries: BankQueryService,

    /// Payout status updates
    pub ledger: WithdrawalLedgerService,

    /// Application configuration
    pub config: AppConfig,
}

impl AppState {
    /// Wire the services around one store.
    pub fn new(store: Arc<dyn BankStore>, config: AppConfig) -> Self {
        Self {
            reservations: ReservationService::new(
                store.clone(),
                ReservationPolicy::from_config(&config),
            ),
            queries: BankQueryService::new(store.clone(), config.bank_view_limit),
            ledger: WithdrawalLedgerService::new(store.clone(), config.history_max_retained),
            store,
            config,
        }
    }
}

/// Open the store selected by `STORAGE_BACKEND`.
async fn open_store(config: &AppConfig) -> io::Result<Arc<dyn BankStore>> {
    match config.storage_backend {
        StorageBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "DATABASE_URL is not set")
            })?;

            let db = Database::connect(url, config.db_pool_size)
                .await
                .map_err(io::Error::other)?;
            info!("🗄️  Database connected");

            // Schema is applied here, never from request handlers
            db.run_migrations().await.map_err(io::Error::other)?;
            info!("📦 Database migrations complete");

            Ok(Arc::new(PgBankStore::new(db)))
        }
        StorageBackend::Memory => {
            info!("🧪 Using in-memory storage; state is lost on restart");
            Ok(Arc::new(MemoryBankStore::new()))
        }
    }
}

/// Upsert the accounts in `SEED_ACCOUNTS_FILE`, if set.
///
/// Existing rows with the same `user_id` are replaced.
async fn seed_store(store: &dyn BankStore, config: &AppConfig) -> io::Result<()> {
    let Some(path) = &config.seed_accounts_file else {
        return Ok(());
    };

    let json = std::fs::read_to_string(path)?;
    let accounts = parse_seed_accounts(&json).map_err(io::Error::other)?;
    let count = seed_accounts(store, &accounts)
        .await
        .map_err(io::Error::other)?;

    info!("🌱 Seeded {} accounts from {}", count, path);
    Ok(())
}

/// Main entry point for the backend service.
///
/// This function:
/// 1. Loads `.env` and initializes logging
/// 2. Loads configuration
/// 3. Opens the store (migrates PostgreSQL, applies seed accounts)
/// 4. Launches the HTTP server
#[actix_web::main]
async fn main() -> io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    // .env first so RUST_LOG from it is honored
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).map_err(io::Error::other)?;

    info!("🚀 Starting Bank Withdrawal Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    let config = AppConfig::from_env().map_err(io::Error::other)?;

    info!("📋 Configuration loaded");
    info!("   Storage: {}", config.storage_backend.as_str());
    info!("   Withdraw cooldown: {}s", config.withdraw_cooldown_secs);
    info!("   Minimum withdrawal: {} CRO", config.min_withdraw);

    // =========================================
    // STEP 3: Open Storage
    // =========================================
    let store = open_store(&config).await?;
    seed_store(&*store, &config).await?;

    // =========================================
    // STEP 4: Create Application State
    // =========================================
    let app_state = Arc::new(AppState::new(store, config.clone()));

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))

            // Add logging middleware
            .wrap(middleware::Logger::default())

            // Browser client access
            .wrap(api::cors_policy(&app_state.config))

            // Configure API routes
            .configure(api::configure_routes)
    })
    .bind((server_host, server_port))?
    .run()
    .await
}
