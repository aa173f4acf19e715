//! # Database Module
//!
//! This module handles all PostgreSQL access for the bank backend.
//! We store:
//!
//! - Bank accounts (withdrawable and dirty balances, cooldown timestamp)
//! - The withdrawal ledger (one row per request, status lifecycle)
//! - Per-account history events (bounded)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      DATABASE LAYER                              │
//! │                                                                  │
//! │  ┌──────────────────────────────────────────────────────────┐   │
//! │  │                   Connection Pool                         │   │
//! │  │                  (deadpool-postgres)                      │   │
//! │  └──────────────────────────────────────────────────────────┘   │
//! │                              │                                   │
//! │         ┌────────────────────┼────────────────────┐             │
//! │         ▼                    ▼                    ▼             │
//! │  ┌────────────┐      ┌──────────────┐     ┌──────────────┐     │
//! │  │  Accounts  │      │ Withdrawals  │     │   History    │     │
//! │  │  Table     │      │   Table      │     │   Table      │     │
//! │  └────────────┘      └──────────────┘     └──────────────┘     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Schema
//!
//! The schema lives in `migrations/001_initial_schema.sql` and is applied
//! once by [`Database::run_migrations`] during startup. Request handlers
//! never create tables.

pub mod models;
pub mod queries;

use deadpool_postgres::{Config, Pool, Runtime};
use thiserror::Error;
use tokio_postgres::{Config as TokioConfig, NoTls};
use tracing::{error, info};

/// The initial schema, compiled into the binary.
const INITIAL_SCHEMA: &str = include_str!("../../migrations/001_initial_schema.sql");

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to connect to the database
    #[error("Database connection failed: {0}")]
    ConnectionError(String),

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryError(#[from] tokio_postgres::Error),

    /// Migration failed
    #[error("Migration failed: {0}")]
    MigrationError(String),

    /// A row held a value we cannot decode
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

/// Database connection wrapper.
///
/// This struct wraps the connection pool and provides
/// methods for common database operations.
///
/// ## Usage
///
/// ```rust,ignore
/// let db = Database::connect("postgres://...", 10).await?;
/// db.run_migrations().await?;
/// let account = queries::resolve_account(db.pool(), "0xabc...").await?;
/// ```
#[derive(Clone)]
pub struct Database {
    /// The connection pool
    pool: Pool,
}

impl Database {
    /// Connect to the PostgreSQL database.
    ///
    /// Creates a connection pool of at most `max_size` connections and
    /// verifies it with a trivial query.
    ///
    /// ## Returns
    ///
    /// * `Ok(Database)` - Connected successfully
    /// * `Err(DatabaseError)` - Connection failed
    pub async fn connect(database_url: &str, max_size: usize) -> Result<Self, DatabaseError> {
        info!("Connecting to database...");

        // Parse the connection string using tokio_postgres::Config
        let tokio_config = database_url
            .parse::<TokioConfig>()
            .map_err(|e| DatabaseError::ConfigError(format!("Invalid database URL: {}", e)))?;

        // Convert to deadpool config
        let mut config = Config::new();

        if let Some(dbname) = tokio_config.get_dbname() {
            config.dbname = Some(dbname.to_string());
        }
        if let Some(user) = tokio_config.get_user() {
            config.user = Some(user.to_string());
        }
        if let Some(password) = tokio_config.get_password() {
            config.password = Some(String::from_utf8_lossy(password).to_string());
        }
        if let Some(tokio_postgres::config::Host::Tcp(host)) = tokio_config.get_hosts().first() {
            config.host = Some(host.clone());
        }
        if let Some(port) = tokio_config.get_ports().first() {
            config.port = Some(*port);
        }

        config.pool = Some(deadpool_postgres::PoolConfig {
            max_size,
            ..Default::default()
        });

        let pool = config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Apply the schema.
    ///
    /// Every statement is `IF NOT EXISTS`, so running this on each startup
    /// is safe.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        info!("Running database migrations...");

        let client = self
            .pool
            .get()
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        match client.batch_execute(INITIAL_SCHEMA).await {
            Ok(()) => {
                info!("Migrations completed successfully");
                Ok(())
            }
            Err(e) => {
                let detail = e
                    .as_db_error()
                    .and_then(|db_err| db_err.detail())
                    .unwrap_or("No detail available");
                let hint = e
                    .as_db_error()
                    .and_then(|db_err| db_err.hint())
                    .unwrap_or("No hint available");

                error!("Migration execution error:");
                error!("  Error: {}", e);
                if let Some(code) = e.code() {
                    error!("  Code: {}", code.code());
                }
                error!("  Detail: {}", detail);
                error!("  Hint: {}", hint);

                Err(DatabaseError::MigrationError(format!(
                    "{} (code: {:?}, detail: {}, hint: {})",
                    e,
                    e.code().map(|c| c.code()),
                    detail,
                    hint
                )))
            }
        }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

// Re-export commonly used items
pub use models::*;
