//! # Services Module
//!
//! This module contains the business logic of the bank backend.
//! Each service handles a specific part of the withdrawal lifecycle.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `ReservationService` | Validate requests, reserve funds, enqueue `pending` |
//! | `BankQueryService` | Balance view and withdrawal summaries |
//! | `WithdrawalLedgerService` | Payout status updates, refunds, completion totals |
//! | `cooldown` | Pure cooldown policy |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        SERVICES LAYER                            │
//! │                                                                  │
//! │  ┌────────────────┐   ┌────────────────┐   ┌────────────────┐   │
//! │  │  Reservation   │   │   BankQuery    │   │ WithdrawalLedger│  │
//! │  │ request_withdraw│  │ get_bank       │   │ advance_        │  │
//! │  │                │   │ withdrawal_    │   │   withdrawal    │  │
//! │  │                │   │   summary      │   │                 │  │
//! │  └───────┬────────┘   └───────┬────────┘   └───────┬─────────┘  │
//! │          │   cooldown         │                    │            │
//! │          └────────────────────┼────────────────────┘            │
//! │                               ▼                                  │
//! │                    Arc<dyn BankStore>                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod bank_query;
pub mod cooldown;
pub mod reservation;
pub mod withdrawal_ledger;

pub use bank_query::{BankQueryService, QueryError};
pub use reservation::{ReservationError, ReservationPolicy, ReservationService};
pub use withdrawal_ledger::{LedgerError, WithdrawalLedgerService};
