//! # API Models
//!
//! This module defines the request and response structures for the REST API.
//! These are separate from database models to allow API-specific formatting.
//!
//! ## Organization
//!
//! - `requests.rs` - Incoming request bodies and query strings
//! - `responses.rs` - Outgoing response bodies
//!
//! ## Serialization
//!
//! All models use Serde for JSON serialization/deserialization.
//! Field names stay snake_case, which is what the bank's web client reads.

pub mod requests;
pub mod responses;

pub use requests::*;
pub use responses::*;
