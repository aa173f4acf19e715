//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service.

use chrono::Utc;

/// Canonical form of an account identifier (wallet address or user id).
///
/// Lookups are case-insensitive and ignore surrounding whitespace, so
/// `" 0xAbC "` and `"0xabc"` name the same account.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Current time in unix seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Truncate a string to a maximum length.
///
/// Useful for logging long wallet addresses and transaction hashes.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len || max_len < 5 {
        s.to_string()
    } else {
        let chars: Vec<char> = s.chars().collect();
        let half = (max_len - 3) / 2;
        let head: String = chars[..half].iter().collect();
        let tail: String = chars[chars.len() - half..].iter().collect();
        format!("{}...{}", head, tail)
    }
}
