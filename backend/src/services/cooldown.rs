//! # Cooldown Guard
//!
//! Stateless policy deciding whether an account may withdraw again.

/// Default minimum gap between two accepted withdrawals (30 minutes).
pub const DEFAULT_COOLDOWN_SECS: i64 = 60 * 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    Allowed,
    Blocked { retry_after_secs: i64 },
}

/// Evaluate the cooldown for an account.
///
/// `last_withdrawal == 0` means the account never withdrew and is always
/// allowed. A clock that moved backwards counts as zero elapsed time.
pub fn check_cooldown(last_withdrawal: i64, now: i64, cooldown_secs: i64) -> CooldownDecision {
    if last_withdrawal == 0 {
        return CooldownDecision::Allowed;
    }

    let elapsed = (now - last_withdrawal).max(0);
    if elapsed < cooldown_secs {
        CooldownDecision::Blocked {
            retry_after_secs: cooldown_secs - elapsed,
        }
    } else {
        CooldownDecision::Allowed
    }
}
