//! crates/mindhit_core/src/usage.rs
//!
//! Billing-period arithmetic and token-limit evaluation.

use chrono::{DateTime, Duration, Utc};

/// Token allowance for users without an active subscription.
pub const FREE_TOKEN_LIMIT: i64 = 50_000;

const PERIOD_DAYS: i64 = 30;

/// The subscription facts the limit check needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub current_period_start: DateTime<Utc>,
    /// `None` means the plan is unlimited.
    pub token_limit: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BillingAccount {
    pub signup_at: DateTime<Utc>,
    pub subscription: Option<ActiveSubscription>,
}

impl BillingAccount {
    /// Start of the period usage is counted from.
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.subscription {
            Some(sub) => sub.current_period_start,
            None => {
                let days = (now - self.signup_at).num_days().max(0);
                self.signup_at + Duration::days(days / PERIOD_DAYS * PERIOD_DAYS)
            }
        }
    }

    /// `None` means unlimited.
    pub fn token_limit(&self) -> Option<i64> {
        match self.subscription {
            Some(sub) => sub.token_limit,
            None => Some(FREE_TOKEN_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitStatus {
    pub tokens_used: i64,
    pub token_limit: Option<i64>,
    pub period_start: DateTime<Utc>,
}

impl LimitStatus {
    pub fn is_unlimited(&self) -> bool {
        self.token_limit.is_none()
    }

    pub fn can_use_ai(&self) -> bool {
        match self.token_limit {
            None => true,
            Some(limit) => self.tokens_used < limit,
        }
    }

    pub fn percent_used(&self) -> f64 {
        match self.token_limit {
            Some(limit) if limit > 0 => self.tokens_used as f64 / limit as f64 * 100.0,
            _ => 0.0,
        }
    }
}
