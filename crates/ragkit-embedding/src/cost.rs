//! Daily USD spend tracking for embedding calls
//!
//! Pure bookkeeping over a per-UTC-day accumulator. The budget check fails
//! open: when the ledger cannot be read, legitimate traffic proceeds and a
//! warning is logged. A slight overshoot in a concurrent race is accepted
//! for the same reason.

use chrono::{NaiveDate, Utc};
use std::sync::Mutex;

#[derive(Debug)]
struct DayLedger {
    date: NaiveDate,
    spent_usd: f64,
}

/// Tracks per-day USD spend against a daily cap.
#[derive(Debug)]
pub struct CostTracker {
    price_per_1k: f64,
    daily_cap_usd: f64,
    ledger: Mutex<DayLedger>,
}

impl CostTracker {
    pub fn new(price_per_1k: f64, daily_cap_usd: f64) -> Self {
        Self {
            price_per_1k,
            daily_cap_usd,
            ledger: Mutex::new(DayLedger {
                date: Utc::now().date_naive(),
                spent_usd: 0.0,
            }),
        }
    }

    /// USD cost of embedding the given number of tokens.
    pub fn calculate_cost(&self, tokens: usize) -> f64 {
        (tokens as f64 / 1000.0) * self.price_per_1k
    }

    /// Whether spending `additional_cost` now would stay within today's cap.
    ///
    /// Fails open: a poisoned ledger returns true so bookkeeping failures
    /// never block traffic.
    pub fn check_budget(&self, additional_cost: f64) -> bool {
        match self.ledger.lock() {
            Ok(mut ledger) => {
                Self::roll_day(&mut ledger);
                ledger.spent_usd + additional_cost <= self.daily_cap_usd
            }
            Err(_) => {
                tracing::warn!("budget ledger unavailable, admitting request");
                true
            }
        }
    }

    /// Record spend against today's ledger. Monotonic within a day.
    pub fn record(&self, cost_usd: f64) {
        if let Ok(mut ledger) = self.ledger.lock() {
            Self::roll_day(&mut ledger);
            ledger.spent_usd += cost_usd;
        } else {
            tracing::warn!(cost_usd, "budget ledger unavailable, spend not recorded");
        }
    }

    /// Accumulated spend for the current UTC day.
    pub fn spent_today(&self) -> f64 {
        match self.ledger.lock() {
            Ok(mut ledger) => {
                Self::roll_day(&mut ledger);
                ledger.spent_usd
            }
            Err(_) => 0.0,
        }
    }

    /// Remaining budget for the current UTC day, clamped at zero.
    pub fn remaining_today(&self) -> f64 {
        (self.daily_cap_usd - self.spent_today()).max(0.0)
    }

    fn roll_day(ledger: &mut DayLedger) {
        let today = Utc::now().date_naive();
        if ledger.date != today {
            ledger.date = today;
            ledger.spent_usd = 0.0;
        }
    }
}
