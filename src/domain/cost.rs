//! Cost entries for the append-only spend ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single priced operation.
///
/// Entries are immutable once written. The ledger is the ordered sequence of
/// every entry ever recorded, and all totals are derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    /// When the cost was incurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Operation key from the price table (e.g. "gemini_imagen")
    pub operation: String,

    /// Amount in USD, never negative
    pub cost: f64,

    /// Free-text detail (NO secrets)
    #[serde(default)]
    pub details: String,
}

impl CostEntry {
    /// Create a new entry stamped with the current time
    pub fn new(operation: impl Into<String>, cost: f64, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation: operation.into(),
            cost,
            details: details.into(),
        }
    }

    /// Override the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Result of an advisory budget check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetCheck {
    pub operation: String,
    pub count: u32,
    pub estimated_cost: f64,
    pub budget_limit: f64,
    pub within_budget: bool,
    pub message: String,
}
