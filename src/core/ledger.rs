//! Append-only spend ledger with file-based persistence.
//!
//! Entries are stored as newline-delimited JSON (JSONL), one [`CostEntry`]
//! per line. Every aggregation replays the file, so totals stay correct
//! after the log is edited by hand. Lines that no longer parse are skipped
//! with a warning. Nothing is created on disk until the first `record`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use fs2::FileExt;
use tokio::fs;
use tracing::{debug, warn};

use crate::domain::{BudgetCheck, CostEntry};

/// Unit prices in USD per operation
pub const PRICE_TABLE: &[(&str, f64)] = &[
    // Image generation
    ("gemini_imagen", 0.04),
    ("dalle3_standard_1024", 0.04),
    ("dalle3_hd_1024", 0.08),
    ("dalle3_standard_1792", 0.08),
    ("dalle3_hd_1792", 0.12),
    ("pexels", 0.00),
    // Video generation
    ("kling_5s", 0.35),
    ("kling_10s", 0.70),
    ("kling_fal", 0.45),
    ("pexels_video", 0.00),
    // Audio/TTS (elevenlabs is per 1000 chars)
    ("elevenlabs", 0.30),
    ("xtts_runpod", 0.02),
    ("edge_tts", 0.00),
    // Text generation (per ~500 token generation)
    ("gemini_flash_text", 0.002),
    ("gemini_pro_text", 0.005),
    ("openai_4o_mini_text", 0.002),
    // Deployment and local assembly
    ("cloudflare_pages", 0.00),
    ("vercel_deploy", 0.00),
    ("montage_local", 0.00),
];

/// Unit price for an operation, if it is in the table
pub fn unit_price(operation: &str) -> Option<f64> {
    PRICE_TABLE
        .iter()
        .find(|(op, _)| *op == operation)
        .map(|(_, price)| *price)
}

/// File-backed spend ledger.
///
/// The session start is fixed at construction; `session_cost` sums only the
/// entries recorded at or after it.
#[derive(Debug, Clone)]
pub struct SpendLedger {
    /// Path to the cost_log.jsonl file
    log_path: PathBuf,

    /// Start of the current session
    session_start: DateTime<Utc>,
}

impl SpendLedger {
    /// Open a ledger whose session starts now
    pub async fn open(log_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_session(log_path, Utc::now()).await
    }

    /// Open a ledger with an explicit session start
    pub async fn open_with_session(
        log_path: impl Into<PathBuf>,
        session_start: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            log_path: log_path.into(),
            session_start,
        })
    }

    /// Get the path to the log file
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn session_start(&self) -> DateTime<Utc> {
        self.session_start
    }

    /// Estimate the cost of `count` units of an operation (unknown operations cost 0)
    pub fn estimate(&self, operation: &str, count: u32) -> f64 {
        unit_price(operation).unwrap_or(0.0) * f64::from(count)
    }

    /// Advisory budget check; never blocks anything by itself
    pub fn check_budget(&self, operation: &str, count: u32, limit: f64) -> BudgetCheck {
        let estimated = self.estimate(operation, count);
        let within_budget = estimated <= limit;
        let message = if within_budget {
            format!("${:.2} (within ${:.2} budget)", estimated, limit)
        } else {
            format!("${:.2} exceeds ${:.2} budget!", estimated, limit)
        };

        BudgetCheck {
            operation: operation.to_string(),
            count,
            estimated_cost: estimated,
            budget_limit: limit,
            within_budget,
            message,
        }
    }

    /// Append a cost entry; durable on disk before this returns
    pub async fn record(
        &self,
        operation: &str,
        cost: f64,
        details: impl Into<String>,
    ) -> Result<CostEntry> {
        if !cost.is_finite() || cost < 0.0 {
            anyhow::bail!("Refusing to record invalid cost {} for '{}'", cost, operation);
        }

        let entry = CostEntry::new(operation, cost, details);
        self.append(&entry)?;
        debug!(operation, cost, "Recorded cost");

        Ok(entry)
    }

    /// Append an entry under an exclusive advisory lock
    fn append(&self, entry: &CostEntry) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .with_context(|| format!("Failed to open ledger: {}", self.log_path.display()))?;

        file.lock_exclusive()
            .context("Failed to acquire file lock on cost log")?;

        let json = serde_json::to_string(entry).context("Failed to serialize cost entry")?;
        writeln!(file, "{}", json).context("Failed to write cost entry")?;
        file.flush().context("Failed to flush cost entry")?;
        file.sync_data().context("Failed to sync cost log")?;

        // Lock is released when file is dropped
        Ok(())
    }

    /// Replay every entry in order; unparsable lines are skipped
    pub async fn entries(&self) -> Result<Vec<CostEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_path)
            .await
            .with_context(|| format!("Failed to read ledger: {}", self.log_path.display()))?;

        Ok(content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(i, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(
                        path = %self.log_path.display(),
                        line = i + 1,
                        error = %e,
                        "Skipping unreadable cost entry"
                    );
                    None
                }
            })
            .collect())
    }

    /// Total cost across all time
    pub async fn total(&self) -> Result<f64> {
        Ok(self.entries().await?.iter().map(|e| e.cost).sum())
    }

    /// Total cost recorded today (local calendar day)
    pub async fn today_total(&self) -> Result<f64> {
        let today = Local::now().date_naive();
        Ok(self
            .entries()
            .await?
            .iter()
            .filter(|e| e.timestamp.with_timezone(&Local).date_naive() == today)
            .map(|e| e.cost)
            .sum())
    }

    /// Total cost since this ledger's session started
    pub async fn session_cost(&self) -> Result<f64> {
        Ok(self
            .entries()
            .await?
            .iter()
            .filter(|e| e.timestamp >= self.session_start)
            .map(|e| e.cost)
            .sum())
    }

    /// Human-readable summary
    pub async fn summary(&self) -> Result<String> {
        Ok(format!(
            "Today: ${:.2} | All-time: ${:.2}",
            self.today_total().await?,
            self.total().await?
        ))
    }

    /// The last `n` entries, oldest first
    pub async fn last_n(&self, n: usize) -> Result<Vec<CostEntry>> {
        let mut entries = self.entries().await?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }
}
