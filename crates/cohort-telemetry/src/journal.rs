//! Trade journal.
//!
//! Decision, trade and outcome records are pushed through a bounded channel
//! with `try_send`. A writer task appends them as JSON Lines to one file per
//! UTC day (`journal-YYYY-MM-DD.jsonl`). A full or closed channel drops the
//! record; the trading path never waits on persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use cohort_core::{AgentId, Clock, PositionSide, Price, RejectReason, Signal, Size, Symbol};

use crate::error::{TelemetryError, TelemetryResult};
use crate::metrics::Metrics;

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Open,
    Close,
    PartialClose,
}

/// One journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalRecord {
    Decision {
        agent_id: AgentId,
        symbol: Symbol,
        signal: Signal,
        confidence: f64,
        reasoning: String,
        strategy_tag: String,
    },
    Rejection {
        agent_id: Option<AgentId>,
        symbol: Option<Symbol>,
        reason: RejectReason,
        message: String,
    },
    Trade {
        agent_id: AgentId,
        symbol: Symbol,
        side: PositionSide,
        action: TradeAction,
        qty: Size,
        price: Price,
    },
    Outcome {
        agent_id: AgentId,
        symbol: Symbol,
        realized_pnl: Decimal,
        is_win: bool,
    },
}

/// Timestamped record as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub record: JournalRecord,
}

// ============================================================================
// JournalConfig
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Bounded channel capacity.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_dir() -> PathBuf {
    PathBuf::from("journal")
}

fn default_capacity() -> usize {
    1024
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            dir: default_dir(),
            capacity: default_capacity(),
        }
    }
}

impl JournalConfig {
    pub fn validate(&self) -> TelemetryResult<()> {
        if self.enabled && self.capacity == 0 {
            return Err(TelemetryError::Journal(
                "journal capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// TradeJournal
// ============================================================================

/// Non-blocking journal handle.
pub struct TradeJournal {
    tx: Option<mpsc::Sender<JournalEntry>>,
    clock: Arc<dyn Clock>,
}

impl TradeJournal {
    /// Create the journal directory and spawn the JSON Lines writer.
    pub async fn spawn(
        config: &JournalConfig,
        clock: Arc<dyn Clock>,
    ) -> TelemetryResult<(Self, JoinHandle<()>)> {
        config.validate()?;
        fs::create_dir_all(&config.dir).await?;
        let (journal, rx) = Self::with_channel(config.capacity, clock);
        let dir = config.dir.clone();
        info!(dir = %dir.display(), capacity = config.capacity, "Trade journal started");
        let handle = tokio::spawn(run_writer(rx, dir));
        Ok((journal, handle))
    }

    /// Journal feeding a caller-owned receiver.
    #[must_use]
    pub fn with_channel(
        capacity: usize,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::Receiver<JournalEntry>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx), clock }, rx)
    }

    /// Journal that discards everything.
    #[must_use]
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self { tx: None, clock }
    }

    /// Queue a record. Returns `false` if it was dropped.
    pub fn record(&self, record: JournalRecord) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let entry = JournalEntry {
            timestamp_ms: self.clock.now_ms(),
            record,
        };
        match tx.try_send(entry) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Trade journal full, dropping record");
                Metrics::journal_dropped();
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Trade journal closed, dropping record");
                Metrics::journal_dropped();
                false
            }
        }
    }
}

fn journal_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("journal-{}.jsonl", date.format("%Y-%m-%d")))
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Writer loop. Ends when every sender is dropped.
async fn run_writer(mut rx: mpsc::Receiver<JournalEntry>, dir: PathBuf) {
    let mut current: Option<(NaiveDate, File)> = None;

    while let Some(entry) = rx.recv().await {
        let date = DateTime::<Utc>::from_timestamp_millis(entry.timestamp_ms)
            .map(|dt| dt.date_naive())
            .unwrap_or_default();

        let mut line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to serialize journal entry");
                continue;
            }
        };
        line.push('\n');

        if current.as_ref().map(|(d, _)| *d) != Some(date) {
            let path = journal_path(&dir, date);
            match open_append(&path).await {
                Ok(file) => {
                    debug!(path = %path.display(), "Journal file opened");
                    current = Some((date, file));
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to open journal file");
                    current = None;
                    continue;
                }
            }
        }

        if let Some((_, file)) = current.as_mut() {
            let written = match file.write_all(line.as_bytes()).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                error!(error = %e, "Failed to write journal entry");
                current = None;
            }
        }
    }

    info!("Trade journal writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::ManualClock;
    use rust_decimal_macros::dec;

    // 2024-03-01T00:00:00Z
    const DAY_ONE_MS: i64 = 1_709_251_200_000;

    fn outcome(pnl: Decimal) -> JournalRecord {
        JournalRecord::Outcome {
            agent_id: AgentId::new("a1"),
            symbol: Symbol::new("BTCUSDT"),
            realized_pnl: pnl,
            is_win: pnl > Decimal::ZERO,
        }
    }

    #[test]
    fn test_record_serializes_with_kind_tag() {
        let entry = JournalEntry {
            timestamp_ms: 1,
            record: JournalRecord::Rejection {
                agent_id: Some(AgentId::new("a1")),
                symbol: None,
                reason: RejectReason::KillSwitch,
                message: "daily loss".to_string(),
            },
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"rejection\""));
        assert!(json.contains("\"reason\":\"KILL_SWITCH\""));
        let back: JournalEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let clock = Arc::new(ManualClock::new(DAY_ONE_MS));
        let (journal, _rx) = TradeJournal::with_channel(1, clock);
        assert!(journal.record(outcome(dec!(5))));
        assert!(!journal.record(outcome(dec!(6))));
    }

    #[test]
    fn test_disabled_journal_drops() {
        let journal = TradeJournal::disabled(Arc::new(ManualClock::new(0)));
        assert!(!journal.record(outcome(dec!(1))));
    }

    #[tokio::test]
    async fn test_writer_appends_daily_files() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(DAY_ONE_MS));
        let config = JournalConfig {
            dir: dir.path().to_path_buf(),
            ..JournalConfig::default()
        };

        let (journal, handle) = TradeJournal::spawn(&config, clock.clone()).await.unwrap();
        assert!(journal.record(outcome(dec!(12.5))));
        assert!(journal.record(outcome(dec!(-3))));
        clock.advance(std::time::Duration::from_secs(86_400));
        assert!(journal.record(outcome(dec!(1))));
        drop(journal);
        handle.await.unwrap();

        let day_one = std::fs::read_to_string(dir.path().join("journal-2024-03-01.jsonl")).unwrap();
        let lines: Vec<&str> = day_one.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: JournalEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.record, outcome(dec!(12.5)));

        let day_two = std::fs::read_to_string(dir.path().join("journal-2024-03-02.jsonl")).unwrap();
        assert_eq!(day_two.lines().count(), 1);
    }
}
