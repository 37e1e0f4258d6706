//! Position lifecycle coordination.
//!
//! # Key Components
//!
//! - [`SymbolLock`]: advisory per-symbol mutual exclusion with failure cooldown
//! - [`TradeStateMachine`]: `NONE -> OPEN -> CLOSING -> CLOSED` per symbol, the
//!   single serialization point for exits, plus the TP/SL dedup registry
//! - [`PositionBook`]: owned store of open positions shared by every task
//! - [`ProtectionActions`]: what the monitors may ask of the order manager
//! - [`ProtectionMonitor`]: live monitor and sentinel background loops

pub mod actions;
pub mod error;
pub mod monitor;
pub mod symbol_lock;
pub mod trade_state;
pub mod tracker;

pub use actions::{ExitOutcome, ExitReason, ProtectionActions, ProtectionStatus, RepairOutcome};
pub use error::{PositionError, PositionResult};
pub use monitor::{
    LiveMonitorConfig, MonitorKind, MonitorReport, ProtectionMonitor, SentinelConfig,
};
pub use symbol_lock::{LockEntry, SymbolLock, SymbolLockConfig};
pub use trade_state::{protection_hash, ProtectionHash, TradeStateConfig, TradeStateMachine};
pub use tracker::PositionBook;
