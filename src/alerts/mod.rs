//! Threshold alerting
//!
//! - [`engine`]: evaluation and the alert lifecycle (active, snoozed,
//!   acknowledged, resolved) with TTL based expiry
//! - [`log`]: append-only JSON line log of created alerts
//! - [`types`]: the alert model shared with the wire frames

pub mod engine;
pub mod log;
pub mod types;

pub use engine::{AlertActionError, AlertEngine, EngineSettings, classify};
pub use log::{AlertLog, AlertLogError, AlertRecord};
pub use types::{Alert, AlertId, AlertKey, AlertState, Severity};
