//! Append-only alert log
//!
//! Every newly created alert becomes one JSON line. The file is opened and
//! closed for each append so external log rotation is picked up without a
//! restart. After a restart the log is the only record of past alerts.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::types::{Alert, AlertId, Severity};
use crate::thresholds::Metric;

/// One line of the alert log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub id: AlertId,
    pub scope: String,
    pub gpu: Option<u32>,
    pub metric: Metric,
    pub severity: Severity,
    pub value: f64,
    pub threshold: f64,
}

impl From<&Alert> for AlertRecord {
    fn from(alert: &Alert) -> Self {
        Self {
            timestamp: alert.created_at,
            id: alert.id,
            scope: alert.key.scope.clone(),
            gpu: alert.key.gpu,
            metric: alert.key.metric,
            severity: alert.key.severity,
            value: alert.value,
            threshold: alert.threshold,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AlertLogError {
    #[error("failed to access alert log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode alert record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, alert: &Alert) -> Result<(), AlertLogError> {
        let mut line = serde_json::to_string(&AlertRecord::from(alert))?;
        line.push('\n');

        let io_error = |source| AlertLogError::Io {
            path: self.path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_error)?;
        file.write_all(line.as_bytes()).map_err(io_error)?;

        trace!("appended alert {} to {}", alert.id, self.path.display());
        Ok(())
    }

    /// The last `limit` records, oldest first. A missing file is an empty log.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<AlertRecord>, AlertLogError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(source) => {
                return Err(AlertLogError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let records = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<AlertRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("skipping malformed alert log line: {e}");
                    None
                }
            })
            .collect::<Vec<_>>();

        let skip = records.len().saturating_sub(limit);
        Ok(records.into_iter().skip(skip).collect())
    }
}
