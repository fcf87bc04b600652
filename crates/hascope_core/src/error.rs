//! Error taxonomy for hascope_core.
//!
//! Configuration-level errors (bad timeframe, bad date, bad config) abort a
//! single request before any I/O. Connectivity errors degrade the resolver
//! instead of aborting the process. Per-entity failures inside a batch are
//! isolated and reported alongside successful siblings.

use thiserror::Error;

/// Typed failures produced by the core.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Timeframe token does not match `^(\d+)([mhdw])$` or has a zero duration.
    #[error("invalid timeframe '{0}': use Nm (minutes), Nh (hours), Nd (days) or Nw (weeks)")]
    InvalidTimeframe(String),

    /// Explicit date string is not `YYYY-MM-DD` or `YYYY-MM-DDTHH:MM:SS`.
    #[error("invalid date '{0}': use YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS")]
    InvalidDate(String),

    /// Store or live source unreachable. Triggers degradation, never aborts
    /// the process.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A bounded-time operation exceeded its budget. Retried only at the
    /// caller's discretion, never automatically.
    #[error("query timed out after {0} ms")]
    QueryTimeout(u64),

    /// A query against the wrong era profile returned a shape the normalizer
    /// cannot map. Fatal for that connection, not retried.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Correlation was requested while the store is absent. Degrades to an
    /// empty, flagged result.
    #[error("correlation unavailable: {0}")]
    CorrelationUnavailable(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// Whether this failure should flip the resolver into degraded mode.
    pub fn is_degrading(&self) -> bool {
        matches!(self, CoreError::Connection(_) | CoreError::QueryTimeout(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
