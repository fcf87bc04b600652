//! hascope_core - fast, uniform access to Home-Assistant-style state
//! history, with error/transition correlation.
//!
//! The recorder database exists in several physical shapes (three engines,
//! two schema eras); this crate hides that heterogeneity behind one
//! logical record type and degrades gracefully to the live API when the
//! store is unreachable.
//!
//! Component map:
//! - [`timeframe`]: relative duration tokens -> absolute UTC windows
//! - [`schema`]: static layout profiles per (engine, era)
//! - [`query`]: pure, dialect-correct query builder
//! - [`record`]: the normalized `StateRecord` shape
//! - [`store`]: bounded-pool query execution
//! - [`stats`]: descriptive statistics over records
//! - [`events`] / [`logsource`] / [`api`]: error event collection
//! - [`registry`]: the known entity-id vocabulary
//! - [`correlate`]: proximity scoring of transitions near errors
//! - [`resolver`]: the hybrid orchestration facade

pub mod api;
pub mod config;
pub mod correlate;
pub mod error;
pub mod events;
pub mod logsource;
pub mod query;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod stats;
pub mod store;
pub mod timeframe;

pub use config::HascopeConfig;
pub use correlate::{CorrelationMatch, CorrelationPolicy, CorrelationResult};
pub use error::{CoreError, CoreResult};
pub use events::{ErrorEvent, EventSource};
pub use query::{BuiltQuery, EntityFilter};
pub use record::{QueryStats, StateRecord};
pub use resolver::{DegradationStatus, EntityHistory, HybridResolver, Resolved};
pub use schema::{Engine, SchemaEra, SchemaProfile};
pub use stats::{compute_statistics, Statistics};
pub use store::{HistoryPage, QueryExecutor, SqlitePool, StateStore};
pub use timeframe::{parse_datetime, parse_timeframe, resolve_timeframe, TimeWindow};
