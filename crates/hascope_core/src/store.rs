//! State history store.
//!
//! Executes built queries against a bounded connection pool and returns
//! normalized `StateRecord`s. The engine seam is the `QueryExecutor` trait;
//! the bundled executor drives SQLite recorder files through
//! `tokio-rusqlite`. MySQL and PostgreSQL stores plug in through the same
//! trait with the matching schema profile.
//!
//! The store is read-only with respect to the underlying database: no
//! write transactions, no application-level locking beyond the pool's own
//! acquire/release discipline.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::query::{build_history_query, BuiltQuery, EntityFilter};
use crate::record::{normalize_rows, QueryStats, RawStateRow, StateRecord};
use crate::schema::{Engine, SchemaEra, SchemaProfile};
use crate::timeframe::TimeWindow;

/// Default per-query time budget.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine seam: anything that can run a staged statement and hand back raw
/// rows. Implementations must not reorder rows.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch(&self, query: &BuiltQuery) -> CoreResult<Vec<RawStateRow>>;

    /// Cheap connectivity probe.
    async fn ping(&self) -> CoreResult<()>;
}

fn classify_sqlite_error(err: tokio_rusqlite::Error) -> CoreError {
    match err {
        tokio_rusqlite::Error::Rusqlite(e) => match e {
            rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::InvalidColumnIndex(..)
            | rusqlite::Error::InvalidColumnName(..) => CoreError::SchemaMismatch(e.to_string()),
            rusqlite::Error::SqliteFailure(_, ref msg)
                if msg.as_deref().is_some_and(|m| m.contains("no such table") || m.contains("no such column")) =>
            {
                CoreError::SchemaMismatch(e.to_string())
            }
            other => CoreError::Connection(other.to_string()),
        },
        other => CoreError::Connection(other.to_string()),
    }
}

/// Bounded pool of SQLite connections. Admission is a semaphore with an
/// acquisition timeout; connections are handed out round-robin. Each
/// `tokio_rusqlite::Connection` serializes its own work on a dedicated
/// thread, so the pool needs no further locking.
#[derive(Debug)]
pub struct SqlitePool {
    connections: Vec<tokio_rusqlite::Connection>,
    admission: Semaphore,
    next: AtomicUsize,
    acquire_timeout: Duration,
}

impl SqlitePool {
    /// Open `size` read-only connections to a recorder database file.
    pub async fn open(path: &Path, size: usize, acquire_timeout: Duration) -> CoreResult<SqlitePool> {
        if !path.exists() {
            return Err(CoreError::Connection(format!(
                "database file not found: {}",
                path.display()
            )));
        }

        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = tokio_rusqlite::Connection::open_with_flags(
                path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )
            .await
            .map_err(classify_sqlite_error)?;
            connections.push(conn);
        }

        debug!("opened sqlite pool of {} connections to {}", size, path.display());
        Ok(SqlitePool {
            connections,
            admission: Semaphore::new(size),
            next: AtomicUsize::new(0),
            acquire_timeout,
        })
    }

    async fn checkout(&self) -> CoreResult<(tokio::sync::SemaphorePermit<'_>, tokio_rusqlite::Connection)> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.admission.acquire())
            .await
            .map_err(|_| CoreError::QueryTimeout(self.acquire_timeout.as_millis() as u64))?
            .map_err(|e| CoreError::Connection(e.to_string()))?;

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        Ok((permit, self.connections[idx].clone()))
    }
}

#[async_trait]
impl QueryExecutor for SqlitePool {
    async fn fetch(&self, query: &BuiltQuery) -> CoreResult<Vec<RawStateRow>> {
        let (_permit, conn) = self.checkout().await?;
        let sql = query.sql.clone();
        let params = query.params.clone();
        let diagnostics = query.diagnostics;

        conn.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
                Ok(RawStateRow {
                    entity_id: row.get(0)?,
                    state: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    last_changed_ts: row.get(2)?,
                    last_updated_ts: row.get(3)?,
                    attributes: row.get(4)?,
                    filtered_count: if diagnostics { row.get(5)? } else { None },
                    total_records: if diagnostics { row.get(6)? } else { None },
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
        .map_err(classify_sqlite_error)
    }

    async fn ping(&self) -> CoreResult<()> {
        let (_permit, conn) = self.checkout().await?;
        conn.call(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
        .map_err(classify_sqlite_error)
    }
}

/// History query result, with diagnostics when requested.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub records: Vec<StateRecord>,
    pub stats: Option<QueryStats>,
}

/// The state history store: a profile plus an executor.
pub struct StateStore {
    executor: Arc<dyn QueryExecutor>,
    profile: &'static SchemaProfile,
    query_timeout: Duration,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("profile", &self.profile)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl StateStore {
    /// Connect to the store named by a database URL.
    ///
    /// The bundled driver covers `sqlite://` recorder files; other engines
    /// attach through [`StateStore::with_executor`] with their profile.
    pub async fn connect(
        url: &str,
        era: SchemaEra,
        pool_size: usize,
        query_timeout: Duration,
    ) -> CoreResult<StateStore> {
        let engine = Engine::from_url(url)?;
        match engine {
            Engine::Sqlite => {
                let path = url.trim_start_matches("sqlite://");
                let pool = SqlitePool::open(Path::new(path), pool_size, query_timeout).await?;
                Ok(StateStore::with_executor(
                    Arc::new(pool),
                    SchemaProfile::select(engine, era),
                    query_timeout,
                ))
            }
            Engine::MySql | Engine::Postgres => Err(CoreError::Connection(format!(
                "no bundled driver for {}; attach a QueryExecutor for this engine",
                engine
            ))),
        }
    }

    /// Build a store from any executor and its matching profile.
    pub fn with_executor(
        executor: Arc<dyn QueryExecutor>,
        profile: &'static SchemaProfile,
        query_timeout: Duration,
    ) -> StateStore {
        StateStore { executor, profile, query_timeout }
    }

    pub fn profile(&self) -> &'static SchemaProfile {
        self.profile
    }

    /// Connectivity probe against the underlying engine.
    pub async fn ping(&self) -> CoreResult<()> {
        self.executor.ping().await
    }

    /// Query state history. Zero rows is a valid, non-error outcome; typed
    /// failures are raised so the caller decides whether to degrade.
    pub async fn entity_states(
        &self,
        filter: Option<&EntityFilter>,
        window: Option<&TimeWindow>,
        limit: Option<u32>,
        diagnostics: bool,
    ) -> CoreResult<HistoryPage> {
        let query = build_history_query(filter, window, limit, diagnostics, self.profile);
        debug!(sql = %query.sql, params = query.params.len(), "executing history query");

        let started = Instant::now();
        let rows = tokio::time::timeout(self.query_timeout, self.executor.fetch(&query))
            .await
            .map_err(|_| CoreError::QueryTimeout(self.query_timeout.as_millis() as u64))??;
        let query_time_ms = started.elapsed().as_millis() as u64;

        let row_count = rows.len();
        let (records, counters) = normalize_rows(rows);
        if records.len() < row_count {
            warn!(
                "dropped {} rows with no usable timestamp",
                row_count - records.len()
            );
        }

        let stats = query.diagnostics.then(|| {
            let (total_records, filtered_count) =
                counters.unwrap_or((0, records.len() as i64));
            QueryStats { total_records, filtered_count, query_time_ms }
        });

        Ok(HistoryPage { records, stats })
    }
}
