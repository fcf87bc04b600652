//! History query builder.
//!
//! Pure function from (entity filter, time window, limit, schema profile)
//! to a dialect-correct parameterized statement. Building only stages a
//! statement; it never touches a connection.
//!
//! Contract highlights:
//! - normalized era always inner-joins `states_meta` for the entity id and
//!   left-joins `state_attributes` so attribute-less rows survive
//! - time filtering and ordering use the COALESCE of the two timestamp
//!   columns, never the raw "changed" column alone
//! - ordering is effective-timestamp descending, row-id tiebreak
//! - placeholders, LIMIT form and epoch conversion come from the profile

use rusqlite::types::{ToSql, ToSqlOutput};

use crate::schema::SchemaProfile;
use crate::timeframe::TimeWindow;

/// Entity filter: exact id or a `*`-wildcard pattern. `*` translates to
/// SQL `%`; no other glob semantics are provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityFilter {
    Exact(String),
    Pattern(String),
}

impl EntityFilter {
    /// Classify a raw filter string: any `*` makes it a pattern.
    pub fn from_input(input: &str) -> EntityFilter {
        if input.contains('*') {
            EntityFilter::Pattern(input.to_string())
        } else {
            EntityFilter::Exact(input.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EntityFilter::Exact(s) | EntityFilter::Pattern(s) => s,
        }
    }
}

/// A staged query parameter, ordered to match the statement placeholders.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(s) => s.to_sql(),
            SqlValue::Integer(i) => i.to_sql(),
            SqlValue::Float(f) => f.to_sql(),
        }
    }
}

/// A built, not-yet-executed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Whether the projection carries the two diagnostic count columns.
    pub diagnostics: bool,
}

/// Build the state-history query for one profile.
///
/// `diagnostics` adds a windowed filtered-count and a total-records-for-
/// entity subquery; both are only meaningful for an exact entity filter,
/// so pattern or absent filters stage a plain query even when requested.
pub fn build_history_query(
    filter: Option<&EntityFilter>,
    window: Option<&TimeWindow>,
    limit: Option<u32>,
    diagnostics: bool,
    profile: &SchemaProfile,
) -> BuiltQuery {
    let effective_ts = profile.effective_ts_expr();
    let with_diagnostics = diagnostics && matches!(filter, Some(EntityFilter::Exact(_)));

    let mut sql = format!(
        "SELECT {entity}, s.state, {changed} AS last_changed_ts, {updated} AS last_updated_ts, {attrs} AS attributes",
        entity = profile.entity_id_expr,
        changed = profile.epoch_expr(profile.changed_col),
        updated = profile.epoch_expr(profile.updated_col),
        attrs = profile.attrs_expr,
    );

    if with_diagnostics {
        sql.push_str(", COUNT(*) OVER() AS _filtered_count");
        match profile.meta_table {
            Some(meta) => sql.push_str(&format!(
                ", (SELECT COUNT(*) FROM {states} s2 INNER JOIN {meta} sm2 ON s2.metadata_id = sm2.metadata_id WHERE sm2.entity_id = {entity}) AS _total_records",
                states = profile.states_table,
                meta = meta,
                entity = profile.entity_id_expr,
            )),
            None => sql.push_str(&format!(
                ", (SELECT COUNT(*) FROM {states} s2 WHERE s2.entity_id = {entity}) AS _total_records",
                states = profile.states_table,
                entity = profile.entity_id_expr,
            )),
        }
    }

    sql.push_str(&format!(" FROM {} s", profile.states_table));
    if let Some(meta) = profile.meta_table {
        sql.push_str(&format!(" INNER JOIN {} sm ON s.metadata_id = sm.metadata_id", meta));
    }
    if let Some(attrs) = profile.attrs_table {
        // LEFT JOIN: absence of attributes must not drop the state row.
        sql.push_str(&format!(" LEFT JOIN {} sa ON s.attributes_id = sa.attributes_id", attrs));
    }

    let mut conditions: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    match filter {
        Some(EntityFilter::Exact(id)) => {
            params.push(SqlValue::Text(id.clone()));
            conditions.push(format!(
                "{} = {}",
                profile.entity_id_expr,
                profile.placeholder.placeholder(params.len())
            ));
        }
        Some(EntityFilter::Pattern(pattern)) => {
            params.push(SqlValue::Text(pattern.replace('*', "%")));
            conditions.push(format!(
                "{} LIKE {}",
                profile.entity_id_expr,
                profile.placeholder.placeholder(params.len())
            ));
        }
        None => {}
    }

    if let Some(window) = window {
        params.push(SqlValue::Float(window.start().timestamp_micros() as f64 / 1_000_000.0));
        conditions.push(format!(
            "{} >= {}",
            effective_ts,
            profile.placeholder.placeholder(params.len())
        ));

        params.push(SqlValue::Float(window.end().timestamp_micros() as f64 / 1_000_000.0));
        conditions.push(format!(
            "{} <= {}",
            effective_ts,
            profile.placeholder.placeholder(params.len())
        ));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    sql.push_str(&format!(
        " ORDER BY {} DESC, {} ASC",
        effective_ts, profile.row_id_col
    ));

    if let Some(limit) = limit {
        params.push(SqlValue::Integer(i64::from(limit)));
        sql.push_str(&format!(
            " LIMIT {}",
            profile.placeholder.placeholder(params.len())
        ));
    }

    BuiltQuery { sql, params, diagnostics: with_diagnostics }
}
