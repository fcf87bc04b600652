//! Schema profiles for the recorder stores.
//!
//! A profile describes the physical layout of one (engine, era) pair so the
//! query builder can stay engine- and era-agnostic:
//!
//! - legacy-flat: a single `states` table carrying `entity_id`, inline
//!   `attributes`, and DATETIME `last_changed`/`last_updated` columns.
//! - normalized-meta: `states` joined to `states_meta` via `metadata_id`
//!   for the entity id, `state_attributes` via `attributes_id` for the
//!   payload, and epoch-float `last_changed_ts`/`last_updated_ts` columns.
//!
//! Era detection is not done here; the caller (config or a thin probe)
//! selects the era once per connection and it never changes during a
//! process lifetime.

use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Supported relational backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Sqlite,
    MySql,
    Postgres,
}

impl Engine {
    /// Detect the engine from a database URL scheme.
    pub fn from_url(url: &str) -> CoreResult<Engine> {
        if url.starts_with("sqlite://") {
            Ok(Engine::Sqlite)
        } else if url.starts_with("mysql://") {
            Ok(Engine::MySql)
        } else if url.starts_with("postgresql://") || url.starts_with("postgres://") {
            Ok(Engine::Postgres)
        } else {
            Err(CoreError::Config(format!(
                "unsupported database URL '{}': use sqlite://, mysql:// or postgresql://",
                url
            )))
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Engine::Sqlite => write!(f, "sqlite"),
            Engine::MySql => write!(f, "mysql"),
            Engine::Postgres => write!(f, "postgresql"),
        }
    }
}

/// Physical layout version of the state-storage tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaEra {
    LegacyFlat,
    NormalizedMeta,
}

impl fmt::Display for SchemaEra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaEra::LegacyFlat => write!(f, "legacy-flat"),
            SchemaEra::NormalizedMeta => write!(f, "normalized-meta"),
        }
    }
}

/// Parameter placeholder dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` (MySQL/MariaDB)
    Question,
    /// `?1`, `?2`, ... (SQLite)
    QuestionNumbered,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

impl PlaceholderStyle {
    /// Placeholder text for the 1-based parameter position `n`.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::QuestionNumbered => format!("?{}", n),
            PlaceholderStyle::Dollar => format!("${}", n),
        }
    }
}

/// Static descriptor of one (engine, era) layout. Constructed at startup,
/// immutable, shared read-only across all queries.
#[derive(Debug, Clone, Copy)]
pub struct SchemaProfile {
    pub engine: Engine,
    pub era: SchemaEra,
    pub placeholder: PlaceholderStyle,
    /// State table name; aliased `s` in every query.
    pub states_table: &'static str,
    /// Metadata table (normalized era only); aliased `sm`.
    pub meta_table: Option<&'static str>,
    /// Attributes table (normalized era only); aliased `sa`.
    pub attrs_table: Option<&'static str>,
    /// Projection that yields the entity id.
    pub entity_id_expr: &'static str,
    /// Raw "last changed" column (nullable).
    pub changed_col: &'static str,
    /// Raw "last updated" column (always set).
    pub updated_col: &'static str,
    /// Projection that yields the attributes payload text.
    pub attrs_expr: &'static str,
    /// Row-id column used as the stable ordering tiebreak.
    pub row_id_col: &'static str,
    /// Template converting a timestamp column to epoch seconds; `{}` is
    /// replaced with the column expression. Identity for eras that already
    /// store epoch floats.
    epoch_template: &'static str,
}

impl SchemaProfile {
    /// Expression producing epoch seconds for a timestamp column.
    pub fn epoch_expr(&self, column: &str) -> String {
        self.epoch_template.replace("{}", column)
    }

    /// COALESCE of the two timestamp columns as epoch seconds. Used for
    /// both filtering and ordering so rows whose value never changed
    /// between polls are not silently dropped.
    pub fn effective_ts_expr(&self) -> String {
        format!(
            "COALESCE({}, {})",
            self.epoch_expr(self.changed_col),
            self.epoch_expr(self.updated_col)
        )
    }

    /// Look up the static profile for an (engine, era) pair.
    pub fn select(engine: Engine, era: SchemaEra) -> &'static SchemaProfile {
        PROFILES
            .iter()
            .find(|p| p.engine == engine && p.era == era)
            .expect("every (engine, era) pair has a profile")
    }
}

const NORMALIZED_SQLITE: SchemaProfile = SchemaProfile {
    engine: Engine::Sqlite,
    era: SchemaEra::NormalizedMeta,
    placeholder: PlaceholderStyle::QuestionNumbered,
    states_table: "states",
    meta_table: Some("states_meta"),
    attrs_table: Some("state_attributes"),
    entity_id_expr: "sm.entity_id",
    changed_col: "s.last_changed_ts",
    updated_col: "s.last_updated_ts",
    attrs_expr: "sa.shared_attrs",
    row_id_col: "s.state_id",
    epoch_template: "{}",
};

const NORMALIZED_MYSQL: SchemaProfile = SchemaProfile {
    placeholder: PlaceholderStyle::Question,
    engine: Engine::MySql,
    ..NORMALIZED_SQLITE
};

const NORMALIZED_POSTGRES: SchemaProfile = SchemaProfile {
    placeholder: PlaceholderStyle::Dollar,
    engine: Engine::Postgres,
    ..NORMALIZED_SQLITE
};

const LEGACY_SQLITE: SchemaProfile = SchemaProfile {
    engine: Engine::Sqlite,
    era: SchemaEra::LegacyFlat,
    placeholder: PlaceholderStyle::QuestionNumbered,
    states_table: "states",
    meta_table: None,
    attrs_table: None,
    entity_id_expr: "s.entity_id",
    changed_col: "s.last_changed",
    updated_col: "s.last_updated",
    attrs_expr: "s.attributes",
    row_id_col: "s.state_id",
    // strftime returns TEXT; cast so drivers see a numeric column.
    epoch_template: "CAST(strftime('%s', {}) AS REAL)",
};

const LEGACY_MYSQL: SchemaProfile = SchemaProfile {
    placeholder: PlaceholderStyle::Question,
    engine: Engine::MySql,
    epoch_template: "UNIX_TIMESTAMP({})",
    ..LEGACY_SQLITE
};

const LEGACY_POSTGRES: SchemaProfile = SchemaProfile {
    placeholder: PlaceholderStyle::Dollar,
    engine: Engine::Postgres,
    epoch_template: "EXTRACT(EPOCH FROM {})",
    ..LEGACY_SQLITE
};

/// All supported (engine, era) layouts.
pub const PROFILES: [SchemaProfile; 6] = [
    NORMALIZED_SQLITE,
    NORMALIZED_MYSQL,
    NORMALIZED_POSTGRES,
    LEGACY_SQLITE,
    LEGACY_MYSQL,
    LEGACY_POSTGRES,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_from_url() {
        assert_eq!(Engine::from_url("sqlite:///config/home-assistant_v2.db").unwrap(), Engine::Sqlite);
        assert_eq!(Engine::from_url("mysql://ha:pw@db:3306/homeassistant").unwrap(), Engine::MySql);
        assert_eq!(Engine::from_url("postgresql://ha@db/ha").unwrap(), Engine::Postgres);
        assert_eq!(Engine::from_url("postgres://ha@db/ha").unwrap(), Engine::Postgres);
        assert!(Engine::from_url("oracle://nope").is_err());
    }

    #[test]
    fn every_pair_has_a_profile() {
        for engine in [Engine::Sqlite, Engine::MySql, Engine::Postgres] {
            for era in [SchemaEra::LegacyFlat, SchemaEra::NormalizedMeta] {
                let p = SchemaProfile::select(engine, era);
                assert_eq!(p.engine, engine);
                assert_eq!(p.era, era);
            }
        }
    }

    #[test]
    fn normalized_era_has_join_tables() {
        let p = SchemaProfile::select(Engine::MySql, SchemaEra::NormalizedMeta);
        assert_eq!(p.meta_table, Some("states_meta"));
        assert_eq!(p.attrs_table, Some("state_attributes"));
    }

    #[test]
    fn legacy_converts_datetime_columns_to_epoch() {
        let p = SchemaProfile::select(Engine::MySql, SchemaEra::LegacyFlat);
        assert_eq!(p.epoch_expr("s.last_updated"), "UNIX_TIMESTAMP(s.last_updated)");

        let p = SchemaProfile::select(Engine::Postgres, SchemaEra::LegacyFlat);
        assert_eq!(p.epoch_expr("s.last_updated"), "EXTRACT(EPOCH FROM s.last_updated)");

        let p = SchemaProfile::select(Engine::Sqlite, SchemaEra::NormalizedMeta);
        assert_eq!(p.epoch_expr("s.last_updated_ts"), "s.last_updated_ts");
    }

    #[test]
    fn effective_ts_always_coalesces_both_columns() {
        for p in PROFILES {
            let expr = p.effective_ts_expr();
            assert!(expr.starts_with("COALESCE("), "{}", expr);
            assert!(expr.contains("last_changed"), "{}", expr);
            assert!(expr.contains("last_updated"), "{}", expr);
        }
    }

    #[test]
    fn placeholder_styles_differ_per_engine() {
        assert_eq!(PlaceholderStyle::Question.placeholder(3), "?");
        assert_eq!(PlaceholderStyle::QuestionNumbered.placeholder(3), "?3");
        assert_eq!(PlaceholderStyle::Dollar.placeholder(3), "$3");
    }
}
