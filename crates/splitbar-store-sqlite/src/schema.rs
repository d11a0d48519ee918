//! SQL schema for the Splitbar SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS experiments (
    experiment_id TEXT PRIMARY KEY,
    enabled       INTEGER NOT NULL,
    variants_json TEXT NOT NULL,     -- ordered JSON array of variants
    updated_at    TEXT NOT NULL
);

-- One row per (experiment, visitor, kind). The variant column is written by
-- the first INSERT only; conflicting writers touch last_seen_at/seen_count.
CREATE TABLE IF NOT EXISTS assignments (
    experiment_id TEXT NOT NULL,
    visitor_id    TEXT NOT NULL,
    visitor_kind  TEXT NOT NULL,     -- 'stable_user' | 'anonymous_token'
    variant_id    TEXT NOT NULL,
    assigned_at   TEXT NOT NULL,
    last_seen_at  TEXT NOT NULL,
    seen_count    INTEGER NOT NULL DEFAULT 1,
    UNIQUE (experiment_id, visitor_id, visitor_kind)
);

-- Events are strictly append-only.
-- No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS events (
    event_id      TEXT PRIMARY KEY,
    experiment_id TEXT NOT NULL,
    variant_id    TEXT NOT NULL DEFAULT '',
    visitor_id    TEXT NOT NULL DEFAULT '',
    event_type    TEXT NOT NULL,     -- 'impression' | 'click' | 'conversion'
    value         REAL,
    session_id    TEXT,
    recorded_at   TEXT NOT NULL      -- fixed-width RFC 3339 UTC; sortable
);

CREATE INDEX IF NOT EXISTS assignments_variant_idx
    ON assignments(experiment_id, variant_id);
CREATE INDEX IF NOT EXISTS events_variant_type_idx
    ON events(experiment_id, variant_id, event_type);
CREATE INDEX IF NOT EXISTS events_visitor_idx
    ON events(visitor_id, experiment_id, event_type, recorded_at);

PRAGMA user_version = 1;
";
