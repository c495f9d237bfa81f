//! SQL schema for the Anchor SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
///
/// `parent_ref` and the edge endpoints carry no `REFERENCES` clause: dangling
/// references are found by the integrity verifier, not rejected on write.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- AUTOINCREMENT keeps ids monotonic: a deleted id is never handed out again.
CREATE TABLE IF NOT EXISTS entities (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    kind             TEXT NOT NULL,   -- 'file' | 'function' | 'type' | 'milestone' | 'task' | 'item' | 'subtask'
    name             TEXT NOT NULL,   -- canonical name once finalized
    base_name        TEXT NOT NULL,   -- name as requested; uniqueness key
    parent_ref       INTEGER,
    lifecycle_state  TEXT NOT NULL,   -- 'reserved' | 'finalized'
    content_checksum TEXT,
    status           TEXT NOT NULL DEFAULT 'pending',
    metadata         TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL,   -- ISO 8601 UTC
    updated_at       TEXT NOT NULL
);

-- No UNIQUE constraint: bulk imports may bring duplicates in, and the
-- verifier reports them.
CREATE INDEX IF NOT EXISTS entities_identity_idx ON entities(kind, parent_ref, base_name);
CREATE INDEX IF NOT EXISTS entities_parent_idx   ON entities(parent_ref);

CREATE TABLE IF NOT EXISTS edges (
    edge_id          INTEGER PRIMARY KEY,
    caller_id        INTEGER NOT NULL,
    callee_id        INTEGER NOT NULL,
    occurrence_count INTEGER NOT NULL DEFAULT 1,
    site_file_id     INTEGER,
    site_line        INTEGER
);

CREATE INDEX IF NOT EXISTS edges_caller_idx ON edges(caller_id);
CREATE INDEX IF NOT EXISTS edges_callee_idx ON edges(callee_id);

-- Strictly append-only. seq is the total order of store history.
CREATE TABLE IF NOT EXISTS audit_log (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at TEXT NOT NULL,
    event       TEXT NOT NULL,     -- AuditEvent discriminant
    entity_id   INTEGER,
    payload     TEXT NOT NULL      -- JSON-encoded AuditEvent
);

CREATE INDEX IF NOT EXISTS audit_entity_idx ON audit_log(entity_id);

PRAGMA user_version = 1;
";
