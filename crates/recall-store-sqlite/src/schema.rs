//! SQL schema for the Recall SQLite store.
//!
//! Every statement is idempotent, so the whole script runs on each open and
//! recreates whatever object has gone missing.

/// Connection pragmas applied on open, before the schema. `journal_mode` and
/// `mmap_size` report a row and are set separately.
pub const PRAGMAS: &str = "
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;
";

pub const BUSY_TIMEOUT_MS: u64 = 5000;

pub const MMAP_SIZE: i64 = 256 * 1024 * 1024;

/// Full schema DDL.
pub const SCHEMA: &str = "
-- Records are append-only; the core never updates or deletes them.
CREATE TABLE IF NOT EXISTS memory (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    ts       INTEGER NOT NULL CHECK (ts BETWEEN 0 AND 2147483647),
    role     TEXT    NOT NULL CHECK (role <> ''),
    insight  TEXT    NOT NULL CHECK (insight <> ''),
    raw      TEXT    NOT NULL DEFAULT '\"\"',   -- JSON string
    tags     TEXT    NOT NULL DEFAULT '[]'      -- JSON array
);

CREATE INDEX IF NOT EXISTS idx_memory_ts   ON memory(ts DESC);
CREATE INDEX IF NOT EXISTS idx_memory_role ON memory(role, ts DESC);

-- Searchable projection of insight + decoded raw at rowid = memory.id.
CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    content,
    tokenize = 'unicode61'
);

CREATE TRIGGER IF NOT EXISTS memory_ai AFTER INSERT ON memory BEGIN
    INSERT INTO memory_fts(rowid, content)
    VALUES (new.id, COALESCE(new.insight, '') || ' ' || COALESCE(
        CASE WHEN json_valid(new.raw) THEN json_extract(new.raw, '$') ELSE new.raw END, ''));
END;

CREATE TRIGGER IF NOT EXISTS memory_ad AFTER DELETE ON memory BEGIN
    DELETE FROM memory_fts WHERE rowid = old.id;
END;

CREATE TRIGGER IF NOT EXISTS memory_au AFTER UPDATE ON memory BEGIN
    DELETE FROM memory_fts WHERE rowid = old.id;
    INSERT INTO memory_fts(rowid, content)
    VALUES (new.id, COALESCE(new.insight, '') || ' ' || COALESCE(
        CASE WHEN json_valid(new.raw) THEN json_extract(new.raw, '$') ELSE new.raw END, ''));
END;

-- Stable public surface. Readers use these, never the table.
CREATE VIEW IF NOT EXISTS memory_compat AS
    SELECT id, ts, role, insight AS text FROM memory;

CREATE VIEW IF NOT EXISTS memory_roles AS
    SELECT id, ts, role, '' AS source, insight AS text FROM memory;

CREATE VIEW IF NOT EXISTS memory_text AS
    SELECT id, ts, role, '[]' AS tags, insight AS text_norm FROM memory;

CREATE VIEW IF NOT EXISTS memory_public AS
    SELECT id, ts, role, role AS \"from\", insight, raw, tags FROM memory;

CREATE TABLE IF NOT EXISTS locks (
    name        TEXT PRIMARY KEY,
    owner       TEXT NOT NULL,
    acquired_ts INTEGER NOT NULL
);
";

/// Re-emit every record through the same projection the insert trigger
/// uses. Run inside a transaction.
pub const REBUILD_FTS: &str = "
DELETE FROM memory_fts;
INSERT INTO memory_fts(rowid, content)
    SELECT id, COALESCE(insight, '') || ' ' || COALESCE(
        CASE WHEN json_valid(raw) THEN json_extract(raw, '$') ELSE raw END, '')
    FROM memory;
";

pub const TABLE: &str = "memory";
pub const FTS_TABLE: &str = "memory_fts";
pub const LOCKS_TABLE: &str = "locks";
pub const INDEXES: [&str; 2] = ["idx_memory_ts", "idx_memory_role"];
pub const TRIGGERS: [&str; 3] = ["memory_ai", "memory_ad", "memory_au"];
pub const VIEWS: [&str; 4] = ["memory_compat", "memory_roles", "memory_text", "memory_public"];
