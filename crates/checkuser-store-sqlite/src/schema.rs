//! SQL schema for the CheckUser SQLite store.
//!
//! Executed once per connection at startup. Every statement is idempotent.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS actor (
    actor_id   INTEGER PRIMARY KEY,
    actor_name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS comment (
    comment_id   INTEGER PRIMARY KEY,
    comment_text TEXT NOT NULL
);

-- Event logs. Append-only apart from retention purges.
-- Timestamps are fixed-width RFC 3339 UTC strings; *_hex columns hold range
-- keys, so both compare correctly as plain text.

CREATE TABLE IF NOT EXISTS cu_changes (
    cuc_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    cuc_timestamp  TEXT    NOT NULL,
    cuc_actor      INTEGER NOT NULL,
    cuc_ip         TEXT,
    cuc_ip_hex     TEXT,
    cuc_xff        TEXT,
    cuc_xff_hex    TEXT,
    cuc_agent      TEXT CHECK (length(cuc_agent) <= 255),
    cuc_comment_id INTEGER,
    cuc_namespace  INTEGER NOT NULL DEFAULT 0,
    cuc_title      TEXT    NOT NULL DEFAULT '',
    cuc_page_id    INTEGER,
    cuc_this_oldid INTEGER,
    cuc_last_oldid INTEGER,
    cuc_minor      INTEGER NOT NULL DEFAULT 0,
    cuc_type       INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS cuc_actor_time   ON cu_changes(cuc_actor, cuc_timestamp);
CREATE INDEX IF NOT EXISTS cuc_ip_hex_time  ON cu_changes(cuc_ip_hex, cuc_timestamp);
CREATE INDEX IF NOT EXISTS cuc_xff_hex_time ON cu_changes(cuc_xff_hex, cuc_timestamp);
CREATE INDEX IF NOT EXISTS cuc_timestamp    ON cu_changes(cuc_timestamp);
CREATE INDEX IF NOT EXISTS cuc_this_oldid   ON cu_changes(cuc_this_oldid);

CREATE TABLE IF NOT EXISTS cu_log_event (
    cule_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    cule_timestamp  TEXT    NOT NULL,
    cule_actor      INTEGER NOT NULL,
    cule_ip         TEXT,
    cule_ip_hex     TEXT,
    cule_xff        TEXT,
    cule_xff_hex    TEXT,
    cule_agent      TEXT CHECK (length(cule_agent) <= 255),
    cule_comment_id INTEGER,
    cule_log_id     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS cule_actor_time   ON cu_log_event(cule_actor, cule_timestamp);
CREATE INDEX IF NOT EXISTS cule_ip_hex_time  ON cu_log_event(cule_ip_hex, cule_timestamp);
CREATE INDEX IF NOT EXISTS cule_xff_hex_time ON cu_log_event(cule_xff_hex, cule_timestamp);
CREATE INDEX IF NOT EXISTS cule_timestamp    ON cu_log_event(cule_timestamp);
CREATE INDEX IF NOT EXISTS cule_log_id       ON cu_log_event(cule_log_id);

-- Actions with no public log entry carry their own type, action and params.
CREATE TABLE IF NOT EXISTS cu_private_event (
    cupe_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    cupe_timestamp  TEXT    NOT NULL,
    cupe_actor      INTEGER NOT NULL,
    cupe_ip         TEXT,
    cupe_ip_hex     TEXT,
    cupe_xff        TEXT,
    cupe_xff_hex    TEXT,
    cupe_agent      TEXT CHECK (length(cupe_agent) <= 255),
    cupe_comment_id INTEGER,
    cupe_namespace  INTEGER NOT NULL DEFAULT 0,
    cupe_title      TEXT    NOT NULL DEFAULT '',
    cupe_page       INTEGER NOT NULL DEFAULT 0,
    cupe_log_type   TEXT    NOT NULL,
    cupe_log_action TEXT    NOT NULL,
    cupe_params     TEXT    -- JSON
);

CREATE INDEX IF NOT EXISTS cupe_actor_time   ON cu_private_event(cupe_actor, cupe_timestamp);
CREATE INDEX IF NOT EXISTS cupe_ip_hex_time  ON cu_private_event(cupe_ip_hex, cupe_timestamp);
CREATE INDEX IF NOT EXISTS cupe_xff_hex_time ON cu_private_event(cupe_xff_hex, cupe_timestamp);
CREATE INDEX IF NOT EXISTS cupe_timestamp    ON cu_private_event(cupe_timestamp);

-- Client-Hints: deduplicated name/value pairs plus per-event mappings.
-- uachm_reference_type is the event source tag (0 change, 1 log event,
-- 2 private event).
CREATE TABLE IF NOT EXISTS cu_useragent_clienthints (
    uach_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    uach_name  TEXT NOT NULL,
    uach_value TEXT NOT NULL,
    UNIQUE (uach_name, uach_value)
);

CREATE TABLE IF NOT EXISTS cu_useragent_clienthints_map (
    uachm_uach_id        INTEGER NOT NULL,
    uachm_reference_id   INTEGER NOT NULL,
    uachm_reference_type INTEGER NOT NULL,
    PRIMARY KEY (uachm_reference_type, uachm_reference_id, uachm_uach_id)
);

CREATE INDEX IF NOT EXISTS uachm_uach_id ON cu_useragent_clienthints_map(uachm_uach_id);

-- Central index. One wiki id per domain, enforced by the UNIQUE constraint.
CREATE TABLE IF NOT EXISTS cuci_wiki_map (
    ciwm_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    ciwm_wiki TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS cuci_user (
    ciu_central_id INTEGER NOT NULL,
    ciu_ciwm_id    INTEGER NOT NULL,
    ciu_timestamp  TEXT    NOT NULL,
    PRIMARY KEY (ciu_ciwm_id, ciu_central_id)
);

CREATE INDEX IF NOT EXISTS ciu_central_id_timestamp ON cuci_user(ciu_central_id, ciu_timestamp);
CREATE INDEX IF NOT EXISTS ciu_ciwm_timestamp       ON cuci_user(ciu_ciwm_id, ciu_timestamp);

CREATE TABLE IF NOT EXISTS cuci_temp_edit (
    cite_ip_hex    TEXT    NOT NULL,
    cite_ciwm_id   INTEGER NOT NULL,
    cite_timestamp TEXT    NOT NULL,
    PRIMARY KEY (cite_ip_hex, cite_ciwm_id)
);

CREATE INDEX IF NOT EXISTS cite_ciwm_timestamp ON cuci_temp_edit(cite_ciwm_id, cite_timestamp);

-- Advisory locks for background jobs.
CREATE TABLE IF NOT EXISTS job_lock (
    lock_name   TEXT PRIMARY KEY,
    acquired_at TEXT NOT NULL
);

PRAGMA user_version = 1;
";
