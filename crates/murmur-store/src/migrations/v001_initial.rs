//! v001 -- Initial schema creation.
//!
//! Creates the node tables: `local_identity`, `users`, `messages`,
//! `queued_events`, `endpoint_stats` and `file_store`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Local identity (single row)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS local_identity (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    secret_key  TEXT NOT NULL,                -- hex-encoded Ed25519 secret
    username    TEXT NOT NULL DEFAULT '',
    bio         TEXT NOT NULL DEFAULT '',
    endpoint    TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL                 -- RFC-3339
);

-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL DEFAULT '',
    public_key  TEXT NOT NULL,                -- armored public key
    fingerprint TEXT NOT NULL UNIQUE,         -- lower-hex
    key_id      TEXT NOT NULL,                -- last 16 chars of fingerprint
    endpoint    TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_key_id ON users(key_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    key_id      TEXT NOT NULL,
    body        TEXT NOT NULL,
    kind        TEXT NOT NULL DEFAULT 'text',
    msg_uuid    TEXT NOT NULL DEFAULT '',
    incoming    INTEGER NOT NULL,             -- boolean 0/1
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_key_ts ON messages(key_id, created_at DESC);

-- ----------------------------------------------------------------
-- Outbound queue
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS queued_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    body         BLOB NOT NULL,               -- sealed envelope bytes
    endpoint     TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    last_relayed TEXT,
    relay_tries  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_queued_events_endpoint ON queued_events(endpoint);

-- ----------------------------------------------------------------
-- Per-destination backoff state
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS endpoint_stats (
    endpoint          TEXT PRIMARY KEY NOT NULL,
    fail_streak       INTEGER NOT NULL DEFAULT 0,
    current_delay     INTEGER NOT NULL DEFAULT 0,
    delay_elapsed     INTEGER NOT NULL DEFAULT 0,
    last_contact_out  TEXT
);

-- ----------------------------------------------------------------
-- Synchronized file objects
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS file_store (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_key_id       TEXT NOT NULL,
    uuid               TEXT NOT NULL,
    path               TEXT NOT NULL,
    content_hash       TEXT NOT NULL,
    size_bytes         INTEGER NOT NULL DEFAULT 0,
    modify_time        TEXT NOT NULL,
    is_deleted         INTEGER NOT NULL DEFAULT 0,
    is_downloading     INTEGER NOT NULL DEFAULT 0,
    external_http_path TEXT,                   -- pending remote locator
    created_at         TEXT NOT NULL,

    UNIQUE (owner_key_id, uuid)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
