//! Database schema for users, phrases and audio records.
//!
//! At most one live audio row per (user_id, phrase_id) is enforced by a
//! partial unique index, so concurrent inserts can't both succeed.

pub const AUDIO_SCHEMA_VERSION: i64 = 1;

pub const AUDIO_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS phrases (
    id TEXT PRIMARY KEY,
    text TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS audio (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(id),
    phrase_id TEXT NOT NULL REFERENCES phrases(id),
    original_format TEXT NOT NULL,
    converted_format TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    description TEXT,
    created_at INTEGER NOT NULL,
    created_by TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    updated_by TEXT NOT NULL,
    deleted_at INTEGER,
    deleted_by TEXT
);

CREATE INDEX IF NOT EXISTS idx_audio_user_phrase_deleted
    ON audio(user_id, phrase_id, deleted_at);

CREATE UNIQUE INDEX IF NOT EXISTS idx_audio_live_user_phrase
    ON audio(user_id, phrase_id) WHERE deleted_at IS NULL;
"#;
