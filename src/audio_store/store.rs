//! SQLite store for users, phrases and audio metadata.

use super::models::{Phrase, User};
use super::schema::{AUDIO_SCHEMA_SQL, AUDIO_SCHEMA_VERSION};
use crate::audio::{AudioRecord, Format};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Metadata collaborator of the conversion pipeline.
pub trait AudioStore: Send + Sync {
    // ==================== Identity ====================

    fn user_exists(&self, user_id: &str) -> Result<bool>;

    fn phrase_exists(&self, phrase_id: &str) -> Result<bool>;

    fn add_user(&self, user: &User) -> Result<()>;

    fn add_phrase(&self, phrase: &Phrase) -> Result<()>;

    fn list_users(&self) -> Result<Vec<User>>;

    fn list_phrases(&self) -> Result<Vec<Phrase>>;

    // ==================== Audio ====================

    /// The live record for (user, phrase), if any.
    fn get_live_audio(&self, user_id: &str, phrase_id: &str) -> Result<Option<AudioRecord>>;

    /// Get a record by id, deleted or not.
    fn get_audio(&self, id: &str) -> Result<Option<AudioRecord>>;

    /// All records for a user, newest first, including deleted ones.
    fn list_audio_for_user(&self, user_id: &str) -> Result<Vec<AudioRecord>>;

    /// Insert `record` unless a live record already exists for its
    /// (user, phrase). Returns false when nothing was inserted.
    fn insert_audio_if_absent(&self, record: &AudioRecord) -> Result<bool>;

    /// Soft-delete the live record for (user, phrase).
    /// Returns the record as it is after deletion, or None when there was none.
    fn soft_delete_audio(
        &self,
        user_id: &str,
        phrase_id: &str,
        deleted_by: &str,
    ) -> Result<Option<AudioRecord>>;
}

/// SQLite implementation of AudioStore.
pub struct SqliteAudioStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAudioStore {
    /// Open or create the audio database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open audio database: {:?}", path))?;
        Self::init(conn)
    }

    /// Create an in-memory database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if version > AUDIO_SCHEMA_VERSION {
            bail!(
                "Audio database version {} is newer than supported version {}",
                version,
                AUDIO_SCHEMA_VERSION
            );
        }

        conn.execute_batch(AUDIO_SCHEMA_SQL)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", AUDIO_SCHEMA_VERSION))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_audio(row: &rusqlite::Row) -> rusqlite::Result<AudioRecord> {
        Ok(AudioRecord {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            phrase_id: row.get("phrase_id")?,
            original_format: parse_format_column(row, "original_format")?,
            converted_format: parse_format_column(row, "converted_format")?,
            storage_key: row.get("storage_key")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
            created_by: row.get("created_by")?,
            updated_at: row.get("updated_at")?,
            updated_by: row.get("updated_by")?,
            deleted_at: row.get("deleted_at")?,
            deleted_by: row.get("deleted_by")?,
        })
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get("id")?,
            name: row.get("name")?,
            created_at: row.get("created_at")?,
        })
    }

    fn row_to_phrase(row: &rusqlite::Row) -> rusqlite::Result<Phrase> {
        Ok(Phrase {
            id: row.get("id")?,
            text: row.get("text")?,
            created_at: row.get("created_at")?,
        })
    }
}

fn parse_format_column(row: &rusqlite::Row, column: &str) -> rusqlite::Result<Format> {
    let value: String = row.get(column)?;
    Format::parse(&value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown audio format '{}' in column {}", value, column).into(),
        )
    })
}

impl AudioStore for SqliteAudioStore {
    // ==================== Identity ====================

    fn user_exists(&self, user_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn phrase_exists(&self, phrase_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM phrases WHERE id = ?1)",
            params![phrase_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn add_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![user.id, user.name, user.created_at],
        )
        .with_context(|| format!("Failed to add user {}", user.id))?;
        Ok(())
    }

    fn add_phrase(&self, phrase: &Phrase) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO phrases (id, text, created_at) VALUES (?1, ?2, ?3)",
            params![phrase.id, phrase.text, phrase.created_at],
        )
        .with_context(|| format!("Failed to add phrase {}", phrase.id))?;
        Ok(())
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY created_at, id")?;
        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn list_phrases(&self) -> Result<Vec<Phrase>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM phrases ORDER BY created_at, id")?;
        let phrases = stmt
            .query_map([], Self::row_to_phrase)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(phrases)
    }

    // ==================== Audio ====================

    fn get_live_audio(&self, user_id: &str, phrase_id: &str) -> Result<Option<AudioRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT * FROM audio WHERE user_id = ?1 AND phrase_id = ?2 AND deleted_at IS NULL",
                params![user_id, phrase_id],
                Self::row_to_audio,
            )
            .optional()?;
        Ok(result)
    }

    fn get_audio(&self, id: &str) -> Result<Option<AudioRecord>> {
        let conn = self.conn.lock().unwrap();
        let result = conn
            .query_row(
                "SELECT * FROM audio WHERE id = ?1",
                params![id],
                Self::row_to_audio,
            )
            .optional()?;
        Ok(result)
    }

    fn list_audio_for_user(&self, user_id: &str) -> Result<Vec<AudioRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM audio WHERE user_id = ?1 ORDER BY created_at DESC, id",
        )?;
        let records = stmt
            .query_map(params![user_id], Self::row_to_audio)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn insert_audio_if_absent(&self, record: &AudioRecord) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            r#"
            INSERT INTO audio (
                id, user_id, phrase_id, original_format, converted_format, storage_key,
                description, created_at, created_by, updated_at, updated_by,
                deleted_at, deleted_by
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, NULL
            WHERE NOT EXISTS (
                SELECT 1 FROM audio
                WHERE user_id = ?2 AND phrase_id = ?3 AND deleted_at IS NULL
            )
            ON CONFLICT DO NOTHING
            "#,
            params![
                record.id,
                record.user_id,
                record.phrase_id,
                record.original_format.as_str(),
                record.converted_format.as_str(),
                record.storage_key,
                record.description,
                record.created_at,
                record.created_by,
                record.updated_at,
                record.updated_by,
            ],
        )?;
        Ok(inserted == 1)
    }

    fn soft_delete_audio(
        &self,
        user_id: &str,
        phrase_id: &str,
        deleted_by: &str,
    ) -> Result<Option<AudioRecord>> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().timestamp_millis();

        let id: Option<String> = conn
            .query_row(
                r#"
                UPDATE audio SET
                    deleted_at = ?3, deleted_by = ?4, updated_at = ?3, updated_by = ?4
                WHERE user_id = ?1 AND phrase_id = ?2 AND deleted_at IS NULL
                RETURNING id
                "#,
                params![user_id, phrase_id, now, deleted_by],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(None);
        };
        let record = conn
            .query_row(
                "SELECT * FROM audio WHERE id = ?1",
                params![id],
                Self::row_to_audio,
            )
            .optional()?;
        Ok(record)
    }
}
