//! Persisted audio record.

use serde::{Deserialize, Serialize};

use super::Format;

/// A stored audio asset for a (user, phrase) pair.
///
/// Timestamps are Unix milliseconds. A record is live while `deleted_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioRecord {
    pub id: String,
    pub user_id: String,
    pub phrase_id: String,
    pub original_format: Format,
    pub converted_format: Format,
    /// Key of the canonical bytes in the blob store.
    pub storage_key: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub created_by: String,
    pub updated_at: i64,
    pub updated_by: String,
    pub deleted_at: Option<i64>,
    pub deleted_by: Option<String>,
}

impl AudioRecord {
    /// Create a new live record owned by `user_id`, with a fresh id.
    pub fn new(
        user_id: impl Into<String>,
        phrase_id: impl Into<String>,
        original_format: Format,
        converted_format: Format,
        storage_key: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            phrase_id: phrase_id.into(),
            original_format,
            converted_format,
            storage_key: storage_key.into(),
            description: None,
            created_at: now,
            created_by: user_id.clone(),
            updated_at: now,
            updated_by: user_id.clone(),
            deleted_at: None,
            deleted_by: None,
            user_id,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}
