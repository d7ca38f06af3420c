mod models;
mod schema;
mod store;

pub use models::{Phrase, User};
pub use schema::{AUDIO_SCHEMA_SQL, AUDIO_SCHEMA_VERSION};
pub use store::{AudioStore, SqliteAudioStore};
