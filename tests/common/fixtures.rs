//! Test fixture creation

use super::constants::*;
use anyhow::Result;
use phrase_audio_server::audio_store::{AudioStore, Phrase, SqliteAudioStore, User};
use phrase_audio_server::conversion::test_support::FAKE_M4A_MAGIC;
use std::path::PathBuf;
use tempfile::TempDir;

/// Bytes the simulated ffmpeg recognises as an MPEG-4/AAC upload.
pub fn valid_m4a() -> Vec<u8> {
    let mut data = FAKE_M4A_MAGIC.to_vec();
    data.extend_from_slice(b"\x00\x00\x00\x08free");
    data.extend((0u8..=255).cycle().take(2048));
    data
}

/// Plain text dressed up as an upload.
pub fn not_audio() -> Vec<u8> {
    b"this is definitely not an audio file\n".to_vec()
}

/// Creates a temporary database directory with the seeded user and phrases.
/// Returns (temp_dir, db_path)
pub fn create_test_db() -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let db_path = dir.path().join("audio.db");

    let store = SqliteAudioStore::open(&db_path)?;
    store.add_user(&User::with_id(USER_ID, USER_NAME))?;
    store.add_phrase(&Phrase::with_id(PHRASE_1_ID, PHRASE_1_TEXT))?;
    store.add_phrase(&Phrase::with_id(PHRASE_2_ID, PHRASE_2_TEXT))?;

    Ok((dir, db_path))
}
