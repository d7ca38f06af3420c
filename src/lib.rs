pub mod audio;
pub mod audio_store;
pub mod blob_store;
pub mod config;
pub mod conversion;
pub mod pipeline;
pub mod server;
