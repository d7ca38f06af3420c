//! Domain types shared by the conversion pipeline and its collaborators.

mod error;
mod format;
mod models;

pub use error::AudioError;
pub use format::Format;
pub use models::AudioRecord;
