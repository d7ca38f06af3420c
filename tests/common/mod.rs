//! Common test infrastructure
//!
//! Each test spawns its own [`TestServer`] backed by temporary directories and
//! a simulated ffmpeg, then talks to it through [`TestClient`].
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestServer, TestClient, USER_ID, PHRASE_1_ID};
//!
//! #[tokio::test]
//! async fn test_upload() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     let body = client.upload(USER_ID, PHRASE_1_ID, common::valid_m4a()).await;
//!     assert_eq!(body.code, "SUCCESS");
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;

pub use client::TestClient;
pub use constants::*;
#[allow(unused_imports)]
pub use fixtures::{not_audio, valid_m4a};
pub use server::TestServer;
