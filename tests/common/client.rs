//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per audio endpoint.

use super::constants::*;
use phrase_audio_server::server::BaseResponse;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    fn phrase_url(&self, user_id: &str, phrase_id: &str) -> String {
        format!(
            "{}/audio/user/{}/phrase/{}",
            self.base_url, user_id, phrase_id
        )
    }

    /// POST /audio/user/{user_id}/phrase/{phrase_id} with a multipart form
    pub async fn upload_form(&self, user_id: &str, phrase_id: &str, form: Form) -> Response {
        self.client
            .post(self.phrase_url(user_id, phrase_id))
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// Uploads `data` as the `file` field and returns the raw response
    pub async fn upload_raw(&self, user_id: &str, phrase_id: &str, data: Vec<u8>) -> Response {
        let part = Part::bytes(data)
            .file_name("recording.m4a")
            .mime_str("audio/mp4")
            .expect("Invalid mime type");
        self.upload_form(user_id, phrase_id, Form::new().part("file", part))
            .await
    }

    /// Uploads `data` and decodes the JSON body
    pub async fn upload(&self, user_id: &str, phrase_id: &str, data: Vec<u8>) -> BaseResponse {
        self.upload_raw(user_id, phrase_id, data)
            .await
            .json()
            .await
            .expect("Upload response is not a BaseResponse")
    }

    /// GET /audio/user/{user_id}/phrase/{phrase_id}/{format}
    pub async fn download(&self, user_id: &str, phrase_id: &str, format: &str) -> Response {
        self.client
            .get(format!("{}/{}", self.phrase_url(user_id, phrase_id), format))
            .send()
            .await
            .expect("Download request failed")
    }

    /// DELETE /audio/user/{user_id}/phrase/{phrase_id}
    pub async fn delete(&self, user_id: &str, phrase_id: &str) -> Response {
        self.client
            .delete(self.phrase_url(user_id, phrase_id))
            .send()
            .await
            .expect("Delete request failed")
    }

    /// DELETE with an explicit `deleted_by`
    pub async fn delete_as(&self, user_id: &str, phrase_id: &str, deleted_by: &str) -> Response {
        self.client
            .delete(self.phrase_url(user_id, phrase_id))
            .query(&[("deleted_by", deleted_by)])
            .send()
            .await
            .expect("Delete request failed")
    }
}
