//! Typed HTTP client for the shared notes service API.

use crate::error::ApiError;
use crate::model::Note;
use async_trait::async_trait;

/// Remote access seam. The engine and its pollers only see this trait, so
/// tests inject scripted fakes instead of a live server.
#[async_trait]
pub trait NoteApi: Send + Sync {
    /// GET the note stored remotely under `title`.
    async fn fetch(&self, title: &str) -> Result<Note, ApiError>;

    /// PUT `note` at its title-addressed resource.
    async fn push(&self, note: &Note) -> Result<(), ApiError>;
}

/// reqwest-backed client. One instance is constructed by whoever assembles
/// the engine and shared from there; there is no global singleton.
pub struct HttpNoteApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpNoteApi {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Notes are addressed by title. Spaces and other reserved characters
    /// are percent-encoded into the path segment.
    fn note_url(&self, title: &str) -> String {
        format!("{}/notes/{}", self.base_url, urlencoding::encode(title))
    }
}

#[async_trait]
impl NoteApi for HttpNoteApi {
    async fn fetch(&self, title: &str) -> Result<Note, ApiError> {
        let resp = self
            .client
            .get(self.note_url(title))
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("fetch failed: {}", e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Transport(format!("fetch HTTP {}: {}", status, body)));
        }

        // A response missing any note field is a malformed payload, not a
        // defaulted note.
        resp.json::<Note>()
            .await
            .map_err(|e| ApiError::Transport(format!("malformed note payload: {}", e)))
    }

    async fn push(&self, note: &Note) -> Result<(), ApiError> {
        let resp = self
            .client
            .put(self.note_url(&note.title))
            .json(note)
            .send()
            .await
            .map_err(|e| ApiError::Transport(format!("push failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Transport(format!("push HTTP {}: {}", status, body)));
        }

        Ok(())
    }
}
