//! Typed notebook, note, source and chat endpoints.
//!
//! Reads go through the shared cache with the fetcher's default cache time.
//! Writes are never cached and, once the server accepts them, drop the cached
//! reads they make stale.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::error::FetchError;
use crate::api::types::{
  ChatReply, ChatRequest, ExampleQuestions, NewNote, NewNotebook, NewSource, Note, NoteUpdate,
  Notebook, NotebookContent, NotebookUpdate, Source,
};
use crate::fetch::{decode, Fetcher, Method, RequestOptions, Upload};

/// Escruta resource endpoints over a [`Fetcher`].
#[derive(Clone, Debug)]
pub struct NotebooksApi {
  fetcher: Fetcher,
}

impl NotebooksApi {
  pub fn new(fetcher: Fetcher) -> Self {
    Self { fetcher }
  }

  pub fn fetcher(&self) -> &Fetcher {
    &self.fetcher
  }

  // --- notebooks ---

  pub async fn notebooks(&self, force: bool) -> Result<Vec<Notebook>, FetchError> {
    self.read(&paths::notebooks(), force).await
  }

  /// A notebook with its notes and sources.
  pub async fn notebook(&self, id: &str, force: bool) -> Result<NotebookContent, FetchError> {
    self.read(&paths::notebook(id), force).await
  }

  pub async fn create_notebook(&self, notebook: &NewNotebook) -> Result<Notebook, FetchError> {
    self
      .write(
        &paths::notebooks(),
        RequestOptions::post(to_json(notebook)?),
        &[paths::notebooks()],
      )
      .await
  }

  pub async fn update_notebook(&self, update: &NotebookUpdate) -> Result<Notebook, FetchError> {
    self
      .write(
        &paths::notebooks(),
        RequestOptions::put(to_json(update)?),
        &[paths::notebooks(), paths::notebook(&update.id)],
      )
      .await
  }

  /// The server identifies the notebook to delete by a JSON body, not the path.
  pub async fn delete_notebook(&self, id: &str) -> Result<Notebook, FetchError> {
    self
      .write(
        &paths::notebooks(),
        RequestOptions::delete().json(json!({ "id": id })),
        &[paths::notebooks(), paths::notebook(id)],
      )
      .await
  }

  // --- notes ---

  pub async fn notes(&self, notebook_id: &str, force: bool) -> Result<Vec<Note>, FetchError> {
    self.read(&paths::notes(notebook_id), force).await
  }

  pub async fn note(&self, notebook_id: &str, note_id: &str, force: bool) -> Result<Note, FetchError> {
    self.read(&paths::note(notebook_id, note_id), force).await
  }

  pub async fn create_note(&self, notebook_id: &str, note: &NewNote) -> Result<Note, FetchError> {
    self
      .write(
        &paths::notes(notebook_id),
        RequestOptions::post(to_json(note)?),
        &[paths::notes(notebook_id), paths::notebook(notebook_id)],
      )
      .await
  }

  pub async fn update_note(&self, notebook_id: &str, update: &NoteUpdate) -> Result<Note, FetchError> {
    self
      .write(
        &paths::notes(notebook_id),
        RequestOptions::put(to_json(update)?),
        &[
          paths::notes(notebook_id),
          paths::note(notebook_id, &update.id),
          paths::notebook(notebook_id),
        ],
      )
      .await
  }

  pub async fn delete_note(&self, notebook_id: &str, note_id: &str) -> Result<Note, FetchError> {
    self
      .write(
        &paths::note(notebook_id, note_id),
        RequestOptions::delete(),
        &[
          paths::notes(notebook_id),
          paths::note(notebook_id, note_id),
          paths::notebook(notebook_id),
        ],
      )
      .await
  }

  // --- sources ---

  pub async fn sources(&self, notebook_id: &str, force: bool) -> Result<Vec<Source>, FetchError> {
    self.read(&paths::sources(notebook_id), force).await
  }

  pub async fn source(&self, notebook_id: &str, source_id: &str, force: bool) -> Result<Source, FetchError> {
    self.read(&paths::source(notebook_id, source_id), force).await
  }

  /// Add a web source. With `ai_converter` the server converts the page
  /// content with its model instead of plain extraction.
  pub async fn add_source(
    &self,
    notebook_id: &str,
    source: &NewSource,
    ai_converter: bool,
  ) -> Result<Source, FetchError> {
    self
      .write(
        &paths::sources(notebook_id),
        RequestOptions::post(to_json(source)?).param("aiConverter", ai_converter),
        &[paths::sources(notebook_id), paths::notebook(notebook_id)],
      )
      .await
  }

  /// Upload a file source as `multipart/form-data`.
  pub async fn upload_source(
    &self,
    notebook_id: &str,
    title: &str,
    icon: Option<&str>,
    file: Upload,
    ai_converter: bool,
  ) -> Result<Source, FetchError> {
    let mut upload = file
      .with_field("title", title)
      .with_field("aiConverter", ai_converter.to_string());
    if let Some(icon) = icon {
      upload = upload.with_field("icon", icon);
    }

    self
      .write(
        &paths::upload(notebook_id),
        RequestOptions::new()
          .method(Method::Post)
          .upload(upload),
        &[paths::sources(notebook_id), paths::notebook(notebook_id)],
      )
      .await
  }

  pub async fn delete_source(&self, notebook_id: &str, source_id: &str) -> Result<Source, FetchError> {
    self
      .write(
        &paths::source(notebook_id, source_id),
        RequestOptions::delete(),
        &[
          paths::sources(notebook_id),
          paths::source(notebook_id, source_id),
          paths::source_summary(notebook_id, source_id),
          paths::notebook(notebook_id),
        ],
      )
      .await
  }

  // --- summaries ---

  /// Stored summary of a source; empty when none has been generated.
  pub async fn source_summary(
    &self,
    notebook_id: &str,
    source_id: &str,
    force: bool,
  ) -> Result<String, FetchError> {
    let summary: Option<String> = self
      .read(&paths::source_summary(notebook_id, source_id), force)
      .await?;
    Ok(summary.unwrap_or_default())
  }

  pub async fn generate_source_summary(&self, notebook_id: &str, source_id: &str) -> Result<String, FetchError> {
    let endpoint = paths::source_summary(notebook_id, source_id);
    let summary: Option<String> = self
      .write(&endpoint, RequestOptions::new().method(Method::Post), &[endpoint.clone()])
      .await?;
    Ok(summary.unwrap_or_default())
  }

  pub async fn delete_source_summary(&self, notebook_id: &str, source_id: &str) -> Result<(), FetchError> {
    let endpoint = paths::source_summary(notebook_id, source_id);
    let _: Value = self
      .write(&endpoint, RequestOptions::delete(), &[endpoint.clone()])
      .await?;
    Ok(())
  }

  /// Stored notebook summary; empty when none has been generated.
  pub async fn summary(&self, notebook_id: &str, force: bool) -> Result<String, FetchError> {
    let summary: Option<String> = self.read(&paths::summary(notebook_id), force).await?;
    Ok(summary.unwrap_or_default())
  }

  pub async fn generate_summary(&self, notebook_id: &str) -> Result<String, FetchError> {
    let endpoint = paths::summary(notebook_id);
    let summary: Option<String> = self
      .write(&endpoint, RequestOptions::new().method(Method::Post), &[endpoint.clone()])
      .await?;
    Ok(summary.unwrap_or_default())
  }

  // --- chat ---

  pub async fn example_questions(&self, notebook_id: &str, force: bool) -> Result<Vec<String>, FetchError> {
    let questions: ExampleQuestions = self.read(&paths::example_questions(notebook_id), force).await?;
    Ok(questions.into_vec())
  }

  /// Ask a question about the notebook's sources. Never cached.
  pub async fn chat(&self, notebook_id: &str, request: &ChatRequest) -> Result<ChatReply, FetchError> {
    let result = self
      .fetcher
      .request(
        &paths::chat(notebook_id),
        &RequestOptions::post(to_json(request)?).no_cache(),
        true,
      )
      .await?;
    decode(&result.data)
  }

  async fn read<T: DeserializeOwned>(&self, endpoint: &str, force: bool) -> Result<T, FetchError> {
    let result = self
      .fetcher
      .request_as::<T>(endpoint, &RequestOptions::get(), force)
      .await?;
    Ok(result.data)
  }

  async fn write<T: DeserializeOwned>(
    &self,
    endpoint: &str,
    options: RequestOptions,
    stale: &[String],
  ) -> Result<T, FetchError> {
    let result = self.fetcher.request(endpoint, &options.no_cache(), true).await?;
    for path in stale {
      self.invalidate(path);
    }
    decode(&result.data)
  }

  /// Drop the cached GET response for `endpoint`.
  pub fn invalidate(&self, endpoint: &str) -> bool {
    let removed = self
      .fetcher
      .clear_cache(Some(&RequestOptions::get().cache_key(endpoint)));
    if removed > 0 {
      debug!(endpoint, "invalidated cached read");
    }
    removed > 0
  }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, FetchError> {
  serde_json::to_value(value).map_err(|e| FetchError::invalid(e.to_string()))
}

/// Endpoint paths, relative to the API base URL.
pub(crate) mod paths {
  pub fn notebooks() -> String {
    "/notebooks".to_string()
  }

  pub fn notebook(id: &str) -> String {
    format!("/notebooks/{}", id)
  }

  pub fn notes(notebook_id: &str) -> String {
    format!("/notebooks/{}/notes", notebook_id)
  }

  pub fn note(notebook_id: &str, note_id: &str) -> String {
    format!("/notebooks/{}/notes/{}", notebook_id, note_id)
  }

  pub fn sources(notebook_id: &str) -> String {
    format!("/notebooks/{}/sources", notebook_id)
  }

  pub fn upload(notebook_id: &str) -> String {
    format!("/notebooks/{}/sources/upload", notebook_id)
  }

  pub fn source(notebook_id: &str, source_id: &str) -> String {
    format!("/notebooks/{}/sources/{}", notebook_id, source_id)
  }

  pub fn source_summary(notebook_id: &str, source_id: &str) -> String {
    format!("/notebooks/{}/sources/{}/summary", notebook_id, source_id)
  }

  pub fn summary(notebook_id: &str) -> String {
    format!("/notebooks/{}/summary", notebook_id)
  }

  pub fn example_questions(notebook_id: &str) -> String {
    format!("/notebooks/{}/example-questions", notebook_id)
  }

  pub fn chat(notebook_id: &str) -> String {
    format!("/notebooks/{}/chat", notebook_id)
  }
}
