//! Escruta HTTP API.

mod client;
mod error;
mod notebooks;
mod types;

pub use client::ApiClient;
pub use error::FetchError;
pub use notebooks::NotebooksApi;
pub use types::*;
