//! Client for the Escruta notebook API.
//!
//! [`fetch::Fetcher`] is the entry point: an authenticated HTTP client with a
//! shared, TTL-bounded response cache. [`api::NotebooksApi`] and
//! [`auth::AuthService`] build typed operations on top of it.

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod fetch;
pub mod logging;
pub mod session;
