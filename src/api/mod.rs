//! Metadata access for the board JSON API.
//!
//! The API is read-only and serves two document shapes: a thread
//! (`{"posts": [...]}`) and a catalog (`[{"page": n, "threads": [...]}]`).
//! [`ApiClient`] fetches them as untyped [`serde_json::Value`]s; turning
//! them into media items is the job of [`crate::extract`].

mod client;
mod error;

pub use client::{API_REQUEST_TIMEOUT, ApiClient};
pub use error::ApiError;
