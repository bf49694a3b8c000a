//! HTTP client for the Quill collaborator service.
//!
//! One JSON endpoint serves planning, crawling, writing, linking and
//! publishing. [`CollaboratorClient`] implements every collaborator trait
//! the scheduler needs.

mod client;
mod error;

pub use client::{CollaboratorClient, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::HttpError;
