//! Persistence for Quill.
//!
//! This crate provides:
//! - Typed records for sites, pages, topics, articles and jobs
//! - One store trait per collection, combined into [`Store`]
//! - An in-memory backend for tests and dry runs
//! - A SQLite backend whose job claim is a single conditional update

mod error;
mod ids;
mod memory;
mod records;
mod sqlite;
mod store;

pub use error::StoreError;
pub use ids::{ArticleId, JobId, PageId, SiteId, TopicId};
pub use memory::MemoryStore;
pub use records::{
    Article, ArticleStatus, DEFAULT_CADENCE_PER_WEEK, DEFAULT_LANGUAGE, FailureKind, Job, JobKind,
    JobPatch, JobPayload, JobStatus, Link, NewArticle, NewPage, NewTopic, Page, Site, SiteUpsert,
    Source, Topic, TopicStatus, normalize_domain, normalize_slug, unique_slug,
};
pub use sqlite::SqliteStore;
pub use store::{ArticleStore, JobStore, PageStore, SiteStore, Store, TopicStore};
