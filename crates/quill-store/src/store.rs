//! Store traits, one per collection.
//!
//! The traits are plain typed persistence: no business rules beyond what a
//! document store would enforce (unique slugs, upsert-by-key). The only
//! operation with concurrency semantics is [`JobStore::claim_job`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Article, ArticleId, ArticleStatus, Job, JobId, JobPatch, JobPayload, JobStatus, Link,
    NewArticle, NewPage, NewTopic, Page, Site, SiteId, SiteUpsert, StoreError, Topic, TopicId,
    TopicStatus,
};

#[async_trait]
pub trait SiteStore: Send + Sync {
    /// Create a site or merge into the one with the same normalized domain.
    async fn upsert_site(&self, upsert: SiteUpsert, now: DateTime<Utc>)
    -> Result<Site, StoreError>;

    async fn get_site(&self, id: SiteId) -> Result<Option<Site>, StoreError>;

    /// All sites, oldest first.
    async fn list_sites(&self) -> Result<Vec<Site>, StoreError>;
}

#[async_trait]
pub trait PageStore: Send + Sync {
    /// Insert pages, merging into existing pages with the same slug.
    async fn upsert_pages(
        &self,
        site_id: SiteId,
        pages: Vec<NewPage>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    async fn list_pages(&self, site_id: SiteId) -> Result<Vec<Page>, StoreError>;
}

#[async_trait]
pub trait TopicStore: Send + Sync {
    async fn insert_topic(
        &self,
        site_id: SiteId,
        topic: NewTopic,
        now: DateTime<Utc>,
    ) -> Result<Topic, StoreError>;

    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, StoreError>;

    /// Topics for a site in insertion order.
    async fn list_topics(&self, site_id: SiteId) -> Result<Vec<Topic>, StoreError>;

    async fn set_topic_status(
        &self,
        id: TopicId,
        status: TopicStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Store a draft, deduplicating its slug within the site.
    async fn create_article_draft(
        &self,
        article: NewArticle,
        now: DateTime<Utc>,
    ) -> Result<Article, StoreError>;

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>, StoreError>;

    /// Articles for a site, newest first.
    async fn list_articles(&self, site_id: SiteId) -> Result<Vec<Article>, StoreError>;

    async fn set_article_status(
        &self,
        id: ArticleId,
        status: ArticleStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn set_article_links(
        &self,
        id: ArticleId,
        links: Vec<Link>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a pending job; the store assigns its `seq`.
    async fn create_job(
        &self,
        site_id: Option<SiteId>,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Jobs with `status`, in queue order.
    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError>;

    /// All jobs, in queue order.
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;

    /// Apply a partial update. Fails with `NotFound` for unknown ids.
    async fn patch_job(&self, id: JobId, patch: JobPatch) -> Result<Job, StoreError>;

    /// Atomically move a job from `pending` to `running`.
    ///
    /// Returns `false` when the job is no longer pending at commit time, so
    /// at most one of any number of concurrent claims succeeds.
    async fn claim_job(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// Everything the scheduler needs from persistence.
pub trait Store: SiteStore + PageStore + TopicStore + ArticleStore + JobStore {}

impl<T> Store for T where T: SiteStore + PageStore + TopicStore + ArticleStore + JobStore {}
