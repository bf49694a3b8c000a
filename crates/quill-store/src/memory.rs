//! In-memory store.
//!
//! Every operation takes the state lock once, so each call is atomic with
//! respect to every other call. Used by tests and for dry runs.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    Article, ArticleId, ArticleStatus, ArticleStore, Job, JobId, JobPatch, JobPayload, JobStatus,
    JobStore, Link, NewArticle, NewPage, NewTopic, Page, PageStore, Site, SiteId, SiteStore,
    SiteUpsert, StoreError, Topic, TopicId, TopicStatus, TopicStore, normalize_domain,
    normalize_slug,
};

#[derive(Debug, Default)]
struct MemoryState {
    sites: Vec<Site>,
    pages: Vec<Page>,
    topics: Vec<Topic>,
    articles: Vec<Article>,
    jobs: Vec<Job>,
    next_seq: u64,
}

/// A store that keeps everything in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn upsert_site(
        &self,
        upsert: SiteUpsert,
        now: DateTime<Utc>,
    ) -> Result<Site, StoreError> {
        let domain = normalize_domain(&upsert.domain);
        let mut state = self.state.write().await;
        if let Some(site) = state.sites.iter_mut().find(|s| s.domain == domain) {
            upsert.merge_into(site, now);
            return Ok(site.clone());
        }
        let site = upsert.into_site(now);
        state.sites.push(site.clone());
        Ok(site)
    }

    async fn get_site(&self, id: SiteId) -> Result<Option<Site>, StoreError> {
        let state = self.state.read().await;
        Ok(state.sites.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        Ok(self.state.read().await.sites.clone())
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn upsert_pages(
        &self,
        site_id: SiteId,
        pages: Vec<NewPage>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.write().await;
        let count = pages.len();
        for page in pages {
            let slug = normalize_slug(&page.slug);
            match state
                .pages
                .iter_mut()
                .find(|p| p.site_id == site_id && p.slug == slug)
            {
                Some(existing) => page.merge_into(existing),
                None => state.pages.push(page.into_page(site_id, now)),
            }
        }
        Ok(count)
    }

    async fn list_pages(&self, site_id: SiteId) -> Result<Vec<Page>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .pages
            .iter()
            .filter(|p| p.site_id == site_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TopicStore for MemoryStore {
    async fn insert_topic(
        &self,
        site_id: SiteId,
        topic: NewTopic,
        now: DateTime<Utc>,
    ) -> Result<Topic, StoreError> {
        let topic = topic.into_topic(site_id, now);
        self.state.write().await.topics.push(topic.clone());
        Ok(topic)
    }

    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, StoreError> {
        let state = self.state.read().await;
        Ok(state.topics.iter().find(|t| t.id == id).cloned())
    }

    async fn list_topics(&self, site_id: SiteId) -> Result<Vec<Topic>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .topics
            .iter()
            .filter(|t| t.site_id == site_id)
            .cloned()
            .collect())
    }

    async fn set_topic_status(
        &self,
        id: TopicId,
        status: TopicStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let topic = state
            .topics
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::not_found("topics", id))?;
        topic.status = status;
        topic.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for MemoryStore {
    async fn create_article_draft(
        &self,
        article: NewArticle,
        now: DateTime<Utc>,
    ) -> Result<Article, StoreError> {
        let mut state = self.state.write().await;
        let existing: HashSet<String> = state
            .articles
            .iter()
            .filter(|a| a.site_id == article.site_id)
            .map(|a| a.slug.clone())
            .collect();
        let draft = article.into_draft(&existing, now);
        debug!(article_id = %draft.id, slug = %draft.slug, "stored article draft");
        state.articles.push(draft.clone());
        Ok(draft)
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>, StoreError> {
        let state = self.state.read().await;
        Ok(state.articles.iter().find(|a| a.id == id).cloned())
    }

    async fn list_articles(&self, site_id: SiteId) -> Result<Vec<Article>, StoreError> {
        let state = self.state.read().await;
        let mut articles: Vec<Article> = state
            .articles
            .iter()
            .filter(|a| a.site_id == site_id)
            .cloned()
            .collect();
        // Newest first; later inserts win ties.
        articles.reverse();
        articles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(articles)
    }

    async fn set_article_status(
        &self,
        id: ArticleId,
        status: ArticleStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let article = state
            .articles
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::not_found("articles", id))?;
        article.status = status;
        article.updated_at = now;
        Ok(())
    }

    async fn set_article_links(
        &self,
        id: ArticleId,
        links: Vec<Link>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let article = state
            .articles
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::not_found("articles", id))?;
        article.internal_links = links;
        article.updated_at = now;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(
        &self,
        site_id: Option<SiteId>,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let mut state = self.state.write().await;
        state.next_seq += 1;
        let mut job = Job::new(site_id, payload, now);
        job.seq = state.next_seq;
        state.jobs.push(job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let state = self.state.read().await;
        Ok(state.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let mut jobs = self.state.read().await.jobs.clone();
        jobs.sort_by_key(|j| j.seq);
        Ok(jobs)
    }

    async fn patch_job(&self, id: JobId, patch: JobPatch) -> Result<Job, StoreError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::not_found("jobs", id))?;
        patch.apply(job);
        Ok(job.clone())
    }

    async fn claim_job(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::not_found("jobs", id))?;
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        JobPatch::at(now).status(JobStatus::Running).apply(job);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_claims_succeed_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let job = store.create_job(None, JobPayload::Plan, now).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.claim_job(job.id, now).await },
            ));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn test_claim_unknown_job_is_not_found() {
        let store = MemoryStore::new();
        let result = store.claim_job(JobId::new(), Utc::now()).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_seq_increases() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let a = store.create_job(None, JobPayload::Plan, now).await.unwrap();
        let b = store.create_job(None, JobPayload::Plan, now).await.unwrap();
        assert!(b.seq > a.seq);
    }
}
