//! Job queue dispatch.
//!
//! Claims the oldest pending job and runs the handler for its payload. A
//! handler error is recorded on the job and reported in the outcome; it is
//! never raised to the caller.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use quill_store::{
    Article, ArticleId, ArticleStatus, FailureKind, Job, JobId, JobPatch, JobPayload, JobStatus,
    Site, SiteId, Store, TopicId, TopicStatus,
};

use crate::{Clock, Collaborators, JobError, SchedulerError, dedup};

/// Result of one [`Dispatcher::process_next_job`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchOutcome {
    /// The claimed job's handler finished successfully.
    pub processed: bool,
    /// The job that was claimed, if any.
    pub job_id: Option<JobId>,
    /// The handler error, or a publish failure recorded on a finished job.
    pub error: Option<String>,
}

impl DispatchOutcome {
    /// Nothing was claimed.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Whether a job was claimed and executed, successfully or not.
    pub fn claimed(&self) -> bool {
        self.job_id.is_some()
    }
}

/// Result of publishing one stored article.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub article_id: ArticleId,
    /// Where the publisher put the article.
    pub location: Option<String>,
    /// Why the article is not recorded as published.
    pub error: Option<String>,
}

/// Successful handler output.
struct HandlerOutput {
    result: Value,
    /// Set when the work is kept but a best-effort step failed.
    warning: Option<String>,
}

impl HandlerOutput {
    fn ok(result: Value) -> Self {
        Self {
            result,
            warning: None,
        }
    }
}

/// Claims and executes queued jobs.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn Store>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            collaborators,
            clock,
        }
    }

    /// Enqueue a job.
    #[tracing::instrument(skip(self))]
    pub async fn enqueue(
        &self,
        site_id: Option<SiteId>,
        payload: JobPayload,
    ) -> Result<Job, SchedulerError> {
        let job = self
            .store
            .create_job(site_id, payload, self.clock.now())
            .await?;
        debug!(job_id = %job.id, seq = job.seq, kind = %job.kind(), "enqueued job");
        Ok(job)
    }

    /// Claim the first pending job in queue order and execute it.
    ///
    /// Pending jobs whose claim loses a race are skipped. When nothing can be
    /// claimed, returns an idle outcome without writing anything.
    #[tracing::instrument(skip(self))]
    pub async fn process_next_job(&self) -> Result<DispatchOutcome, SchedulerError> {
        let pending = self.store.list_jobs_by_status(JobStatus::Pending).await?;

        for job in pending {
            if self.store.claim_job(job.id, self.clock.now()).await? {
                return Ok(self.execute(job).await);
            }
            debug!(job_id = %job.id, "claim lost, trying next job");
        }

        Ok(DispatchOutcome::idle())
    }

    /// Process jobs until the queue is empty or `limit` jobs were claimed.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self, limit: usize) -> Result<Vec<DispatchOutcome>, SchedulerError> {
        let mut outcomes = Vec::new();
        while outcomes.len() < limit {
            let outcome = self.process_next_job().await?;
            if !outcome.claimed() {
                break;
            }
            outcomes.push(outcome);
        }
        info!(claimed = outcomes.len(), "drained queue");
        Ok(outcomes)
    }

    /// Mark pending jobs (optionally only one site's) as done without running them.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_pending(&self, site_id: Option<SiteId>) -> Result<usize, SchedulerError> {
        let pending = self.store.list_jobs_by_status(JobStatus::Pending).await?;
        let mut cancelled = 0;

        for job in pending {
            if site_id.is_some() && job.site_id != site_id {
                continue;
            }
            let now = self.clock.now();
            // Claim first so a concurrent dispatcher cannot start it meanwhile
            if !self.store.claim_job(job.id, now).await? {
                continue;
            }
            self.store
                .patch_job(
                    job.id,
                    JobPatch::at(now)
                        .status(JobStatus::Done)
                        .result(json!({ "cancelled": true })),
                )
                .await?;
            cancelled += 1;
        }

        info!(cancelled, "cancelled pending jobs");
        Ok(cancelled)
    }

    /// Publish one of a site's stored articles, whatever its status.
    ///
    /// A publisher failure is reported in the outcome and leaves the article
    /// as it was.
    #[tracing::instrument(skip(self))]
    pub async fn publish_article(
        &self,
        site_id: SiteId,
        article_id: ArticleId,
    ) -> Result<PublishOutcome, SchedulerError> {
        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or(SchedulerError::SiteNotFound(site_id))?;
        let article = self
            .store
            .get_article(article_id)
            .await?
            .filter(|a| a.site_id == site_id)
            .ok_or(SchedulerError::ArticleNotFound(article_id))?;

        Ok(self.publish(&site, &article).await)
    }

    /// Publish every draft of a site. One failure does not stop the rest.
    #[tracing::instrument(skip(self))]
    pub async fn publish_drafts(
        &self,
        site_id: SiteId,
    ) -> Result<Vec<PublishOutcome>, SchedulerError> {
        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or(SchedulerError::SiteNotFound(site_id))?;

        let mut outcomes = Vec::new();
        for article in self.store.list_articles(site_id).await? {
            if article.status == ArticleStatus::Draft {
                outcomes.push(self.publish(&site, &article).await);
            }
        }

        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        info!(published = outcomes.len() - failed, failed, "published drafts");
        Ok(outcomes)
    }

    /// Hand `article` to the publisher and mark it published.
    async fn publish(&self, site: &Site, article: &Article) -> PublishOutcome {
        let (location, error) = match self.collaborators.publisher.publish(site, article).await {
            Ok(publication) => {
                let error = match self
                    .store
                    .set_article_status(article.id, ArticleStatus::Published, self.clock.now())
                    .await
                {
                    Ok(()) => {
                        info!(article_id = %article.id, location = %publication.location, "published article");
                        None
                    }
                    Err(e) => Some(format!("published but status not recorded: {}", e)),
                };
                (Some(publication.location), error)
            }
            Err(e) => (None, Some(format!("publish failed: {}", e))),
        };
        if let Some(error) = &error {
            warn!(article_id = %article.id, error = %error, "article kept unpublished");
        }

        PublishOutcome {
            article_id: article.id,
            location,
            error,
        }
    }

    /// Touch a running job so recovery does not reclaim it mid-handler.
    async fn heartbeat(&self, job_id: JobId) {
        if let Err(e) = self
            .store
            .patch_job(job_id, JobPatch::at(self.clock.now()))
            .await
        {
            warn!(%job_id, error = %e, "failed to record job heartbeat");
        }
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, kind = %job.kind()))]
    async fn execute(&self, job: Job) -> DispatchOutcome {
        info!("executing job");

        let (patch, outcome) = match self.run_handler(&job).await {
            Ok(output) => {
                let mut patch = JobPatch::at(self.clock.now())
                    .status(JobStatus::Done)
                    .result(output.result)
                    .clear_failure();
                patch = match &output.warning {
                    Some(warning) => patch.error(warning.clone()),
                    None => patch.clear_error(),
                };
                info!("job done");
                (
                    patch,
                    DispatchOutcome {
                        processed: true,
                        job_id: Some(job.id),
                        error: output.warning,
                    },
                )
            }
            Err(e) => {
                let kind = e.failure_kind();
                let message = e.to_string();
                match kind {
                    FailureKind::Transient => warn!(error = %message, "job failed, will retry"),
                    FailureKind::Permanent => error!(error = %message, "job failed permanently"),
                }
                (
                    JobPatch::at(self.clock.now())
                        .status(JobStatus::Failed)
                        .error(message.clone())
                        .failure(kind),
                    DispatchOutcome {
                        processed: false,
                        job_id: Some(job.id),
                        error: Some(message),
                    },
                )
            }
        };

        // Left running on failure; recovery reclaims it once stale
        if let Err(e) = self.store.patch_job(job.id, patch).await {
            error!(error = %e, "failed to record job outcome");
        }

        outcome
    }

    async fn run_handler(&self, job: &Job) -> Result<HandlerOutput, JobError> {
        let site_id = job.site_id.ok_or(JobError::MissingSite(job.kind()))?;
        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or(JobError::SiteNotFound(site_id))?;

        match &job.payload {
            JobPayload::Onboarding => self.onboard(&site).await,
            JobPayload::Plan => self.plan(&site).await,
            JobPayload::Article { topic_id } => {
                self.write_article(job.id, &site, *topic_id).await
            }
            JobPayload::Links { article_id } => self.link_article(&site, *article_id).await,
        }
    }

    async fn onboard(&self, site: &Site) -> Result<HandlerOutput, JobError> {
        let pages = self.collaborators.generator.crawl(site).await?;
        let count = self
            .store
            .upsert_pages(site.id, pages, self.clock.now())
            .await?;
        Ok(HandlerOutput::ok(json!({ "pages": count })))
    }

    async fn plan(&self, site: &Site) -> Result<HandlerOutput, JobError> {
        let proposals = self.collaborators.planner.propose(site).await?;
        let report =
            dedup::upsert_many(self.store.as_ref(), site.id, proposals, self.clock.now()).await?;
        Ok(HandlerOutput::ok(json!({
            "inserted": report.inserted,
            "skipped": report.skipped,
        })))
    }

    async fn write_article(
        &self,
        job_id: JobId,
        site: &Site,
        topic_id: Option<TopicId>,
    ) -> Result<HandlerOutput, JobError> {
        let topic = match topic_id {
            Some(id) => Some(
                self.store
                    .get_topic(id)
                    .await?
                    .filter(|t| t.site_id == site.id)
                    .ok_or(JobError::TopicNotFound(id))?,
            ),
            None => None,
        };

        let generated = self
            .collaborators
            .generator
            .write(site, topic.as_ref())
            .await?;
        let article = self
            .store
            .create_article_draft(
                generated.into_new_article(site, topic_id),
                self.clock.now(),
            )
            .await?;
        info!(article_id = %article.id, slug = %article.slug, "stored article draft");
        // Writing and publishing each get a full request timeout
        self.heartbeat(job_id).await;

        if let Some(topic) = &topic {
            if topic.status.can_advance_to(TopicStatus::Used) {
                self.store
                    .set_topic_status(topic.id, TopicStatus::Used, self.clock.now())
                    .await?;
            }
        }

        // The draft is kept whatever happens from here on
        let mut result = json!({
            "articleId": article.id,
            "slug": article.slug,
        });
        let published = self.publish(site, &article).await;
        if let Some(location) = published.location {
            result["location"] = Value::String(location);
        }

        Ok(HandlerOutput {
            result,
            warning: published.error,
        })
    }

    async fn link_article(
        &self,
        site: &Site,
        article_id: ArticleId,
    ) -> Result<HandlerOutput, JobError> {
        let article = self
            .store
            .get_article(article_id)
            .await?
            .filter(|a| a.site_id == site.id)
            .ok_or(JobError::ArticleNotFound(article_id))?;
        let pages = self.store.list_pages(site.id).await?;

        let links = self
            .collaborators
            .generator
            .links(site, &article, &pages)
            .await?;
        let count = links.len();
        self.store
            .set_article_links(article.id, links, self.clock.now())
            .await?;
        Ok(HandlerOutput::ok(json!({
            "articleId": article.id,
            "links": count,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::testing::ScriptedCollaborators;
    use crate::{
        CollaboratorError, ContentGenerator, DiscoveredPage, GeneratedArticle, ManualClock,
        Publication, Publisher,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use pretty_assertions::assert_eq;
    use quill_store::{
        ArticleStore, JobStore, Link, MemoryStore, NewPage, NewTopic, Page, SiteStore, SiteUpsert,
        Topic, TopicStore,
    };

    struct Harness {
        store: Arc<MemoryStore>,
        scripted: Arc<ScriptedCollaborators>,
        dispatcher: Dispatcher,
        site: Site,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let scripted = Arc::new(ScriptedCollaborators::default());
        let dispatcher = Dispatcher::new(
            store.clone(),
            Collaborators::from_shared(scripted.clone()),
            Arc::new(clock.clone()),
        );
        let site = store
            .upsert_site(SiteUpsert::domain("dispatch.test"), clock.now())
            .await
            .unwrap();
        Harness {
            store,
            scripted,
            dispatcher,
            site,
        }
    }

    #[tokio::test]
    async fn test_empty_queue_is_idle_and_writes_nothing() {
        let h = harness().await;
        let before = h.store.list_jobs().await.unwrap();

        let outcome = h.dispatcher.process_next_job().await.unwrap();
        assert_eq!(outcome, DispatchOutcome::idle());
        assert_eq!(h.store.list_jobs().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_jobs_run_in_seq_order() {
        let h = harness().await;
        let first = h
            .dispatcher
            .enqueue(Some(h.site.id), JobPayload::Onboarding)
            .await
            .unwrap();
        let second = h
            .dispatcher
            .enqueue(Some(h.site.id), JobPayload::Plan)
            .await
            .unwrap();

        let outcome = h.dispatcher.process_next_job().await.unwrap();
        assert_eq!(outcome.job_id, Some(first.id));
        let outcome = h.dispatcher.process_next_job().await.unwrap();
        assert_eq!(outcome.job_id, Some(second.id));
    }

    #[tokio::test]
    async fn test_article_job_publishes_and_uses_topic() {
        let h = harness().await;
        let topic = h
            .store
            .insert_topic(h.site.id, NewTopic::keyword("budget apps"), Utc::now())
            .await
            .unwrap();
        let job = h
            .dispatcher
            .enqueue(
                Some(h.site.id),
                JobPayload::Article {
                    topic_id: Some(topic.id),
                },
            )
            .await
            .unwrap();

        let outcome = h.dispatcher.process_next_job().await.unwrap();
        assert!(outcome.processed);
        assert_eq!(outcome.error, None);

        let job = h.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        let articles = h.store.list_articles(h.site.id).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].status, ArticleStatus::Published);
        assert_eq!(articles[0].topic_id, Some(topic.id));
        assert_eq!(
            job.result.unwrap()["articleId"],
            json!(articles[0].id.to_string())
        );

        let topic = h.store.get_topic(topic.id).await.unwrap().unwrap();
        assert_eq!(topic.status, TopicStatus::Used);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_draft_and_records_error() {
        let h = harness().await;
        h.scripted
            .fail_publish(CollaboratorError::Transient("git push rejected".into()));
        let job = h
            .dispatcher
            .enqueue(Some(h.site.id), JobPayload::Article { topic_id: None })
            .await
            .unwrap();

        let outcome = h.dispatcher.process_next_job().await.unwrap();
        assert!(outcome.processed);
        assert!(outcome.error.unwrap().contains("git push rejected"));

        let job = h.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.error.unwrap().contains("publish failed"));
        assert!(job.result.unwrap().get("articleId").is_some());

        let articles = h.store.list_articles(h.site.id).await.unwrap();
        assert_eq!(articles[0].status, ArticleStatus::Draft);
    }

    #[tokio::test]
    async fn test_handler_failure_is_recorded_not_raised() {
        let h = harness().await;
        h.scripted
            .fail_planning(CollaboratorError::Transient("planner overloaded".into()));
        let job = h
            .dispatcher
            .enqueue(Some(h.site.id), JobPayload::Plan)
            .await
            .unwrap();

        let outcome = h.dispatcher.process_next_job().await.unwrap();
        assert!(!outcome.processed);
        assert_eq!(outcome.job_id, Some(job.id));

        let job = h.store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failure, Some(FailureKind::Transient));
    }

    #[tokio::test]
    async fn test_missing_records_fail_permanently() {
        let h = harness().await;
        let no_site = h.dispatcher.enqueue(None, JobPayload::Plan).await.unwrap();
        let no_topic = h
            .dispatcher
            .enqueue(
                Some(h.site.id),
                JobPayload::Article {
                    topic_id: Some(TopicId::new()),
                },
            )
            .await
            .unwrap();
        let no_article = h
            .dispatcher
            .enqueue(
                Some(h.site.id),
                JobPayload::Links {
                    article_id: ArticleId::new(),
                },
            )
            .await
            .unwrap();

        h.dispatcher.drain(10).await.unwrap();
        for id in [no_site.id, no_topic.id, no_article.id] {
            let job = h.store.get_job(id).await.unwrap().unwrap();
            assert_eq!(job.status, JobStatus::Failed);
            assert_eq!(job.failure, Some(FailureKind::Permanent));
        }
        assert_eq!(h.scripted.calls().write, 0);
    }

    #[tokio::test]
    async fn test_onboarding_and_links() {
        let h = harness().await;
        h.scripted.set_pages(vec![NewPage {
            url: "https://dispatch.test/pricing".into(),
            slug: "/pricing".into(),
            ..Default::default()
        }]);
        h.dispatcher
            .enqueue(Some(h.site.id), JobPayload::Onboarding)
            .await
            .unwrap();
        h.dispatcher
            .enqueue(Some(h.site.id), JobPayload::Article { topic_id: None })
            .await
            .unwrap();
        h.dispatcher.drain(10).await.unwrap();

        let article = h.store.list_articles(h.site.id).await.unwrap().remove(0);
        h.dispatcher
            .enqueue(
                Some(h.site.id),
                JobPayload::Links {
                    article_id: article.id,
                },
            )
            .await
            .unwrap();
        let outcome = h.dispatcher.process_next_job().await.unwrap();
        assert!(outcome.processed);

        let article = h.store.get_article(article.id).await.unwrap().unwrap();
        assert_eq!(article.internal_links.len(), 1);
        assert_eq!(article.internal_links[0].href, "/pricing");
    }

    #[tokio::test]
    async fn test_drain_respects_limit_and_cancel_pending() {
        let h = harness().await;
        for _ in 0..4 {
            h.dispatcher
                .enqueue(Some(h.site.id), JobPayload::Plan)
                .await
                .unwrap();
        }

        let outcomes = h.dispatcher.drain(2).await.unwrap();
        assert_eq!(outcomes.len(), 2);

        let other = h
            .store
            .upsert_site(SiteUpsert::domain("other.test"), Utc::now())
            .await
            .unwrap();
        let other_job = h
            .dispatcher
            .enqueue(Some(other.id), JobPayload::Plan)
            .await
            .unwrap();

        let cancelled = h.dispatcher.cancel_pending(Some(h.site.id)).await.unwrap();
        assert_eq!(cancelled, 2);
        let pending = h.store.list_jobs_by_status(JobStatus::Pending).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, other_job.id);

        let done = h.store.list_jobs_by_status(JobStatus::Done).await.unwrap();
        let cancelled_results = done
            .iter()
            .filter(|j| j.result == Some(json!({ "cancelled": true })))
            .count();
        assert_eq!(cancelled_results, 2);
    }

    #[tokio::test]
    async fn test_failed_publish_can_be_retried() {
        let h = harness().await;
        h.scripted
            .fail_publish(CollaboratorError::Transient("git push rejected".into()));
        h.dispatcher
            .enqueue(Some(h.site.id), JobPayload::Article { topic_id: None })
            .await
            .unwrap();
        h.dispatcher.process_next_job().await.unwrap();
        let draft = h.store.list_articles(h.site.id).await.unwrap().remove(0);
        assert_eq!(draft.status, ArticleStatus::Draft);

        let outcome = h
            .dispatcher
            .publish_article(h.site.id, draft.id)
            .await
            .unwrap();
        assert_eq!(outcome.location, None);
        assert!(outcome.error.unwrap().contains("git push rejected"));

        h.scripted.recover();
        let outcome = h
            .dispatcher
            .publish_article(h.site.id, draft.id)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PublishOutcome {
                article_id: draft.id,
                location: Some(format!("https://dispatch.test{}", draft.slug)),
                error: None,
            }
        );
        let article = h.store.get_article(draft.id).await.unwrap().unwrap();
        assert_eq!(article.status, ArticleStatus::Published);
    }

    #[tokio::test]
    async fn test_publish_drafts_skips_published_and_foreign_articles() {
        let h = harness().await;
        h.scripted
            .fail_publish(CollaboratorError::Transient("git push rejected".into()));
        for _ in 0..2 {
            h.dispatcher
                .enqueue(Some(h.site.id), JobPayload::Article { topic_id: None })
                .await
                .unwrap();
        }
        h.dispatcher.drain(10).await.unwrap();

        let other = h
            .store
            .upsert_site(SiteUpsert::domain("other.test"), Utc::now())
            .await
            .unwrap();
        let draft = h.store.list_articles(h.site.id).await.unwrap().remove(0);
        let err = h
            .dispatcher
            .publish_article(other.id, draft.id)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ArticleNotFound(id) if id == draft.id));

        h.scripted.recover();
        let outcomes = h.dispatcher.publish_drafts(h.site.id).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.error.is_none()));
        assert_eq!(h.scripted.calls().publish, 4);

        assert!(h.dispatcher.publish_drafts(h.site.id).await.unwrap().is_empty());
        assert!(h.dispatcher.publish_drafts(other.id).await.unwrap().is_empty());
    }

    /// Takes four minutes of clock time to write.
    struct SlowWriter {
        inner: Arc<ScriptedCollaborators>,
        clock: ManualClock,
    }

    #[async_trait]
    impl ContentGenerator for SlowWriter {
        async fn write(
            &self,
            site: &Site,
            topic: Option<&Topic>,
        ) -> Result<GeneratedArticle, CollaboratorError> {
            self.clock.advance(Duration::minutes(4));
            self.inner.write(site, topic).await
        }

        async fn crawl(&self, site: &Site) -> Result<Vec<DiscoveredPage>, CollaboratorError> {
            self.inner.crawl(site).await
        }

        async fn links(
            &self,
            site: &Site,
            article: &Article,
            pages: &[Page],
        ) -> Result<Vec<Link>, CollaboratorError> {
            self.inner.links(site, article, pages).await
        }
    }

    /// Records `updated_at` of the running jobs at publish time.
    struct RunningJobWatcher {
        store: Arc<MemoryStore>,
        seen: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl Publisher for RunningJobWatcher {
        async fn publish(
            &self,
            site: &Site,
            article: &Article,
        ) -> Result<Publication, CollaboratorError> {
            let running = self
                .store
                .list_jobs_by_status(JobStatus::Running)
                .await
                .unwrap();
            self.seen
                .lock()
                .unwrap()
                .extend(running.iter().map(|j| j.updated_at));
            Ok(Publication {
                location: format!("https://{}{}", site.domain, article.slug),
            })
        }
    }

    #[tokio::test]
    async fn test_article_job_heartbeats_before_publishing() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let scripted = Arc::new(ScriptedCollaborators::default());
        let watcher = Arc::new(RunningJobWatcher {
            store: store.clone(),
            seen: Mutex::default(),
        });
        let collaborators = Collaborators {
            planner: scripted.clone(),
            generator: Arc::new(SlowWriter {
                inner: scripted.clone(),
                clock: clock.clone(),
            }),
            publisher: watcher.clone(),
        };
        let dispatcher = Dispatcher::new(store.clone(), collaborators, Arc::new(clock.clone()));
        let site = store
            .upsert_site(SiteUpsert::domain("slow.test"), clock.now())
            .await
            .unwrap();
        dispatcher
            .enqueue(Some(site.id), JobPayload::Article { topic_id: None })
            .await
            .unwrap();

        let claimed_at = clock.now();
        let outcome = dispatcher.process_next_job().await.unwrap();
        assert!(outcome.processed);
        assert_eq!(
            *watcher.seen.lock().unwrap(),
            vec![claimed_at + Duration::minutes(4)]
        );
    }
}
