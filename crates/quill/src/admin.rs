//! Operator commands: sites, jobs, topics and articles.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;

use quill_scheduler::{
    Clock, CollaboratorError, Collaborators, ContentGenerator, ContentPlanner, DiscoveredPage,
    Dispatcher, GeneratedArticle, ProposedTopic, Publication, Publisher, Recovery, SystemClock,
    UpsertReport, upsert_many,
};
use quill_store::{
    Article, ArticleStatus, Job, JobPayload, JobStatus, Link, NewTopic, Page, Site, SiteId,
    SiteUpsert, Store, Topic, TopicStatus,
};

use crate::commands::{collaborators, open_store, print_json};
use crate::{ArticlesCommand, EnqueueKind, GlobalArgs, JobsCommand, SiteCommand, TopicsCommand};

/// Stand-in collaborators for commands that only touch the queue.
struct Offline;

fn offline() -> CollaboratorError {
    CollaboratorError::Permanent("no collaborator service configured".to_string())
}

#[async_trait]
impl ContentPlanner for Offline {
    async fn propose(&self, _site: &Site) -> Result<Vec<ProposedTopic>, CollaboratorError> {
        Err(offline())
    }
}

#[async_trait]
impl ContentGenerator for Offline {
    async fn write(
        &self,
        _site: &Site,
        _topic: Option<&Topic>,
    ) -> Result<GeneratedArticle, CollaboratorError> {
        Err(offline())
    }

    async fn crawl(&self, _site: &Site) -> Result<Vec<DiscoveredPage>, CollaboratorError> {
        Err(offline())
    }

    async fn links(
        &self,
        _site: &Site,
        _article: &Article,
        _pages: &[Page],
    ) -> Result<Vec<Link>, CollaboratorError> {
        Err(offline())
    }
}

#[async_trait]
impl Publisher for Offline {
    async fn publish(
        &self,
        _site: &Site,
        _article: &Article,
    ) -> Result<Publication, CollaboratorError> {
        Err(offline())
    }
}

fn queue(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Dispatcher {
    Dispatcher::new(store, Collaborators::from_shared(Arc::new(Offline)), clock)
}

/// A site and the size of its backlog.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSummary {
    pub site: Site,
    pub pages: usize,
    /// Topic counts keyed by status.
    pub topics: BTreeMap<String, usize>,
    pub articles: usize,
    /// Job counts keyed by status.
    pub jobs: BTreeMap<String, usize>,
}

pub async fn site_summary(store: &dyn Store, site_id: SiteId) -> Result<SiteSummary> {
    let site = store
        .get_site(site_id)
        .await
        .into_diagnostic()?
        .ok_or_else(|| miette::miette!("site not found: {}", site_id))?;

    let pages = store.list_pages(site_id).await.into_diagnostic()?.len();
    let articles = store.list_articles(site_id).await.into_diagnostic()?.len();

    let mut topics = BTreeMap::new();
    for topic in store.list_topics(site_id).await.into_diagnostic()? {
        *topics.entry(topic.status.to_string()).or_insert(0) += 1;
    }

    let mut jobs = BTreeMap::new();
    for job in store.list_jobs().await.into_diagnostic()? {
        if job.site_id == Some(site_id) {
            *jobs.entry(job.status.to_string()).or_insert(0) += 1;
        }
    }

    Ok(SiteSummary {
        site,
        pages,
        topics,
        articles,
        jobs,
    })
}

pub async fn list_jobs(store: &dyn Store, status: Option<JobStatus>) -> Result<Vec<Job>> {
    match status {
        Some(status) => store.list_jobs_by_status(status).await.into_diagnostic(),
        None => store.list_jobs().await.into_diagnostic(),
    }
}

/// Queue a job of `kind` for a site that must exist.
pub async fn enqueue(
    dispatcher: &Dispatcher,
    store: &dyn Store,
    site_id: SiteId,
    payload: JobPayload,
) -> Result<Job> {
    if store.get_site(site_id).await.into_diagnostic()?.is_none() {
        miette::bail!("site not found: {}", site_id);
    }
    dispatcher
        .enqueue(Some(site_id), payload)
        .await
        .into_diagnostic()
}

fn payload(
    kind: EnqueueKind,
    topic: Option<quill_store::TopicId>,
    article: Option<quill_store::ArticleId>,
) -> Result<JobPayload> {
    Ok(match kind {
        EnqueueKind::Onboarding => JobPayload::Onboarding,
        EnqueueKind::Plan => JobPayload::Plan,
        EnqueueKind::Article => JobPayload::Article { topic_id: topic },
        EnqueueKind::Links => JobPayload::Links {
            article_id: article.ok_or_else(|| miette::miette!("links jobs need --article"))?,
        },
    })
}

pub async fn add_topic(
    store: &dyn Store,
    site_id: SiteId,
    topic: NewTopic,
    now: DateTime<Utc>,
) -> Result<UpsertReport> {
    if store.get_site(site_id).await.into_diagnostic()?.is_none() {
        miette::bail!("site not found: {}", site_id);
    }
    upsert_many(store, site_id, vec![topic], now)
        .await
        .into_diagnostic()
}

pub async fn list_topics(
    store: &dyn Store,
    site_id: SiteId,
    status: Option<TopicStatus>,
) -> Result<Vec<Topic>> {
    let topics = store.list_topics(site_id).await.into_diagnostic()?;
    Ok(topics
        .into_iter()
        .filter(|t| status.is_none_or(|s| t.status == s))
        .collect())
}

pub async fn list_articles(
    store: &dyn Store,
    site_id: SiteId,
    status: Option<ArticleStatus>,
) -> Result<Vec<Article>> {
    let articles = store.list_articles(site_id).await.into_diagnostic()?;
    Ok(articles
        .into_iter()
        .filter(|a| status.is_none_or(|s| a.status == s))
        .collect())
}

pub async fn site(global: &GlobalArgs, command: SiteCommand) -> Result<()> {
    let store = open_store(global)?;

    match command {
        SiteCommand::Add {
            domain,
            niche,
            tone,
            language,
            cadence,
        } => {
            let upsert = SiteUpsert {
                domain,
                niche,
                tone,
                language,
                cadence_per_week: cadence,
            };
            let site = store
                .upsert_site(upsert, SystemClock.now())
                .await
                .into_diagnostic()?;
            print_json(&site)
        }
        SiteCommand::List => {
            let sites = store.list_sites().await.into_diagnostic()?;
            print_json(&sites)
        }
        SiteCommand::Show { site } => print_json(&site_summary(store.as_ref(), site).await?),
    }
}

pub async fn jobs(global: &GlobalArgs, command: JobsCommand) -> Result<()> {
    let store = open_store(global)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match command {
        JobsCommand::List { status } => print_json(&list_jobs(store.as_ref(), status).await?),
        JobsCommand::Enqueue {
            site,
            kind,
            topic,
            article,
        } => {
            let dispatcher = queue(store.clone(), clock);
            let job = enqueue(&dispatcher, store.as_ref(), site, payload(kind, topic, article)?)
                .await?;
            print_json(&job)
        }
        JobsCommand::Requeue { job } => {
            let recovery = Recovery::new(store, clock, global.autopilot_config());
            let requeued = recovery.requeue(job).await.into_diagnostic()?;
            print_json(&serde_json::json!({ "jobId": job, "requeued": requeued }))
        }
        JobsCommand::CancelPending { site } => {
            let cancelled = queue(store, clock)
                .cancel_pending(site)
                .await
                .into_diagnostic()?;
            print_json(&serde_json::json!({ "cancelled": cancelled }))
        }
    }
}

pub async fn topics(global: &GlobalArgs, command: TopicsCommand) -> Result<()> {
    let store = open_store(global)?;

    match command {
        TopicsCommand::List { site, status } => {
            print_json(&list_topics(store.as_ref(), site, status).await?)
        }
        TopicsCommand::Add {
            site,
            keyword,
            label,
            priority,
        } => {
            let mut topic = NewTopic::keyword(keyword);
            if let Some(label) = label {
                topic.label = label;
            }
            topic.priority = priority;
            let report = add_topic(store.as_ref(), site, topic, SystemClock.now()).await?;
            print_json(&report)
        }
    }
}

pub async fn articles(global: &GlobalArgs, command: ArticlesCommand) -> Result<()> {
    let store = open_store(global)?;

    match command {
        ArticlesCommand::List { site, status } => {
            print_json(&list_articles(store.as_ref(), site, status).await?)
        }
        ArticlesCommand::Publish {
            article,
            site,
            all_drafts,
        } => {
            let dispatcher = Dispatcher::new(store, collaborators(global)?, Arc::new(SystemClock));
            match (article, site, all_drafts) {
                (_, _, Some(site)) => print_json(
                    &dispatcher
                        .publish_drafts(site)
                        .await
                        .into_diagnostic()?,
                ),
                (Some(article), Some(site), None) => print_json(
                    &dispatcher
                        .publish_article(site, article)
                        .await
                        .into_diagnostic()?,
                ),
                _ => miette::bail!("pass <article> --site <site>, or --all-drafts <site>"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quill_scheduler::ManualClock;
    use quill_store::{ArticleStore, JobStore, MemoryStore, NewArticle, SiteStore};

    async fn setup() -> (Arc<MemoryStore>, ManualClock, Site) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::default();
        let site = store
            .upsert_site(SiteUpsert::domain("usesubwise.app"), clock.now())
            .await
            .unwrap();
        (store, clock, site)
    }

    #[tokio::test]
    async fn test_site_summary_counts_backlog() {
        let (store, clock, site) = setup().await;
        let dispatcher = queue(store.clone(), Arc::new(clock.clone()));

        add_topic(store.as_ref(), site.id, NewTopic::keyword("budget apps"), clock.now())
            .await
            .unwrap();
        enqueue(&dispatcher, store.as_ref(), site.id, JobPayload::Plan)
            .await
            .unwrap();

        let summary = site_summary(store.as_ref(), site.id).await.unwrap();
        assert_eq!(summary.pages, 0);
        assert_eq!(summary.articles, 0);
        assert_eq!(summary.topics.get("planned"), Some(&1));
        assert_eq!(summary.jobs.get("pending"), Some(&1));
    }

    #[tokio::test]
    async fn test_add_topic_skips_similar_keyword() {
        let (store, clock, site) = setup().await;

        let first = add_topic(
            store.as_ref(),
            site.id,
            NewTopic::keyword("wireless earbuds"),
            clock.now(),
        )
        .await
        .unwrap();
        let second = add_topic(
            store.as_ref(),
            site.id,
            NewTopic::keyword("best wireless earbuds"),
            clock.now(),
        )
        .await
        .unwrap();

        assert_eq!(first, UpsertReport { inserted: 1, skipped: 0 });
        assert_eq!(second, UpsertReport { inserted: 0, skipped: 1 });
        assert_eq!(
            list_topics(store.as_ref(), site.id, Some(TopicStatus::Planned))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_enqueue_rejects_unknown_site() {
        let (store, clock, _site) = setup().await;
        let dispatcher = queue(store.clone(), Arc::new(clock));

        let result = enqueue(&dispatcher, store.as_ref(), SiteId::new(), JobPayload::Plan).await;
        assert!(result.is_err());
        assert!(store.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_pending_through_offline_queue() {
        let (store, clock, site) = setup().await;
        let dispatcher = queue(store.clone(), Arc::new(clock));

        enqueue(&dispatcher, store.as_ref(), site.id, JobPayload::Plan)
            .await
            .unwrap();
        assert_eq!(dispatcher.cancel_pending(Some(site.id)).await.unwrap(), 1);

        let done = list_jobs(store.as_ref(), Some(JobStatus::Done)).await.unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].result, Some(serde_json::json!({ "cancelled": true })));
    }

    #[test]
    fn test_links_payload_needs_article() {
        assert!(payload(EnqueueKind::Links, None, None).is_err());
        assert_eq!(
            payload(EnqueueKind::Article, None, None).unwrap(),
            JobPayload::Article { topic_id: None }
        );
    }

    #[tokio::test]
    async fn test_list_articles_filters_by_status() {
        let (store, clock, site) = setup().await;
        for slug in ["/first", "/second"] {
            let new = NewArticle {
                site_id: site.id,
                title: slug.into(),
                slug: slug.into(),
                markdown: String::new(),
                ..Default::default()
            };
            store.create_article_draft(new, clock.now()).await.unwrap();
        }
        let first = store.list_articles(site.id).await.unwrap().remove(0);
        store
            .set_article_status(first.id, ArticleStatus::Published, clock.now())
            .await
            .unwrap();

        let drafts = list_articles(store.as_ref(), site.id, Some(ArticleStatus::Draft))
            .await
            .unwrap();
        assert_eq!(drafts.len(), 1);
        assert_ne!(drafts[0].id, first.id);
        assert_eq!(list_articles(store.as_ref(), site.id, None).await.unwrap().len(), 2);
    }
}
