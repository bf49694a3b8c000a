//! The same scenarios run against every store backend.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use quill_store::{
    ArticleStatus, FailureKind, JobPatch, JobPayload, JobStatus, Link, MemoryStore, NewArticle,
    NewPage, NewTopic, SiteUpsert, SqliteStore, Store, StoreError, TopicStatus,
};
use tempfile::TempDir;

async fn site_upsert_merges_by_domain(store: &impl Store) {
    let now = Utc::now();
    let first = store
        .upsert_site(SiteUpsert::domain("UseSubwise.app"), now)
        .await
        .unwrap();
    let second = store
        .upsert_site(
            SiteUpsert {
                niche: Some("subscriptions".into()),
                ..SiteUpsert::domain(" usesubwise.app ")
            },
            now + Duration::seconds(1),
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.niche.as_deref(), Some("subscriptions"));
    assert_eq!(second.cadence_per_week, 4);
    assert_eq!(store.list_sites().await.unwrap().len(), 1);
    assert_eq!(store.get_site(first.id).await.unwrap(), Some(second));
}

async fn pages_upsert_by_slug(store: &impl Store) {
    let now = Utc::now();
    let site = store
        .upsert_site(SiteUpsert::domain("pages.test"), now)
        .await
        .unwrap();

    let count = store
        .upsert_pages(
            site.id,
            vec![
                NewPage {
                    url: "https://pages.test/pricing".into(),
                    slug: "pricing".into(),
                    ..Default::default()
                },
                NewPage {
                    url: "https://pages.test/about".into(),
                    slug: "/about".into(),
                    ..Default::default()
                },
            ],
            now,
        )
        .await
        .unwrap();
    assert_eq!(count, 2);

    store
        .upsert_pages(
            site.id,
            vec![NewPage {
                url: "https://pages.test/pricing".into(),
                slug: "/pricing".into(),
                title: Some("Pricing".into()),
                ..Default::default()
            }],
            now,
        )
        .await
        .unwrap();

    let pages = store.list_pages(site.id).await.unwrap();
    assert_eq!(pages.len(), 2);
    let pricing = pages.iter().find(|p| p.slug == "/pricing").unwrap();
    assert_eq!(pricing.title.as_deref(), Some("Pricing"));
}

async fn topics_roundtrip_and_status(store: &impl Store) {
    let now = Utc::now();
    let site = store
        .upsert_site(SiteUpsert::domain("topics.test"), now)
        .await
        .unwrap();
    let topic = store
        .insert_topic(
            site.id,
            NewTopic {
                secondary_keywords: vec!["cancel netflix".into()],
                ..NewTopic::keyword("cancel subscriptions").with_priority(2.5)
            },
            now,
        )
        .await
        .unwrap();
    assert_eq!(topic.status, TopicStatus::Planned);

    store
        .set_topic_status(topic.id, TopicStatus::Queued, now)
        .await
        .unwrap();
    let loaded = store.get_topic(topic.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, TopicStatus::Queued);
    assert_eq!(loaded.priority, Some(2.5));
    assert_eq!(loaded.secondary_keywords, vec!["cancel netflix".to_string()]);
}

async fn article_slugs_are_unique_per_site(store: &impl Store) {
    let now = Utc::now();
    let site = store
        .upsert_site(SiteUpsert::domain("articles.test"), now)
        .await
        .unwrap();
    let draft = |slug: &str| NewArticle {
        site_id: site.id,
        title: "Title".into(),
        slug: slug.into(),
        markdown: "# Title".into(),
        ..Default::default()
    };

    let a = store
        .create_article_draft(draft("best-apps"), now)
        .await
        .unwrap();
    let b = store
        .create_article_draft(draft("/best-apps"), now + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(a.slug, "/best-apps");
    assert_eq!(b.slug, "/best-apps-2");
    assert_eq!(b.status, ArticleStatus::Draft);

    let listed = store.list_articles(site.id).await.unwrap();
    assert_eq!(listed[0].id, b.id, "newest first");

    let links = vec![Link {
        anchor: "pricing".into(),
        href: "/pricing".into(),
    }];
    store
        .set_article_links(a.id, links.clone(), now)
        .await
        .unwrap();
    store
        .set_article_status(a.id, ArticleStatus::Published, now)
        .await
        .unwrap();
    let a = store.get_article(a.id).await.unwrap().unwrap();
    assert_eq!(a.internal_links, links);
    assert_eq!(a.status, ArticleStatus::Published);
}

async fn jobs_queue_claim_and_patch(store: &impl Store) {
    let now = Utc::now();
    let first = store.create_job(None, JobPayload::Plan, now).await.unwrap();
    let second = store
        .create_job(None, JobPayload::Article { topic_id: None }, now)
        .await
        .unwrap();

    let pending = store.list_jobs_by_status(JobStatus::Pending).await.unwrap();
    let ids: Vec<_> = pending.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);

    assert!(store.claim_job(first.id, now).await.unwrap());
    assert!(!store.claim_job(first.id, now).await.unwrap());

    let later = now + Duration::minutes(1);
    let failed = store
        .patch_job(
            first.id,
            JobPatch::at(later)
                .status(JobStatus::Failed)
                .error("planner timed out")
                .failure(FailureKind::Transient),
        )
        .await
        .unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.updated_at, later);

    let reloaded = store.get_job(first.id).await.unwrap().unwrap();
    assert_eq!(reloaded, failed);

    let missing = store
        .patch_job(quill_store::JobId::new(), JobPatch::at(later))
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));
}

macro_rules! contract_tests {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn site_upsert() {
                let (store, _guard) = $make;
                site_upsert_merges_by_domain(&store).await;
            }

            #[tokio::test]
            async fn pages() {
                let (store, _guard) = $make;
                pages_upsert_by_slug(&store).await;
            }

            #[tokio::test]
            async fn topics() {
                let (store, _guard) = $make;
                topics_roundtrip_and_status(&store).await;
            }

            #[tokio::test]
            async fn articles() {
                let (store, _guard) = $make;
                article_slugs_are_unique_per_site(&store).await;
            }

            #[tokio::test]
            async fn jobs() {
                let (store, _guard) = $make;
                jobs_queue_claim_and_patch(&store).await;
            }
        }
    };
}

fn sqlite_store() -> (SqliteStore, TempDir) {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(dir.path().join("quill.db")).unwrap();
    (store, dir)
}

contract_tests!(memory, (MemoryStore::new(), ()));
contract_tests!(sqlite, sqlite_store());
