//! SQLite-backed store.
//!
//! A single connection behind a mutex; every public operation runs under
//! one lock acquisition, which makes the conditional claim atomic.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;
use uuid::Uuid;

use crate::{
    Article, ArticleId, ArticleStatus, ArticleStore, Job, JobId, JobPatch, JobPayload, JobStatus,
    JobStore, Link, NewArticle, NewPage, NewTopic, Page, PageId, PageStore, Site, SiteId,
    SiteStore, SiteUpsert, StoreError, Topic, TopicId, TopicStatus, TopicStore, normalize_domain,
    normalize_slug,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS sites (
        id TEXT PRIMARY KEY,
        domain TEXT NOT NULL UNIQUE,
        niche TEXT,
        tone TEXT,
        language TEXT NOT NULL,
        cadence_per_week INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS pages (
        id TEXT PRIMARY KEY,
        site_id TEXT NOT NULL,
        url TEXT NOT NULL,
        slug TEXT NOT NULL,
        title TEXT,
        keywords TEXT,
        summary TEXT,
        created_at TEXT NOT NULL,
        UNIQUE (site_id, slug)
    );

    CREATE TABLE IF NOT EXISTS topics (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        site_id TEXT NOT NULL,
        label TEXT NOT NULL,
        primary_keyword TEXT NOT NULL,
        secondary_keywords TEXT NOT NULL DEFAULT '[]',
        intent TEXT,
        priority REAL,
        status TEXT NOT NULL,
        notes TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_topics_site ON topics(site_id);

    CREATE TABLE IF NOT EXISTS articles (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        site_id TEXT NOT NULL,
        topic_id TEXT,
        status TEXT NOT NULL,
        title TEXT NOT NULL,
        slug TEXT NOT NULL,
        markdown TEXT NOT NULL,
        meta_title TEXT,
        meta_description TEXT,
        language TEXT,
        sources TEXT NOT NULL DEFAULT '[]',
        internal_links TEXT NOT NULL DEFAULT '[]',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (site_id, slug)
    );

    CREATE TABLE IF NOT EXISTS jobs (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        id TEXT NOT NULL UNIQUE,
        site_id TEXT,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL,
        result TEXT,
        error TEXT,
        failure TEXT,
        retries INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
    CREATE INDEX IF NOT EXISTS idx_jobs_site ON jobs(site_id);
";

const SITE_COLUMNS: &str =
    "id, domain, niche, tone, language, cadence_per_week, created_at, updated_at";
const PAGE_COLUMNS: &str = "id, site_id, url, slug, title, keywords, summary, created_at";
const TOPIC_COLUMNS: &str = "id, site_id, label, primary_keyword, secondary_keywords, intent, \
     priority, status, notes, created_at, updated_at";
const ARTICLE_COLUMNS: &str = "id, site_id, topic_id, status, title, slug, markdown, meta_title, \
     meta_description, language, sources, internal_links, created_at, updated_at";
const JOB_COLUMNS: &str =
    "seq, id, site_id, payload, status, result, error, failure, retries, created_at, updated_at";

/// Full nanosecond precision, so a stored timestamp reads back unchanged.
fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", value, e)))
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("bad id {:?}: {}", value, e)))
}

/// A site row from the database.
#[derive(Debug, Clone)]
struct SiteRow {
    id: String,
    domain: String,
    niche: Option<String>,
    tone: Option<String>,
    language: String,
    cadence_per_week: u32,
    created_at: String,
    updated_at: String,
}

impl SiteRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            domain: row.get(1)?,
            niche: row.get(2)?,
            tone: row.get(3)?,
            language: row.get(4)?,
            cadence_per_week: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_site(self) -> Result<Site, StoreError> {
        Ok(Site {
            id: SiteId(parse_uuid(&self.id)?),
            domain: self.domain,
            niche: self.niche,
            tone: self.tone,
            language: self.language,
            cadence_per_week: self.cadence_per_week,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// A page row from the database.
#[derive(Debug, Clone)]
struct PageRow {
    id: String,
    site_id: String,
    url: String,
    slug: String,
    title: Option<String>,
    keywords: Option<String>,
    summary: Option<String>,
    created_at: String,
}

impl PageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            site_id: row.get(1)?,
            url: row.get(2)?,
            slug: row.get(3)?,
            title: row.get(4)?,
            keywords: row.get(5)?,
            summary: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_page(self) -> Result<Page, StoreError> {
        Ok(Page {
            id: PageId(parse_uuid(&self.id)?),
            site_id: SiteId(parse_uuid(&self.site_id)?),
            url: self.url,
            slug: self.slug,
            title: self.title,
            keywords: self
                .keywords
                .map(|k| serde_json::from_str(&k))
                .transpose()?,
            summary: self.summary,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

/// A topic row from the database.
#[derive(Debug, Clone)]
struct TopicRow {
    id: String,
    site_id: String,
    label: String,
    primary_keyword: String,
    secondary_keywords: String,
    intent: Option<String>,
    priority: Option<f64>,
    status: String,
    notes: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TopicRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            site_id: row.get(1)?,
            label: row.get(2)?,
            primary_keyword: row.get(3)?,
            secondary_keywords: row.get(4)?,
            intent: row.get(5)?,
            priority: row.get(6)?,
            status: row.get(7)?,
            notes: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_topic(self) -> Result<Topic, StoreError> {
        Ok(Topic {
            id: TopicId(parse_uuid(&self.id)?),
            site_id: SiteId(parse_uuid(&self.site_id)?),
            label: self.label,
            primary_keyword: self.primary_keyword,
            secondary_keywords: serde_json::from_str(&self.secondary_keywords)?,
            intent: self.intent,
            priority: self.priority,
            status: self.status.parse()?,
            notes: self.notes,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// An article row from the database.
#[derive(Debug, Clone)]
struct ArticleRow {
    id: String,
    site_id: String,
    topic_id: Option<String>,
    status: String,
    title: String,
    slug: String,
    markdown: String,
    meta_title: Option<String>,
    meta_description: Option<String>,
    language: Option<String>,
    sources: String,
    internal_links: String,
    created_at: String,
    updated_at: String,
}

impl ArticleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            site_id: row.get(1)?,
            topic_id: row.get(2)?,
            status: row.get(3)?,
            title: row.get(4)?,
            slug: row.get(5)?,
            markdown: row.get(6)?,
            meta_title: row.get(7)?,
            meta_description: row.get(8)?,
            language: row.get(9)?,
            sources: row.get(10)?,
            internal_links: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_article(self) -> Result<Article, StoreError> {
        Ok(Article {
            id: ArticleId(parse_uuid(&self.id)?),
            site_id: SiteId(parse_uuid(&self.site_id)?),
            topic_id: self
                .topic_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?
                .map(TopicId),
            status: self.status.parse()?,
            title: self.title,
            slug: self.slug,
            markdown: self.markdown,
            meta_title: self.meta_title,
            meta_description: self.meta_description,
            language: self.language,
            sources: serde_json::from_str(&self.sources)?,
            internal_links: serde_json::from_str(&self.internal_links)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// A job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    seq: i64,
    id: String,
    site_id: Option<String>,
    payload: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    failure: Option<String>,
    retries: u32,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            site_id: row.get(2)?,
            payload: row.get(3)?,
            status: row.get(4)?,
            result: row.get(5)?,
            error: row.get(6)?,
            failure: row.get(7)?,
            retries: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        Ok(Job {
            id: JobId(parse_uuid(&self.id)?),
            seq: u64::try_from(self.seq)
                .map_err(|_| StoreError::Corrupt(format!("negative job seq {}", self.seq)))?,
            site_id: self
                .site_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?
                .map(SiteId),
            payload: serde_json::from_str(&self.payload)?,
            status: self.status.parse()?,
            result: self
                .result
                .map(|r| serde_json::from_str(&r))
                .transpose()?,
            error: self.error,
            failure: self.failure.map(|f| f.parse()).transpose()?,
            retries: self.retries,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        // WAL lets an operator inspect the database while a tick runs
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "store database initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("connection lock poisoned: {}", e)))
    }

    // =========================================================================
    // Sites
    // =========================================================================

    fn site_by_domain(conn: &Connection, domain: &str) -> Result<Option<Site>, StoreError> {
        conn.query_row(
            &format!("SELECT {} FROM sites WHERE domain = ?1", SITE_COLUMNS),
            params![domain],
            SiteRow::from_row,
        )
        .optional()?
        .map(SiteRow::into_site)
        .transpose()
    }

    fn upsert_site_sync(&self, upsert: SiteUpsert, now: DateTime<Utc>) -> Result<Site, StoreError> {
        let conn = self.lock()?;
        let domain = normalize_domain(&upsert.domain);

        if let Some(mut site) = Self::site_by_domain(&conn, &domain)? {
            upsert.merge_into(&mut site, now);
            conn.execute(
                "UPDATE sites SET niche = ?1, tone = ?2, language = ?3, cadence_per_week = ?4,
                 updated_at = ?5 WHERE id = ?6",
                params![
                    site.niche,
                    site.tone,
                    site.language,
                    site.cadence_per_week,
                    ts(site.updated_at),
                    site.id.to_string(),
                ],
            )?;
            return Ok(site);
        }

        let site = upsert.into_site(now);
        conn.execute(
            "INSERT INTO sites (id, domain, niche, tone, language, cadence_per_week, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                site.id.to_string(),
                site.domain,
                site.niche,
                site.tone,
                site.language,
                site.cadence_per_week,
                ts(site.created_at),
                ts(site.updated_at),
            ],
        )?;
        Ok(site)
    }

    fn get_site_sync(&self, id: SiteId) -> Result<Option<Site>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
            params![id.to_string()],
            SiteRow::from_row,
        )
        .optional()?
        .map(SiteRow::into_site)
        .transpose()
    }

    fn list_sites_sync(&self) -> Result<Vec<Site>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sites ORDER BY created_at ASC, rowid ASC",
            SITE_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], SiteRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(SiteRow::into_site).collect()
    }

    // =========================================================================
    // Pages
    // =========================================================================

    fn upsert_pages_sync(
        &self,
        site_id: SiteId,
        pages: Vec<NewPage>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let count = pages.len();
        for page in pages {
            let slug = normalize_slug(&page.slug);
            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {} FROM pages WHERE site_id = ?1 AND slug = ?2",
                        PAGE_COLUMNS
                    ),
                    params![site_id.to_string(), slug],
                    PageRow::from_row,
                )
                .optional()?
                .map(PageRow::into_page)
                .transpose()?;

            match existing {
                Some(mut existing) => {
                    page.merge_into(&mut existing);
                    tx.execute(
                        "UPDATE pages SET title = ?1, keywords = ?2, summary = ?3 WHERE id = ?4",
                        params![
                            existing.title,
                            existing
                                .keywords
                                .as_ref()
                                .map(serde_json::to_string)
                                .transpose()?,
                            existing.summary,
                            existing.id.to_string(),
                        ],
                    )?;
                }
                None => {
                    let page = page.into_page(site_id, now);
                    tx.execute(
                        "INSERT INTO pages (id, site_id, url, slug, title, keywords, summary, created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            page.id.to_string(),
                            page.site_id.to_string(),
                            page.url,
                            page.slug,
                            page.title,
                            page.keywords
                                .as_ref()
                                .map(serde_json::to_string)
                                .transpose()?,
                            page.summary,
                            ts(page.created_at),
                        ],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(count)
    }

    fn list_pages_sync(&self, site_id: SiteId) -> Result<Vec<Page>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pages WHERE site_id = ?1 ORDER BY rowid ASC",
            PAGE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![site_id.to_string()], PageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(PageRow::into_page).collect()
    }

    // =========================================================================
    // Topics
    // =========================================================================

    fn insert_topic_sync(
        &self,
        site_id: SiteId,
        topic: NewTopic,
        now: DateTime<Utc>,
    ) -> Result<Topic, StoreError> {
        let topic = topic.into_topic(site_id, now);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO topics (id, site_id, label, primary_keyword, secondary_keywords, intent,
             priority, status, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                topic.id.to_string(),
                topic.site_id.to_string(),
                topic.label,
                topic.primary_keyword,
                serde_json::to_string(&topic.secondary_keywords)?,
                topic.intent,
                topic.priority,
                topic.status.as_str(),
                topic.notes,
                ts(topic.created_at),
                ts(topic.updated_at),
            ],
        )?;
        Ok(topic)
    }

    fn get_topic_sync(&self, id: TopicId) -> Result<Option<Topic>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM topics WHERE id = ?1", TOPIC_COLUMNS),
            params![id.to_string()],
            TopicRow::from_row,
        )
        .optional()?
        .map(TopicRow::into_topic)
        .transpose()
    }

    fn list_topics_sync(&self, site_id: SiteId) -> Result<Vec<Topic>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM topics WHERE site_id = ?1 ORDER BY seq ASC",
            TOPIC_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![site_id.to_string()], TopicRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(TopicRow::into_topic).collect()
    }

    fn set_topic_status_sync(
        &self,
        id: TopicId,
        status: TopicStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE topics SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), ts(now), id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("topics", id));
        }
        Ok(())
    }

    // =========================================================================
    // Articles
    // =========================================================================

    fn create_article_draft_sync(
        &self,
        article: NewArticle,
        now: DateTime<Utc>,
    ) -> Result<Article, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: HashSet<String> = {
            let mut stmt = tx.prepare("SELECT slug FROM articles WHERE site_id = ?1")?;
            let slugs = stmt
                .query_map(params![article.site_id.to_string()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<Result<HashSet<_>, _>>()?;
            slugs
        };

        let draft = article.into_draft(&existing, now);
        tx.execute(
            "INSERT INTO articles (id, site_id, topic_id, status, title, slug, markdown, meta_title,
             meta_description, language, sources, internal_links, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                draft.id.to_string(),
                draft.site_id.to_string(),
                draft.topic_id.map(|t| t.to_string()),
                draft.status.as_str(),
                draft.title,
                draft.slug,
                draft.markdown,
                draft.meta_title,
                draft.meta_description,
                draft.language,
                serde_json::to_string(&draft.sources)?,
                serde_json::to_string(&draft.internal_links)?,
                ts(draft.created_at),
                ts(draft.updated_at),
            ],
        )?;
        tx.commit()?;
        Ok(draft)
    }

    fn get_article_sync(&self, id: ArticleId) -> Result<Option<Article>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS),
            params![id.to_string()],
            ArticleRow::from_row,
        )
        .optional()?
        .map(ArticleRow::into_article)
        .transpose()
    }

    fn list_articles_sync(&self, site_id: SiteId) -> Result<Vec<Article>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM articles WHERE site_id = ?1 ORDER BY seq DESC",
            ARTICLE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![site_id.to_string()], ArticleRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut articles = rows
            .into_iter()
            .map(ArticleRow::into_article)
            .collect::<Result<Vec<_>, _>>()?;
        // Stable sort keeps later inserts first among equal timestamps
        articles.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(articles)
    }

    fn update_article_sync(
        &self,
        id: ArticleId,
        column: &'static str,
        value: String,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            &format!(
                "UPDATE articles SET {} = ?1, updated_at = ?2 WHERE id = ?3",
                column
            ),
            params![value, ts(now), id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found("articles", id));
        }
        Ok(())
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    fn job_by_id(conn: &Connection, id: JobId) -> Result<Option<Job>, StoreError> {
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id.to_string()],
            JobRow::from_row,
        )
        .optional()?
        .map(JobRow::into_job)
        .transpose()
    }

    fn create_job_sync(
        &self,
        site_id: Option<SiteId>,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        let conn = self.lock()?;
        let mut job = Job::new(site_id, payload, now);
        conn.execute(
            "INSERT INTO jobs (id, site_id, kind, payload, status, retries, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.id.to_string(),
                job.site_id.map(|s| s.to_string()),
                job.kind().as_str(),
                serde_json::to_string(&job.payload)?,
                job.status.as_str(),
                job.retries,
                ts(job.created_at),
                ts(job.updated_at),
            ],
        )?;
        let seq = conn.last_insert_rowid();
        job.seq = u64::try_from(seq)
            .map_err(|_| StoreError::Corrupt(format!("negative job seq {}", seq)))?;
        Ok(job)
    }

    fn get_job_sync(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let conn = self.lock()?;
        Self::job_by_id(&conn, id)
    }

    fn list_jobs_sync(&self, status: Option<JobStatus>) -> Result<Vec<Job>, StoreError> {
        let conn = self.lock()?;
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs WHERE status = ?1 ORDER BY seq ASC",
                    JOB_COLUMNS
                ))?;
                stmt.query_map(params![status.as_str()], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM jobs ORDER BY seq ASC", JOB_COLUMNS))?;
                stmt.query_map([], JobRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }

    fn patch_job_sync(&self, id: JobId, patch: JobPatch) -> Result<Job, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut job = Self::job_by_id(&tx, id)?.ok_or_else(|| StoreError::not_found("jobs", id))?;
        patch.apply(&mut job);
        tx.execute(
            "UPDATE jobs SET status = ?1, result = ?2, error = ?3, failure = ?4, retries = ?5,
             updated_at = ?6 WHERE id = ?7",
            params![
                job.status.as_str(),
                job.result.as_ref().map(serde_json::to_string).transpose()?,
                job.error,
                job.failure.map(|f| f.as_str()),
                job.retries,
                ts(job.updated_at),
                job.id.to_string(),
            ],
        )?;
        tx.commit()?;
        Ok(job)
    }

    fn claim_job_sync(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![
                JobStatus::Running.as_str(),
                ts(now),
                id.to_string(),
                JobStatus::Pending.as_str(),
            ],
        )?;
        if changed == 1 {
            return Ok(true);
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM jobs WHERE id = ?1)",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::not_found("jobs", id));
        }
        Ok(false)
    }
}

#[async_trait]
impl SiteStore for SqliteStore {
    async fn upsert_site(
        &self,
        upsert: SiteUpsert,
        now: DateTime<Utc>,
    ) -> Result<Site, StoreError> {
        self.upsert_site_sync(upsert, now)
    }

    async fn get_site(&self, id: SiteId) -> Result<Option<Site>, StoreError> {
        self.get_site_sync(id)
    }

    async fn list_sites(&self) -> Result<Vec<Site>, StoreError> {
        self.list_sites_sync()
    }
}

#[async_trait]
impl PageStore for SqliteStore {
    async fn upsert_pages(
        &self,
        site_id: SiteId,
        pages: Vec<NewPage>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.upsert_pages_sync(site_id, pages, now)
    }

    async fn list_pages(&self, site_id: SiteId) -> Result<Vec<Page>, StoreError> {
        self.list_pages_sync(site_id)
    }
}

#[async_trait]
impl TopicStore for SqliteStore {
    async fn insert_topic(
        &self,
        site_id: SiteId,
        topic: NewTopic,
        now: DateTime<Utc>,
    ) -> Result<Topic, StoreError> {
        self.insert_topic_sync(site_id, topic, now)
    }

    async fn get_topic(&self, id: TopicId) -> Result<Option<Topic>, StoreError> {
        self.get_topic_sync(id)
    }

    async fn list_topics(&self, site_id: SiteId) -> Result<Vec<Topic>, StoreError> {
        self.list_topics_sync(site_id)
    }

    async fn set_topic_status(
        &self,
        id: TopicId,
        status: TopicStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.set_topic_status_sync(id, status, now)
    }
}

#[async_trait]
impl ArticleStore for SqliteStore {
    async fn create_article_draft(
        &self,
        article: NewArticle,
        now: DateTime<Utc>,
    ) -> Result<Article, StoreError> {
        self.create_article_draft_sync(article, now)
    }

    async fn get_article(&self, id: ArticleId) -> Result<Option<Article>, StoreError> {
        self.get_article_sync(id)
    }

    async fn list_articles(&self, site_id: SiteId) -> Result<Vec<Article>, StoreError> {
        self.list_articles_sync(site_id)
    }

    async fn set_article_status(
        &self,
        id: ArticleId,
        status: ArticleStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.update_article_sync(id, "status", status.as_str().to_string(), now)
    }

    async fn set_article_links(
        &self,
        id: ArticleId,
        links: Vec<Link>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let links = serde_json::to_string(&links)?;
        self.update_article_sync(id, "internal_links", links, now)
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(
        &self,
        site_id: Option<SiteId>,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Result<Job, StoreError> {
        self.create_job_sync(site_id, payload, now)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        self.get_job_sync(id)
    }

    async fn list_jobs_by_status(&self, status: JobStatus) -> Result<Vec<Job>, StoreError> {
        self.list_jobs_sync(Some(status))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.list_jobs_sync(None)
    }

    async fn patch_job(&self, id: JobId, patch: JobPatch) -> Result<Job, StoreError> {
        self.patch_job_sync(id, patch)
    }

    async fn claim_job(&self, id: JobId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.claim_job_sync(id, now)
    }
}
