//! Record types persisted by the store.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{ArticleId, JobId, PageId, SiteId, StoreError, TopicId};

/// Cadence given to sites that never specified one.
pub const DEFAULT_CADENCE_PER_WEEK: u32 = 4;

/// Language given to sites that never specified one.
pub const DEFAULT_LANGUAGE: &str = "en";

// =========================================================================
// Sites and pages
// =========================================================================

/// A site content is produced for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: SiteId,
    /// Normalized domain (trimmed, lowercase).
    pub domain: String,
    pub niche: Option<String>,
    pub tone: Option<String>,
    pub language: String,
    /// Target number of articles per 7-day window.
    pub cadence_per_week: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating or updating a site, matched by domain.
///
/// `None` fields keep whatever the existing site has.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteUpsert {
    pub domain: String,
    pub niche: Option<String>,
    pub tone: Option<String>,
    pub language: Option<String>,
    pub cadence_per_week: Option<u32>,
}

impl SiteUpsert {
    /// Upsert for a bare domain.
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// Build a new site record from this upsert.
    pub fn into_site(self, now: DateTime<Utc>) -> Site {
        Site {
            id: SiteId::new(),
            domain: normalize_domain(&self.domain),
            niche: self.niche,
            tone: self.tone,
            language: self
                .language
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            cadence_per_week: self.cadence_per_week.unwrap_or(DEFAULT_CADENCE_PER_WEEK),
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge this upsert into an existing site.
    pub fn merge_into(self, site: &mut Site, now: DateTime<Utc>) {
        if self.niche.is_some() {
            site.niche = self.niche;
        }
        if self.tone.is_some() {
            site.tone = self.tone;
        }
        if let Some(language) = self.language {
            site.language = language;
        }
        if let Some(cadence) = self.cadence_per_week {
            site.cadence_per_week = cadence;
        }
        site.updated_at = now;
    }
}

/// Normalize a domain for matching: trimmed and lowercase.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().to_lowercase()
}

/// Normalize a slug so it always starts with `/`.
pub fn normalize_slug(slug: &str) -> String {
    let trimmed = slug.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// A page discovered on a site during onboarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: PageId,
    pub site_id: SiteId,
    pub url: String,
    pub slug: String,
    pub title: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A page to insert, or merge into the existing page with the same slug.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPage {
    pub url: String,
    pub slug: String,
    pub title: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub summary: Option<String>,
}

impl NewPage {
    pub fn into_page(self, site_id: SiteId, now: DateTime<Utc>) -> Page {
        Page {
            id: PageId::new(),
            site_id,
            url: self.url,
            slug: normalize_slug(&self.slug),
            title: self.title,
            keywords: self.keywords,
            summary: self.summary,
            created_at: now,
        }
    }

    pub fn merge_into(self, page: &mut Page) {
        if self.title.is_some() {
            page.title = self.title;
        }
        if self.keywords.is_some() {
            page.keywords = self.keywords;
        }
        if self.summary.is_some() {
            page.summary = self.summary;
        }
    }
}

// =========================================================================
// Topics
// =========================================================================

/// Lifecycle of a topic. Transitions only move forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// Waiting to be picked by the cadence scheduler.
    #[default]
    Planned,
    /// An article job has been enqueued for it.
    Queued,
    /// Its article was generated.
    Used,
}

impl TopicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Planned => "planned",
            TopicStatus::Queued => "queued",
            TopicStatus::Used => "used",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TopicStatus::Planned => 0,
            TopicStatus::Queued => 1,
            TopicStatus::Used => 2,
        }
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_advance_to(&self, next: TopicStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for TopicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TopicStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(TopicStatus::Planned),
            "queued" => Ok(TopicStatus::Queued),
            "used" => Ok(TopicStatus::Used),
            other => Err(StoreError::Corrupt(format!("unknown topic status: {}", other))),
        }
    }
}

/// A planned content unit (keyword cluster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    pub id: TopicId,
    pub site_id: SiteId,
    pub label: String,
    pub primary_keyword: String,
    #[serde(default)]
    pub secondary_keywords: Vec<String>,
    pub intent: Option<String>,
    pub priority: Option<f64>,
    pub status: TopicStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Topic {
    /// Priority used for ordering; topics without one rank as 1.
    pub fn effective_priority(&self) -> f64 {
        self.priority.unwrap_or(1.0)
    }
}

/// A topic to insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTopic {
    pub label: String,
    pub primary_keyword: String,
    #[serde(default)]
    pub secondary_keywords: Vec<String>,
    pub intent: Option<String>,
    pub priority: Option<f64>,
    pub notes: Option<String>,
}

impl NewTopic {
    /// Topic whose label is its keyword.
    pub fn keyword(keyword: impl Into<String>) -> Self {
        let keyword = keyword.into();
        Self {
            label: keyword.clone(),
            primary_keyword: keyword,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn into_topic(self, site_id: SiteId, now: DateTime<Utc>) -> Topic {
        Topic {
            id: TopicId::new(),
            site_id,
            label: self.label,
            primary_keyword: self.primary_keyword,
            secondary_keywords: self.secondary_keywords,
            intent: self.intent,
            priority: self.priority,
            status: TopicStatus::Planned,
            notes: self.notes,
            created_at: now,
            updated_at: now,
        }
    }
}

// =========================================================================
// Articles
// =========================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    #[default]
    Draft,
    Review,
    Ready,
    Published,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Draft => "draft",
            ArticleStatus::Review => "review",
            ArticleStatus::Ready => "ready",
            ArticleStatus::Published => "published",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ArticleStatus::Draft),
            "review" => Ok(ArticleStatus::Review),
            "ready" => Ok(ArticleStatus::Ready),
            "published" => Ok(ArticleStatus::Published),
            other => Err(StoreError::Corrupt(format!(
                "unknown article status: {}",
                other
            ))),
        }
    }
}

/// A source cited by an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    pub title: Option<String>,
}

/// An internal link suggested for an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub anchor: String,
    pub href: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: ArticleId,
    pub site_id: SiteId,
    pub topic_id: Option<TopicId>,
    pub status: ArticleStatus,
    pub title: String,
    /// Unique per site, always starts with `/`.
    pub slug: String,
    pub markdown: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub internal_links: Vec<Link>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A freshly generated article to store as a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewArticle {
    pub site_id: SiteId,
    pub topic_id: Option<TopicId>,
    pub title: String,
    pub slug: String,
    pub markdown: String,
    pub meta_title: Option<String>,
    pub meta_description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl NewArticle {
    /// Build the draft, deduplicating the slug against `existing_slugs`.
    pub fn into_draft(self, existing_slugs: &HashSet<String>, now: DateTime<Utc>) -> Article {
        Article {
            id: ArticleId::new(),
            site_id: self.site_id,
            topic_id: self.topic_id,
            status: ArticleStatus::Draft,
            title: self.title,
            slug: unique_slug(&normalize_slug(&self.slug), existing_slugs),
            markdown: self.markdown,
            meta_title: self.meta_title,
            meta_description: self.meta_description,
            language: self.language,
            sources: self.sources,
            internal_links: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Return `slug`, or the first free `slug-N` (N starting at 2).
pub fn unique_slug(slug: &str, existing: &HashSet<String>) -> String {
    if !existing.contains(slug) {
        return slug.to_string();
    }
    let mut suffix = 2;
    loop {
        let candidate = format!("{}-{}", slug, suffix);
        if !existing.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

// =========================================================================
// Jobs
// =========================================================================

/// The kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Onboarding,
    Plan,
    Article,
    Links,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Onboarding => "onboarding",
            JobKind::Plan => "plan",
            JobKind::Article => "article",
            JobKind::Links => "links",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job input, one variant per kind carrying only what that kind needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobPayload {
    /// Crawl the site and record its pages.
    Onboarding,
    /// Propose new topics for the site.
    Plan,
    /// Write (and publish) an article, optionally for a topic.
    Article { topic_id: Option<TopicId> },
    /// Suggest internal links for an existing article.
    Links { article_id: ArticleId },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Onboarding => JobKind::Onboarding,
            JobPayload::Plan => JobKind::Plan,
            JobPayload::Article { .. } => JobKind::Article,
            JobPayload::Links { .. } => JobKind::Links,
        }
    }
}

/// Current status of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    #[default]
    Pending,
    /// Claimed by a dispatcher.
    Running,
    /// Handler succeeded.
    Done,
    /// Handler failed.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown job status: {}", other))),
        }
    }
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Collaborator hiccup, store outage, timeout.
    Transient,
    /// Missing record or rejected input; retrying cannot help.
    Permanent,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
        }
    }

    pub fn should_retry(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl FromStr for FailureKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "transient" => Ok(FailureKind::Transient),
            "permanent" => Ok(FailureKind::Permanent),
            other => Err(StoreError::Corrupt(format!("unknown failure kind: {}", other))),
        }
    }
}

/// A unit of queued background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Enqueue sequence assigned by the store; queue order is `seq` ascending.
    pub seq: u64,
    pub site_id: Option<SiteId>,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    /// Times this job was put back in the queue by recovery.
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A new pending job. The store assigns the final `seq`.
    pub fn new(site_id: Option<SiteId>, payload: JobPayload, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            seq: 0,
            site_id,
            payload,
            status: JobStatus::Pending,
            result: None,
            error: None,
            failure: None,
            retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    /// Whether the job has not been touched for longer than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.updated_at > stale_after
    }
}

/// A partial update to a job. Unset fields are left as they are.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub result: Option<Option<serde_json::Value>>,
    pub error: Option<Option<String>>,
    pub failure: Option<Option<FailureKind>>,
    pub retries: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl JobPatch {
    /// Start a patch stamped with `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            status: None,
            result: None,
            error: None,
            failure: None,
            retries: None,
            updated_at: now,
        }
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(Some(result));
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn failure(mut self, kind: FailureKind) -> Self {
        self.failure = Some(Some(kind));
        self
    }

    pub fn clear_failure(mut self) -> Self {
        self.failure = Some(None);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Apply this patch to a job in place.
    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(result) = &self.result {
            job.result = result.clone();
        }
        if let Some(error) = &self.error {
            job.error = error.clone();
        }
        if let Some(failure) = self.failure {
            job.failure = failure;
        }
        if let Some(retries) = self.retries {
            job.retries = retries;
        }
        job.updated_at = self.updated_at;
    }
}
