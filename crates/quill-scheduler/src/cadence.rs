//! Cadence scheduling.
//!
//! Paces article production against wall-clock time: at most one article job
//! in flight per site, and no new one until `168 / cadence` hours have passed
//! since the latest article. The topic is picked by priority, skipping topics
//! that repeat the words of recently published slugs.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use quill_store::{
    Article, JobId, JobKind, JobPayload, JobStatus, SiteId, Store, Topic, TopicId, TopicStatus,
};

use crate::{AutopilotConfig, SchedulerError};

const HOURS_PER_WEEK: u32 = 168;

/// Why no article job was enqueued.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The site's cadence is zero.
    CadenceDisabled,
    /// An article job for the site is pending or running.
    ArticleInFlight,
    /// The latest article is too recent.
    TooSoon {
        hours_since_last: f64,
        hours_per_article: u32,
    },
    /// No `planned` topics remain.
    NoCandidates,
}

/// Result of one [`schedule_cadence`] call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Scheduled { job_id: JobId, topic_id: TopicId },
    Skipped(SkipReason),
}

impl ScheduleOutcome {
    /// Number of jobs enqueued (0 or 1).
    pub fn scheduled(&self) -> usize {
        match self {
            ScheduleOutcome::Scheduled { .. } => 1,
            ScheduleOutcome::Skipped(_) => 0,
        }
    }
}

/// Minimum hours between articles for a weekly cadence.
pub fn hours_per_article(cadence_per_week: u32) -> Option<u32> {
    HOURS_PER_WEEK.checked_div(cadence_per_week)
}

/// Lowercased words longer than three characters.
pub fn significant_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
}

/// Significant words from the slugs of the `window` newest articles.
///
/// `articles` must be newest first.
pub fn recent_slug_words(articles: &[Article], window: usize) -> HashSet<String> {
    articles
        .iter()
        .take(window)
        .flat_map(|a| significant_words(&a.slug))
        .collect()
}

/// Share of the keyword's significant words found in `recent`.
pub fn overlap_ratio(keyword: &str, recent: &HashSet<String>) -> f64 {
    let words: Vec<String> = significant_words(keyword).collect();
    if words.is_empty() {
        return 0.0;
    }
    let hits = words.iter().filter(|w| recent.contains(w.as_str())).count();
    hits as f64 / words.len() as f64
}

/// Order `planned` topics by priority (highest first, stable).
pub fn rank_candidates(topics: &[Topic]) -> Vec<&Topic> {
    let mut candidates: Vec<&Topic> = topics
        .iter()
        .filter(|t| t.status == TopicStatus::Planned)
        .collect();
    candidates.sort_by(|a, b| {
        b.effective_priority()
            .partial_cmp(&a.effective_priority())
            .unwrap_or(Ordering::Equal)
    });
    candidates
}

/// Pick the first ranked candidate that does not repeat recent slugs,
/// falling back to the top candidate.
pub fn pick_topic<'a>(
    ranked: &[&'a Topic],
    recent: &HashSet<String>,
    threshold: f64,
) -> Option<&'a Topic> {
    ranked
        .iter()
        .find(|t| overlap_ratio(&t.primary_keyword, recent) < threshold)
        .or_else(|| ranked.first())
        .copied()
}

/// Enqueue at most one article job for `site_id` if the cadence allows it.
#[tracing::instrument(skip(store, config))]
pub async fn schedule_cadence<S>(
    store: &S,
    site_id: SiteId,
    now: DateTime<Utc>,
    config: &AutopilotConfig,
) -> Result<ScheduleOutcome, SchedulerError>
where
    S: Store + ?Sized,
{
    let site = store
        .get_site(site_id)
        .await?
        .ok_or(SchedulerError::SiteNotFound(site_id))?;

    let Some(hours_per_article) = hours_per_article(site.cadence_per_week) else {
        return Ok(ScheduleOutcome::Skipped(SkipReason::CadenceDisabled));
    };

    for status in [JobStatus::Pending, JobStatus::Running] {
        let in_flight = store
            .list_jobs_by_status(status)
            .await?
            .iter()
            .any(|j| j.site_id == Some(site_id) && j.kind() == JobKind::Article);
        if in_flight {
            debug!(%status, "article job already in flight");
            return Ok(ScheduleOutcome::Skipped(SkipReason::ArticleInFlight));
        }
    }

    let articles = store.list_articles(site_id).await?;
    if let Some(latest) = articles.iter().map(|a| a.created_at).max() {
        let hours_since_last = (now - latest).num_seconds() as f64 / 3600.0;
        if hours_since_last < f64::from(hours_per_article) {
            return Ok(ScheduleOutcome::Skipped(SkipReason::TooSoon {
                hours_since_last,
                hours_per_article,
            }));
        }
    }

    let topics = store.list_topics(site_id).await?;
    let ranked = rank_candidates(&topics);
    let recent = recent_slug_words(&articles, config.recent_article_window);
    let Some(topic) = pick_topic(&ranked, &recent, config.overlap_threshold) else {
        return Ok(ScheduleOutcome::Skipped(SkipReason::NoCandidates));
    };

    let job = store
        .create_job(
            Some(site_id),
            JobPayload::Article {
                topic_id: Some(topic.id),
            },
            now,
        )
        .await?;
    store
        .set_topic_status(topic.id, TopicStatus::Queued, now)
        .await?;

    info!(
        job_id = %job.id,
        topic_id = %topic.id,
        keyword = %topic.primary_keyword,
        "scheduled article job"
    );
    Ok(ScheduleOutcome::Scheduled {
        job_id: job.id,
        topic_id: topic.id,
    })
}
