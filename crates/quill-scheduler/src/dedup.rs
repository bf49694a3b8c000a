//! Topic deduplication.
//!
//! A proposed topic is a duplicate when its normalized primary keyword
//! equals, contains, or is contained in a keyword the site already has.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use quill_store::{NewTopic, SiteId, StoreError, TopicStore};

/// Outcome of [`upsert_many`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Lowercase and trim a keyword for comparison.
pub fn normalize_keyword(keyword: &str) -> String {
    keyword.trim().to_lowercase()
}

/// Whether `candidate` (already normalized) collides with any known keyword.
pub fn is_duplicate(candidate: &str, known: &[String]) -> bool {
    known.iter().any(|existing| {
        existing == candidate || existing.contains(candidate) || candidate.contains(existing.as_str())
    })
}

/// Split `incoming` into the topics to insert and the number skipped.
///
/// Accepted keywords join `known` immediately, so later items in the same
/// batch are checked against earlier ones.
pub fn select_new_topics(
    known: &mut Vec<String>,
    incoming: Vec<NewTopic>,
) -> (Vec<NewTopic>, usize) {
    let mut accepted = Vec::new();
    let mut skipped = 0;

    for topic in incoming {
        let keyword = normalize_keyword(&topic.primary_keyword);
        if keyword.is_empty() || is_duplicate(&keyword, known) {
            skipped += 1;
            continue;
        }
        known.push(keyword);
        accepted.push(topic);
    }

    (accepted, skipped)
}

/// Insert the non-duplicate topics of `incoming` as `planned`.
#[tracing::instrument(skip(store, incoming), fields(incoming = incoming.len()))]
pub async fn upsert_many<S>(
    store: &S,
    site_id: SiteId,
    incoming: Vec<NewTopic>,
    now: DateTime<Utc>,
) -> Result<UpsertReport, StoreError>
where
    S: TopicStore + ?Sized,
{
    let mut known: Vec<String> = store
        .list_topics(site_id)
        .await?
        .iter()
        .map(|t| normalize_keyword(&t.primary_keyword))
        .collect();

    let (accepted, skipped) = select_new_topics(&mut known, incoming);
    let inserted = accepted.len();
    for topic in accepted {
        store.insert_topic(site_id, topic, now).await?;
    }

    debug!(inserted, skipped, "deduplicated topics");
    Ok(UpsertReport { inserted, skipped })
}
