//! Tunables for recovery, planning and cadence.

use chrono::Duration;

/// Minutes a `running` job may go without an update before recovery reclaims it.
pub const DEFAULT_STALE_AFTER_MINUTES: i64 = 10;

/// Retries allowed before a job is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The planner runs when a site has fewer `planned` topics than this.
pub const DEFAULT_MIN_AVAILABLE_TOPICS: usize = 5;

/// How many recent articles feed the recency-overlap check.
pub const RECENT_ARTICLE_WINDOW: usize = 5;

/// A candidate topic is skipped when this share of its keyword words
/// already appears in recent article slugs.
pub const OVERLAP_THRESHOLD: f64 = 0.5;

/// Configuration for one autopilot instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AutopilotConfig {
    pub stale_after: Duration,
    pub max_retries: u32,
    pub min_available_topics: usize,
    pub recent_article_window: usize,
    pub overlap_threshold: f64,
}

impl Default for AutopilotConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::minutes(DEFAULT_STALE_AFTER_MINUTES),
            max_retries: DEFAULT_MAX_RETRIES,
            min_available_topics: DEFAULT_MIN_AVAILABLE_TOPICS,
            recent_article_window: RECENT_ARTICLE_WINDOW,
            overlap_threshold: OVERLAP_THRESHOLD,
        }
    }
}
