//! Job orchestration for the Quill content autopilot.
//!
//! This crate provides:
//! - A job dispatcher with an atomic claim (at most one worker per job)
//! - Recovery of stuck and failed jobs with a bounded retry budget
//! - A cadence scheduler that paces article jobs per site
//! - Topic deduplication for planner output
//! - The autopilot tick that runs all of the above in a fixed order

mod autopilot;
mod cadence;
mod clock;
mod collaborators;
mod config;
mod dedup;
mod error;
mod queue;
mod recovery;
pub mod testing;

pub use autopilot::{Autopilot, TickAllReport, TickReport};
pub use cadence::{
    ScheduleOutcome, SkipReason, hours_per_article, overlap_ratio, pick_topic, rank_candidates,
    recent_slug_words, schedule_cadence, significant_words,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    CollaboratorError, Collaborators, ContentGenerator, ContentPlanner, DiscoveredPage,
    GeneratedArticle, ProposedTopic, Publication, Publisher,
};
pub use config::{
    AutopilotConfig, DEFAULT_MAX_RETRIES, DEFAULT_MIN_AVAILABLE_TOPICS,
    DEFAULT_STALE_AFTER_MINUTES, OVERLAP_THRESHOLD, RECENT_ARTICLE_WINDOW,
};
pub use dedup::{UpsertReport, is_duplicate, normalize_keyword, select_new_topics, upsert_many};
pub use error::{JobError, SchedulerError};
pub use queue::{DispatchOutcome, Dispatcher, PublishOutcome};
pub use recovery::{Recovery, RecoveryReport};
