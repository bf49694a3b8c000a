//! Quill: content autopilot
//!
//! Main binary with subcommands:
//! - `tick`: one autopilot pass for a site (or every site)
//! - `run`: tick every site on an interval until interrupted
//! - `process-next`, `drain`, `recover`, `schedule`: single stages
//! - `site`, `jobs`, `topics`, `articles`: operator commands against the store

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quill_http::DEFAULT_REQUEST_TIMEOUT_SECS;
use quill_scheduler::{
    AutopilotConfig, DEFAULT_MAX_RETRIES, DEFAULT_MIN_AVAILABLE_TOPICS,
    DEFAULT_STALE_AFTER_MINUTES,
};
use quill_store::{ArticleId, ArticleStatus, JobId, JobStatus, SiteId, TopicId, TopicStatus};

mod admin;
mod commands;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Content autopilot job orchestration", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// SQLite database path (defaults to <data dir>/quill/quill.db)
    #[arg(long, global = true, env = "QUILL_DB")]
    pub db: Option<PathBuf>,

    /// Base URL of the collaborator service
    #[arg(long, global = true, env = "QUILL_COLLABORATOR_URL")]
    pub collaborator_url: Option<String>,

    /// Bearer token for the collaborator service
    #[arg(
        long,
        global = true,
        env = "QUILL_COLLABORATOR_TOKEN",
        hide_env_values = true
    )]
    pub collaborator_token: Option<String>,

    /// Collaborator request timeout in seconds
    #[arg(long, global = true, env = "QUILL_COLLABORATOR_TIMEOUT", default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub collaborator_timeout: u64,

    /// Minutes without progress before a running job is reclaimed
    #[arg(long, global = true, env = "QUILL_STALE_MINUTES", default_value_t = DEFAULT_STALE_AFTER_MINUTES)]
    pub stale_minutes: i64,

    /// Retries before a job is abandoned
    #[arg(long, global = true, env = "QUILL_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Plan new topics when fewer than this many are available
    #[arg(long, global = true, env = "QUILL_MIN_TOPICS", default_value_t = DEFAULT_MIN_AVAILABLE_TOPICS)]
    pub min_topics: usize,
}

impl GlobalArgs {
    pub fn autopilot_config(&self) -> AutopilotConfig {
        AutopilotConfig {
            stale_after: chrono::Duration::minutes(self.stale_minutes),
            max_retries: self.max_retries,
            min_available_topics: self.min_topics,
            ..AutopilotConfig::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one autopilot pass
    Tick {
        /// Site to tick
        #[arg(required_unless_present = "all")]
        site: Option<SiteId>,

        /// Tick every site
        #[arg(long, conflicts_with = "site")]
        all: bool,
    },

    /// Tick every site on an interval until interrupted
    Run {
        /// Seconds between passes
        #[arg(long, env = "QUILL_INTERVAL", default_value = "300")]
        interval: u64,
    },

    /// Claim and execute the next queued job
    ProcessNext,

    /// Execute queued jobs until the queue is empty
    Drain {
        /// Maximum number of jobs to execute
        #[arg(long, default_value = "15")]
        limit: usize,
    },

    /// Reclaim stuck jobs and retry failed ones
    Recover,

    /// Queue the next article for a site if its cadence allows
    Schedule {
        site: SiteId,
    },

    /// Manage sites
    Site {
        #[command(subcommand)]
        command: SiteCommand,
    },

    /// Inspect and manage jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },

    /// Inspect and manage topics
    Topics {
        #[command(subcommand)]
        command: TopicsCommand,
    },

    /// Inspect and publish articles
    Articles {
        #[command(subcommand)]
        command: ArticlesCommand,
    },
}

#[derive(Subcommand)]
pub enum SiteCommand {
    /// Create a site, or update the one with the same domain
    Add {
        domain: String,

        #[arg(long)]
        niche: Option<String>,

        #[arg(long)]
        tone: Option<String>,

        #[arg(long)]
        language: Option<String>,

        /// Articles per week (0 disables scheduling)
        #[arg(long)]
        cadence: Option<u32>,
    },

    /// List all sites
    List,

    /// Show a site with its backlog
    Show { site: SiteId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnqueueKind {
    Onboarding,
    Plan,
    Article,
    Links,
}

#[derive(Subcommand)]
pub enum JobsCommand {
    /// List jobs in queue order
    List {
        #[arg(long)]
        status: Option<JobStatus>,
    },

    /// Queue a job by hand
    Enqueue {
        site: SiteId,

        #[arg(value_enum)]
        kind: EnqueueKind,

        /// Topic for an article job
        #[arg(long)]
        topic: Option<TopicId>,

        /// Article for a links job
        #[arg(long, required_if_eq("kind", "links"))]
        article: Option<ArticleId>,
    },

    /// Reset a failed or abandoned job to pending with a fresh retry budget
    Requeue { job: JobId },

    /// Mark every pending job done without running it
    CancelPending {
        /// Only cancel jobs for this site
        #[arg(long)]
        site: Option<SiteId>,
    },
}

#[derive(Subcommand)]
pub enum TopicsCommand {
    /// List a site's topics
    List {
        site: SiteId,

        #[arg(long)]
        status: Option<TopicStatus>,
    },

    /// Add a topic unless a similar keyword already exists
    Add {
        site: SiteId,

        keyword: String,

        #[arg(long)]
        label: Option<String>,

        #[arg(long)]
        priority: Option<f64>,
    },
}

#[derive(Subcommand)]
pub enum ArticlesCommand {
    /// List a site's articles
    List {
        site: SiteId,

        #[arg(long)]
        status: Option<ArticleStatus>,
    },

    /// Publish a stored article, or every draft of a site
    Publish {
        /// Article to publish
        #[arg(required_unless_present = "all_drafts", requires = "site")]
        article: Option<ArticleId>,

        /// Site the article belongs to
        #[arg(long)]
        site: Option<SiteId>,

        /// Publish every draft of this site
        #[arg(long, value_name = "SITE", conflicts_with_all = ["article", "site"])]
        all_drafts: Option<SiteId>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "quill=info,quill_scheduler=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let global = cli.global;

    match cli.command {
        Commands::Tick { site, .. } => commands::tick(&global, site).await,
        Commands::Run { interval } => commands::run(&global, interval).await,
        Commands::ProcessNext => commands::process_next(&global).await,
        Commands::Drain { limit } => commands::drain(&global, limit).await,
        Commands::Recover => commands::recover(&global).await,
        Commands::Schedule { site } => commands::schedule(&global, site).await,
        Commands::Site { command } => admin::site(&global, command).await,
        Commands::Jobs { command } => admin::jobs(&global, command).await,
        Commands::Topics { command } => admin::topics(&global, command).await,
        Commands::Articles { command } => admin::articles(&global, command).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_args_build_config() {
        let cli = Cli::try_parse_from([
            "quill",
            "recover",
            "--stale-minutes",
            "30",
            "--max-retries",
            "5",
        ])
        .unwrap();
        let config = cli.global.autopilot_config();
        assert_eq!(config.stale_after, chrono::Duration::minutes(30));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.min_available_topics, DEFAULT_MIN_AVAILABLE_TOPICS);
    }

    #[test]
    fn test_tick_needs_site_or_all() {
        assert!(Cli::try_parse_from(["quill", "tick"]).is_err());
        assert!(Cli::try_parse_from(["quill", "tick", "--all"]).is_ok());
        let site = SiteId::new().to_string();
        assert!(Cli::try_parse_from(["quill", "tick", site.as_str(), "--all"]).is_err());
    }

    #[test]
    fn test_links_job_needs_article() {
        let site = SiteId::new().to_string();
        assert!(Cli::try_parse_from(["quill", "jobs", "enqueue", site.as_str(), "links"]).is_err());
        assert!(Cli::try_parse_from(["quill", "jobs", "enqueue", site.as_str(), "plan"]).is_ok());
    }

    #[test]
    fn test_publish_needs_article_and_site_or_all_drafts() {
        let site = SiteId::new().to_string();
        let article = ArticleId::new().to_string();
        let parse = |args: &[&str]| {
            let mut argv = vec!["quill", "articles", "publish"];
            argv.extend_from_slice(args);
            Cli::try_parse_from(argv)
        };

        assert!(parse(&[article.as_str(), "--site", site.as_str()]).is_ok());
        assert!(parse(&["--all-drafts", site.as_str()]).is_ok());
        assert!(parse(&[]).is_err());
        assert!(parse(&[article.as_str()]).is_err());
        assert!(parse(&[article.as_str(), "--all-drafts", site.as_str()]).is_err());
    }
}
