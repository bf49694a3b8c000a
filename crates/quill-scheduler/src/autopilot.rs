//! The autopilot tick.
//!
//! One bounded pass per invocation, in a fixed order:
//! 1. recover stuck and failed jobs (all sites)
//! 2. onboard the site if it has no pages yet
//! 3. replenish topics when fewer than the minimum are `planned`
//! 4. schedule the next article if the cadence allows
//! 5. execute at most one queued job
//!
//! Stages 1 to 4 are isolated: a failure is logged and recorded in the report
//! and the tick moves on.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use quill_store::{SiteId, Store, TopicStatus};

use crate::{
    AutopilotConfig, Clock, Collaborators, DispatchOutcome, Dispatcher, Recovery, RecoveryReport,
    ScheduleOutcome, SchedulerError, UpsertReport, cadence, dedup,
};

/// Everything one tick did for a site.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub site_id: SiteId,
    /// 1 when a job was claimed and executed, 0 otherwise.
    pub processed: u32,
    pub recovery: Option<RecoveryReport>,
    /// Pages recorded by inline onboarding.
    pub onboarded_pages: Option<usize>,
    pub planned: Option<UpsertReport>,
    pub schedule: Option<ScheduleOutcome>,
    pub dispatch: DispatchOutcome,
    /// Stages that failed, as `stage: error`.
    pub stage_errors: Vec<String>,
}

impl TickReport {
    fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            ..Default::default()
        }
    }

    fn stage_failed(&mut self, stage: &str, error: &SchedulerError) {
        warn!(stage, error = %error, "tick stage failed, continuing");
        self.stage_errors.push(format!("{}: {}", stage, error));
    }
}

/// Totals for [`Autopilot::tick_all`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickAllReport {
    pub sites: usize,
    pub processed: u32,
    pub failed_sites: Vec<SiteId>,
}

/// Drives recovery, planning, cadence and dispatch for every site.
pub struct Autopilot {
    store: Arc<dyn Store>,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    config: AutopilotConfig,
    dispatcher: Dispatcher,
    recovery: Recovery,
}

impl Autopilot {
    pub fn new(
        store: Arc<dyn Store>,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: AutopilotConfig,
    ) -> Self {
        let dispatcher = Dispatcher::new(store.clone(), collaborators.clone(), clock.clone());
        let recovery = Recovery::new(store.clone(), clock.clone(), config.clone());
        Self {
            store,
            collaborators,
            clock,
            config,
            dispatcher,
            recovery,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn recovery(&self) -> &Recovery {
        &self.recovery
    }

    pub fn config(&self) -> &AutopilotConfig {
        &self.config
    }

    /// Run one tick for `site_id`.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self, site_id: SiteId) -> Result<TickReport, SchedulerError> {
        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or(SchedulerError::SiteNotFound(site_id))?;
        let mut report = TickReport::new(site_id);

        match self.recovery.recover().await {
            Ok(recovered) => report.recovery = Some(recovered),
            Err(e) => report.stage_failed("recovery", &e),
        }

        match self.onboard_if_needed(site_id).await {
            Ok(pages) => report.onboarded_pages = pages,
            Err(e) => report.stage_failed("onboarding", &e),
        }

        match self.replenish_topics(site_id).await {
            Ok(planned) => report.planned = planned,
            Err(e) => report.stage_failed("planning", &e),
        }

        match cadence::schedule_cadence(
            self.store.as_ref(),
            site_id,
            self.clock.now(),
            &self.config,
        )
        .await
        {
            Ok(outcome) => report.schedule = Some(outcome),
            Err(e) => report.stage_failed("cadence", &e),
        }

        report.dispatch = self.dispatcher.process_next_job().await?;
        report.processed = u32::from(report.dispatch.claimed());

        info!(
            domain = %site.domain,
            processed = report.processed,
            stage_errors = report.stage_errors.len(),
            "tick finished"
        );
        Ok(report)
    }

    /// Run a tick for every site; a failing site is logged and skipped.
    #[tracing::instrument(skip(self))]
    pub async fn tick_all(&self) -> Result<TickAllReport, SchedulerError> {
        let sites = self.store.list_sites().await?;
        let mut report = TickAllReport {
            sites: sites.len(),
            ..Default::default()
        };

        for site in sites {
            match self.tick(site.id).await {
                Ok(tick) => report.processed += tick.processed,
                Err(e) => {
                    error!(site_id = %site.id, error = %e, "tick failed for site");
                    report.failed_sites.push(site.id);
                }
            }
        }
        Ok(report)
    }

    /// Call [`Autopilot::tick_all`] every `interval` until shutdown.
    ///
    /// Stands in for an external timer when running as a long-lived process.
    pub async fn run(&self, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "autopilot starting");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.tick_all().await {
                Ok(report) => info!(
                    sites = report.sites,
                    processed = report.processed,
                    failed_sites = report.failed_sites.len(),
                    "autopilot pass finished"
                ),
                Err(e) => error!(error = %e, "autopilot pass failed"),
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("autopilot received shutdown signal");
                    }
                }
                _ = sleep(interval) => {}
            }
        }

        info!("autopilot shut down gracefully");
    }

    /// Crawl the site inline when it has no pages.
    async fn onboard_if_needed(&self, site_id: SiteId) -> Result<Option<usize>, SchedulerError> {
        if !self.store.list_pages(site_id).await?.is_empty() {
            return Ok(None);
        }
        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or(SchedulerError::SiteNotFound(site_id))?;

        let pages = self.collaborators.generator.crawl(&site).await?;
        let count = self
            .store
            .upsert_pages(site_id, pages, self.clock.now())
            .await?;
        info!(pages = count, "onboarded site");
        Ok(Some(count))
    }

    /// Ask the planner for topics when the backlog is short.
    async fn replenish_topics(
        &self,
        site_id: SiteId,
    ) -> Result<Option<UpsertReport>, SchedulerError> {
        let available = self
            .store
            .list_topics(site_id)
            .await?
            .iter()
            .filter(|t| t.status == TopicStatus::Planned)
            .count();
        if available >= self.config.min_available_topics {
            return Ok(None);
        }
        let site = self
            .store
            .get_site(site_id)
            .await?
            .ok_or(SchedulerError::SiteNotFound(site_id))?;

        let proposals = self.collaborators.planner.propose(&site).await?;
        let report =
            dedup::upsert_many(self.store.as_ref(), site_id, proposals, self.clock.now()).await?;
        info!(
            available,
            inserted = report.inserted,
            skipped = report.skipped,
            "replenished topics"
        );
        Ok(Some(report))
    }
}
