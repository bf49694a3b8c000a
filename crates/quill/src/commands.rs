//! Autopilot commands and the wiring they share.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use quill_http::CollaboratorClient;
use quill_scheduler::{
    Autopilot, Clock, Collaborators, Recovery, SystemClock, schedule_cadence,
};
use quill_store::{SiteId, SqliteStore, Store};

use crate::GlobalArgs;

/// Database location when `--db` is not given.
pub fn default_db_path() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("quill").join("quill.db"))
        .ok_or_else(|| miette::miette!("no data directory found; pass --db or set QUILL_DB"))
}

/// Open (creating if needed) the SQLite store.
pub fn open_store(global: &GlobalArgs) -> Result<Arc<dyn Store>> {
    let path = match &global.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }

    let store = SqliteStore::open(&path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to open {}", path.display()))?;
    Ok(Arc::new(store))
}

/// The HTTP collaborators. Commands that execute jobs cannot run without them.
pub fn collaborators(global: &GlobalArgs) -> Result<Collaborators> {
    let url = global.collaborator_url.as_deref().ok_or_else(|| {
        miette::miette!("no collaborator service configured; pass --collaborator-url or set QUILL_COLLABORATOR_URL")
    })?;

    let client = CollaboratorClient::with_timeout(
        url,
        global.collaborator_token.clone(),
        Duration::from_secs(global.collaborator_timeout),
    )
    .into_diagnostic()?;
    Ok(Collaborators::from_shared(Arc::new(client)))
}

fn autopilot(global: &GlobalArgs) -> Result<Autopilot> {
    Ok(Autopilot::new(
        open_store(global)?,
        collaborators(global)?,
        Arc::new(SystemClock),
        global.autopilot_config(),
    ))
}

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{}", json);
    Ok(())
}

/// Tick one site, or every site when `site` is `None`.
pub async fn tick(global: &GlobalArgs, site: Option<SiteId>) -> Result<()> {
    let autopilot = autopilot(global)?;

    match site {
        Some(site_id) => {
            let report = autopilot.tick(site_id).await.into_diagnostic()?;
            print_json(&report)
        }
        None => {
            let report = autopilot.tick_all().await.into_diagnostic()?;
            print_json(&report)
        }
    }
}

pub async fn run(global: &GlobalArgs, interval_secs: u64) -> Result<()> {
    let autopilot = autopilot(global)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    autopilot
        .run(Duration::from_secs(interval_secs), shutdown_rx)
        .await;
    Ok(())
}

pub async fn process_next(global: &GlobalArgs) -> Result<()> {
    let autopilot = autopilot(global)?;
    let outcome = autopilot
        .dispatcher()
        .process_next_job()
        .await
        .into_diagnostic()?;
    print_json(&outcome)
}

pub async fn drain(global: &GlobalArgs, limit: usize) -> Result<()> {
    let autopilot = autopilot(global)?;
    let outcomes = autopilot.dispatcher().drain(limit).await.into_diagnostic()?;
    info!(processed = outcomes.len(), "drain finished");
    print_json(&outcomes)
}

pub async fn recover(global: &GlobalArgs) -> Result<()> {
    let recovery = Recovery::new(
        open_store(global)?,
        Arc::new(SystemClock),
        global.autopilot_config(),
    );
    let report = recovery.recover().await.into_diagnostic()?;
    print_json(&report)
}

pub async fn schedule(global: &GlobalArgs, site_id: SiteId) -> Result<()> {
    let store = open_store(global)?;
    let outcome = schedule_cadence(
        store.as_ref(),
        site_id,
        SystemClock.now(),
        &global.autopilot_config(),
    )
    .await
    .into_diagnostic()?;
    print_json(&outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn global(args: &[&str]) -> GlobalArgs {
        #[derive(Parser)]
        struct Harness {
            #[command(flatten)]
            global: GlobalArgs,
        }
        let mut argv = vec!["quill"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn test_open_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("quill.db");
        let db_arg = db.to_string_lossy().to_string();

        open_store(&global(&["--db", db_arg.as_str()])).unwrap();
        assert!(db.exists());
    }

    #[test]
    fn test_collaborators_require_url() {
        let mut args = global(&["--collaborator-url", "http://localhost:9"]);
        assert!(collaborators(&args).is_ok());

        args.collaborator_url = None;
        assert!(collaborators(&args).is_err());
    }
}
