//! Module G: scheduler / process lifecycle (§4.G).
//!
//! The non-overlapping per-resource loop follows the same
//! `tokio::spawn` + `tokio::time::sleep` shape the teacher's `main.rs` uses
//! for its own independent scraper loops.

use crate::config::Config;
use crate::cycle::CycleDriver;
use crate::media_downloader::MediaDownloader;
use crate::models::{Resource, RunStatus};
use crate::processor::ProcessorContext;
use crate::store::ListingStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

const DAILY_CLEANUP_RETENTION_DAYS: i64 = 30;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

pub struct Scheduler {
    config: Arc<Config>,
    store: Arc<dyn ListingStore>,
    cycle: Arc<CycleDriver>,
    ctx: ProcessorContext,
    downloader: Arc<MediaDownloader>,
}

impl Scheduler {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ListingStore>,
        cycle: Arc<CycleDriver>,
        ctx: ProcessorContext,
        downloader: Arc<MediaDownloader>,
    ) -> Self {
        Self { config, store, cycle, ctx, downloader }
    }

    /// Runs until `shutdown_signal` resolves. Performs the initial-import
    /// ordering pass first if no resource has ever completed a run.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        if self.needs_initial_import().await? {
            self.run_initial_import(&mut shutdown).await;
        }

        let downloader_shutdown = shutdown.clone();
        let downloader = Arc::clone(&self.downloader);
        let downloader_task = tokio::spawn(async move { downloader.run(downloader_shutdown).await });

        let resources = [Resource::Listing, Resource::Member, Resource::Office, Resource::OpenHouse, Resource::Lookup];
        let mut loops = Vec::new();
        for resource in resources {
            let this = Arc::clone(&self);
            let mut shutdown = shutdown.clone();
            loops.push(tokio::spawn(async move { this.steady_state_loop(resource, &mut shutdown).await }));
        }

        for handle in loops {
            let _ = handle.await;
        }

        let _ = tokio::time::timeout(SHUTDOWN_GRACE, downloader_task).await;
        info!("scheduler shut down");
        Ok(())
    }

    async fn needs_initial_import(&self) -> anyhow::Result<bool> {
        for resource in [Resource::Listing, Resource::Member, Resource::Office, Resource::OpenHouse, Resource::Lookup] {
            if self.store.latest_run(resource).await?.is_some_and(|r| r.status == RunStatus::Completed) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Listing must finish first, then Member/Office concurrently, then
    /// OpenHouse; Lookup runs independently (§4.G "Initial-import order").
    async fn run_initial_import(&self, shutdown: &mut watch::Receiver<bool>) {
        if *shutdown.borrow() {
            return;
        }
        self.run_one_cycle(Resource::Listing).await;

        let (member_res, office_res) = tokio::join!(self.run_one_cycle(Resource::Member), self.run_one_cycle(Resource::Office));
        let _ = (member_res, office_res);

        self.run_one_cycle(Resource::OpenHouse).await;
        self.run_one_cycle(Resource::Lookup).await;
    }

    async fn steady_state_loop(&self, resource: Resource, shutdown: &mut watch::Receiver<bool>) {
        let cadence = self.config.cadence(resource);
        loop {
            if *shutdown.borrow() {
                return;
            }
            self.run_one_cycle(resource).await;

            if resource == Resource::Lookup {
                if let Err(e) = self.run_daily_cleanup().await {
                    error!(error = %e, "daily cleanup failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(cadence) => {}
                _ = shutdown.changed() => if *shutdown.borrow() { return },
            }
        }
    }

    async fn run_one_cycle(&self, resource: Resource) {
        match self.cycle.run_cycle(resource, &self.ctx).await {
            Ok(run) => info!(resource = resource.as_str(), status = ?run.status, received = run.counts.records_received, "cycle complete"),
            Err(e) => error!(resource = resource.as_str(), error = %e, "cycle failed"),
        }
    }

    /// Hard-deletes listings whose soft-delete marker is older than 30 days,
    /// cascading to children/media/raw/history (§4.G "Daily cleanup").
    async fn run_daily_cleanup(&self) -> anyhow::Result<()> {
        let stale = self.store.stale_deleted_listings(DAILY_CLEANUP_RETENTION_DAYS).await?;
        for key in stale {
            if let Err(e) = self.store.hard_delete_listing(&key).await {
                error!(listing_key = %key, error = %e, "hard delete failed");
            }
        }
        self.downloader.recover_expired().await.ok();
        Ok(())
    }
}
