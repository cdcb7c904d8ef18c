//! MLS replication worker entry point.
//!
//! Loads configuration, wires the out-of-scope collaborators behind their
//! trait seams, and runs the scheduler until a shutdown signal arrives.

use anyhow::Context;
use mls_replicator::config::Config;
use mls_replicator::cycle::CycleDriver;
use mls_replicator::feed::FeedClient;
use mls_replicator::media_downloader::MediaDownloader;
use mls_replicator::models::Resource;
use mls_replicator::processor::ProcessorContext;
use mls_replicator::rate_limiter::RateLimiter;
use mls_replicator::scheduler::Scheduler;
use mls_replicator::store::{AlertEvent, AlertHook, ListingStore, ObjectStore};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;
    init_tracing(&config.log_level);

    info!("mls replication worker starting");

    let limiter = Arc::new(RateLimiter::new(
        config.media_bandwidth_soft_cap_bytes(),
        config.media_bandwidth_hard_cap_bytes(),
    ));

    let feed = Arc::new(FeedClient::new(config.feed_base_url.clone(), &config.feed_token, Arc::clone(&limiter))?);

    // The relational store, object store, and alert hook are external
    // collaborators outside this core's scope (§1) — no concrete backing
    // ships here. A production deployment supplies its own implementations.
    let store: Arc<dyn ListingStore> = Arc::new(unimplemented_store());
    let object_store: Arc<dyn ObjectStore> = Arc::new(unimplemented_object_store());
    let alert_hook: Arc<dyn AlertHook> = Arc::new(NoopAlertHook);

    let ctx = ProcessorContext {
        store: Arc::clone(&store),
        object_store: Arc::clone(&object_store),
        feed: Arc::clone(&feed),
        alert_hook,
        vendor: config.originating_system.clone(),
        inline_media_concurrency: 4,
    };

    seed_rate_limiter(&limiter, &store).await;

    let cycle = Arc::new(CycleDriver { store: Arc::clone(&store), feed: Arc::clone(&feed), vendor: config.originating_system.clone() });

    let downloader = Arc::new(MediaDownloader::new(
        Arc::clone(&store),
        Arc::clone(&object_store),
        Arc::clone(&feed),
        config.originating_system.clone(),
        config.media_concurrency,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new(Arc::new(config), store, cycle, ctx, downloader));

    let scheduler_handle = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, stopping scheduler");
    let _ = shutdown_tx.send(true);

    scheduler_handle.await.context("scheduler task panicked")??;
    Ok(())
}

/// Restart recovery (§4.A "Recovery from restart"): seeds the limiter's API
/// series from the last 24h of request logs and its media series from the
/// last 60 minutes of completed downloads, before the scheduler admits
/// anything.
async fn seed_rate_limiter(limiter: &RateLimiter, store: &Arc<dyn ListingStore>) {
    let now = chrono::Utc::now();
    let api_since = now - chrono::Duration::hours(24);
    let media_since = now - chrono::Duration::minutes(60);

    let api_timestamps = store.recent_request_timestamps(api_since).await.unwrap_or_default();
    let media_events = store.recent_media_download_bytes(media_since).await.unwrap_or_default();

    let std_now = std::time::Instant::now();
    let to_instant = |ts: chrono::DateTime<chrono::Utc>| {
        let age = (now - ts).to_std().unwrap_or_default();
        std_now.checked_sub(age).unwrap_or(std_now)
    };

    let api_events = api_timestamps.into_iter().map(to_instant);
    let media_events = media_events.into_iter().map(|(ts, bytes)| (to_instant(ts), bytes));
    limiter.seed(api_events, media_events);
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

struct NoopAlertHook;

#[async_trait::async_trait]
impl AlertHook for NoopAlertHook {
    async fn notify(&self, _event: AlertEvent) -> mls_replicator::error::Result<()> {
        Ok(())
    }
}

/// Placeholder until a concrete relational-store adapter is wired in; the
/// trait itself is the deliverable here (§9 "traits at the seams").
fn unimplemented_store() -> impl ListingStore {
    struct Unimplemented;

    #[async_trait::async_trait]
    impl ListingStore for Unimplemented {
        async fn latest_run(&self, _: Resource) -> mls_replicator::error::Result<Option<mls_replicator::models::RunRecord>> {
            Ok(None)
        }
        async fn insert_run(&self, _: &mls_replicator::models::RunRecord) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn finalize_run(&self, _: &mls_replicator::models::RunRecord) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn append_request_log(&self, _: &mls_replicator::models::RequestLogRow) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn recent_request_timestamps(&self, _: chrono::DateTime<chrono::Utc>) -> mls_replicator::error::Result<Vec<chrono::DateTime<chrono::Utc>>> {
            Ok(Vec::new())
        }
        async fn recent_media_download_bytes(&self, _: chrono::DateTime<chrono::Utc>) -> mls_replicator::error::Result<Vec<(chrono::DateTime<chrono::Utc>, u64)>> {
            Ok(Vec::new())
        }
        async fn keys_at_hwm(&self, _: Resource, _: chrono::DateTime<chrono::Utc>) -> mls_replicator::error::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn get_listing(&self, _: &str) -> mls_replicator::error::Result<Option<mls_replicator::models::Listing>> {
            Ok(None)
        }
        async fn upsert_listing(&self, _: &mls_replicator::models::Listing) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn soft_hide_listing(&self, _: &str) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn replace_rooms(&self, _: &str, _: &[mls_replicator::models::Room]) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn replace_unit_types(&self, _: &str, _: &[mls_replicator::models::UnitType]) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn upsert_raw(&self, _: &mls_replicator::models::RawResponse) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn append_change_log(&self, _: &mls_replicator::models::ChangeLog) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn append_price_history(&self, _: &mls_replicator::models::PriceHistory) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn append_status_history(&self, _: &mls_replicator::models::StatusHistory) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn get_member(&self, _: &str) -> mls_replicator::error::Result<Option<mls_replicator::models::Member>> {
            Ok(None)
        }
        async fn upsert_member(&self, _: &mls_replicator::models::Member) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn soft_hide_member(&self, _: &str) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn get_office(&self, _: &str) -> mls_replicator::error::Result<Option<mls_replicator::models::Office>> {
            Ok(None)
        }
        async fn upsert_office(&self, _: &mls_replicator::models::Office) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn soft_hide_office(&self, _: &str) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn upsert_open_house(&self, _: &mls_replicator::models::OpenHouse) -> mls_replicator::error::Result<bool> {
            Ok(true)
        }
        async fn delete_open_house(&self, _: &str) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn upsert_lookup(&self, _: &mls_replicator::models::Lookup) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn stored_media(&self, _: &str) -> mls_replicator::error::Result<Vec<mls_replicator::models::MediaAsset>> {
            Ok(Vec::new())
        }
        async fn upsert_media(&self, _: &mls_replicator::models::MediaAsset) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn delete_media(&self, _: &str) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn pending_media(&self, _: usize) -> mls_replicator::error::Result<Vec<mls_replicator::models::MediaAsset>> {
            Ok(Vec::new())
        }
        async fn recovery_media(&self) -> mls_replicator::error::Result<Vec<mls_replicator::models::MediaAsset>> {
            Ok(Vec::new())
        }
        async fn append_media_download_audit(&self, _: &mls_replicator::models::MediaDownloadAuditRow) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn stale_deleted_listings(&self, _: i64) -> mls_replicator::error::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn hard_delete_listing(&self, _: &str) -> mls_replicator::error::Result<()> {
            Ok(())
        }
        async fn refresh_listing_view(&self) -> mls_replicator::error::Result<()> {
            Ok(())
        }
    }

    Unimplemented
}

fn unimplemented_object_store() -> impl ObjectStore {
    struct Unimplemented;

    #[async_trait::async_trait]
    impl ObjectStore for Unimplemented {
        async fn put(&self, key: &str, bytes: Vec<u8>, _content_type: &str) -> mls_replicator::error::Result<String> {
            Ok(format!("https://unconfigured.invalid/{key}/{}", bytes.len()))
        }
        async fn delete(&self, _key: &str) -> mls_replicator::error::Result<()> {
            Ok(())
        }
    }

    Unimplemented
}
