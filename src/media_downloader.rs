//! Module E: background media downloader (§4.E).
//!
//! Grounded on `scrapers/polymarket_api.rs`'s `RateLimiter` window-based
//! backoff state machine, generalized into a doubling `rate_limit_pause_until`,
//! and `hashdive_api.rs`'s retry/backoff loop for the per-item retry count.

use crate::error::EngineError;
use crate::feed::{is_expired, FeedClient};
use crate::mapper;
use crate::models::{MediaDownloadAuditRow, MediaDownloadOutcome, MediaStatus};
use crate::store::{ListingStore, ObjectStore};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

const STAGGER: Duration = Duration::from_millis(200);
const INITIAL_PAUSE: Duration = Duration::from_secs(5 * 60);
const MAX_PAUSE: Duration = Duration::from_secs(15 * 60);
const MAX_RETRIES: u32 = 5;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

struct PauseState {
    until: Option<Instant>,
    current: Duration,
}

pub struct MediaDownloader {
    store: Arc<dyn ListingStore>,
    object_store: Arc<dyn ObjectStore>,
    feed: Arc<FeedClient>,
    vendor: String,
    concurrency_limit: usize,
    pause: Mutex<PauseState>,
    in_flight: AtomicU64,
    downloaded: AtomicU64,
    rate_limited: AtomicU64,
}

impl MediaDownloader {
    pub fn new(
        store: Arc<dyn ListingStore>,
        object_store: Arc<dyn ObjectStore>,
        feed: Arc<FeedClient>,
        vendor: String,
        concurrency_limit: usize,
    ) -> Self {
        Self {
            store,
            object_store,
            feed,
            vendor,
            concurrency_limit,
            pause: Mutex::new(PauseState { until: None, current: INITIAL_PAUSE }),
            in_flight: AtomicU64::new(0),
            downloaded: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
        }
    }

    fn paused_for(&self) -> Option<Duration> {
        let pause = self.pause.lock();
        pause.until.map(|t| t.saturating_duration_since(Instant::now())).filter(|d| !d.is_zero())
    }

    fn note_rate_limited(&self) {
        let mut pause = self.pause.lock();
        pause.until = Some(Instant::now() + pause.current);
        pause.current = (pause.current * 2).min(MAX_PAUSE);
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    fn note_success(&self) {
        let mut pause = self.pause.lock();
        pause.current = INITIAL_PAUSE;
    }

    /// Runs until `shutdown` resolves. Intended to be spawned once by the
    /// scheduler and polled continuously (§4.E).
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            if let Some(wait) = self.paused_for() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => if *shutdown.borrow() { return },
                }
                continue;
            }

            let capacity = self.concurrency_limit.saturating_sub(self.in_flight.load(Ordering::Relaxed) as usize);
            if capacity == 0 {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }

            let batch = match self.store.pending_media(capacity).await {
                Ok(b) if !b.is_empty() => b,
                Ok(_) => {
                    tokio::select! {
                        _ = tokio::time::sleep(POLL_INTERVAL) => {}
                        _ = shutdown.changed() => if *shutdown.borrow() { return },
                    }
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "media downloader: failed to poll pending media");
                    tokio::time::sleep(POLL_INTERVAL).await;
                    continue;
                }
            };

            for media in batch {
                let this = Arc::clone(&self);
                self.in_flight.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(async move {
                    this.download_one(media).await;
                    this.in_flight.fetch_sub(1, Ordering::Relaxed);
                });
                tokio::time::sleep(STAGGER).await;
            }
        }
    }

    async fn download_one(&self, mut media: crate::models::MediaAsset) {
        let Some(url) = media.source_url.clone() else {
            media.status = MediaStatus::Failed;
            let _ = self.store.upsert_media(&media).await;
            return;
        };

        if is_expired(&url, Utc::now(), Duration::ZERO) {
            media.status = MediaStatus::Expired;
            let _ = self.store.upsert_media(&media).await;
            return;
        }

        let run_id = Uuid::new_v4();
        let start = Instant::now();
        for attempt in 0..MAX_RETRIES {
            let (result, _row) = self.feed.download_media(&url, run_id).await;
            match result {
                Ok(body) => {
                    let put = self
                        .object_store
                        .put(media.object_store_key.as_deref().unwrap_or(&media.media_key), body.bytes, &body.content_type)
                        .await;
                    if let Ok(public_url) = put {
                        media.mark_complete(
                            media.object_store_key.clone().unwrap_or_default(),
                            public_url,
                            body.size,
                            body.content_type,
                        );
                        let _ = self.store.upsert_media(&media).await;
                        let _ = self
                            .store
                            .append_media_download_audit(&MediaDownloadAuditRow {
                                media_key: media.media_key.clone(),
                                parent_key: media.parent_key.clone(),
                                bytes: body.size,
                                elapsed_ms: start.elapsed().as_millis() as u64,
                                attempt_count: attempt + 1,
                                outcome: MediaDownloadOutcome::Complete,
                                recorded_at: Utc::now(),
                            })
                            .await;
                        self.downloaded.fetch_add(1, Ordering::Relaxed);
                        self.note_success();
                        return;
                    }
                }
                Err(EngineError::RateLimited) => {
                    self.note_rate_limited();
                    return; // row stays pending_download, picked up next poll
                }
                Err(EngineError::UrlExpired { .. }) => {
                    media.status = MediaStatus::Expired;
                    let _ = self.store.upsert_media(&media).await;
                    let _ = self
                        .store
                        .append_media_download_audit(&MediaDownloadAuditRow {
                            media_key: media.media_key.clone(),
                            parent_key: media.parent_key.clone(),
                            bytes: 0,
                            elapsed_ms: start.elapsed().as_millis() as u64,
                            attempt_count: attempt + 1,
                            outcome: MediaDownloadOutcome::Expired,
                            recorded_at: Utc::now(),
                        })
                        .await;
                    return;
                }
                Err(_) => continue,
            }
        }

        media.status = MediaStatus::Failed;
        media.retry_count += 1;
        let _ = self.store.upsert_media(&media).await;
        let _ = self
            .store
            .append_media_download_audit(&MediaDownloadAuditRow {
                media_key: media.media_key.clone(),
                parent_key: media.parent_key.clone(),
                bytes: 0,
                elapsed_ms: start.elapsed().as_millis() as u64,
                attempt_count: MAX_RETRIES,
                outcome: MediaDownloadOutcome::Failed,
                recorded_at: Utc::now(),
            })
            .await;
    }

    /// Expired-URL recovery sweep (§4.E "Expired-URL recovery"), run at
    /// startup and periodically by the scheduler.
    pub async fn recover_expired(&self) -> anyhow::Result<()> {
        let rows = self.store.recovery_media().await?;
        let mut by_parent: std::collections::HashMap<String, Vec<crate::models::MediaAsset>> = std::collections::HashMap::new();

        for mut media in rows {
            if media.is_stored() {
                media.status = MediaStatus::Complete;
                self.store.upsert_media(&media).await?;
                continue;
            }
            if let Some(url) = media.source_url.clone() {
                if !is_expired(&url, Utc::now(), Duration::ZERO) {
                    self.download_one(media).await;
                    continue;
                }
            }
            by_parent.entry(media.parent_key.clone()).or_default().push(media);
        }

        for (parent_key, mut group) in by_parent {
            let listing_id = match self.store.get_listing(&parent_key).await {
                Ok(Some(listing)) => listing.listing_id_display,
                _ => parent_key.clone(),
            };
            let url = self.feed.build_single_listing_url(&self.vendor, &listing_id);
            let run_id = Uuid::new_v4();
            let (page, _row) = self.feed.fetch_page(&url, run_id).await;
            let Ok(page) = page else { continue };
            let Some(record) = page.records.first() else { continue };
            let fresh: std::collections::HashMap<String, String> = mapper::media_docs(record)
                .iter()
                .filter_map(|m| Some((m.get("MediaKey")?.as_str()?.to_string(), m.get("MediaURL")?.as_str()?.to_string())))
                .collect();
            for media in group.drain(..) {
                let mut media = media;
                if let Some(fresh_url) = fresh.get(&media.media_key) {
                    media.source_url = Some(fresh_url.clone());
                    self.store.upsert_media(&media).await?;
                    self.download_one(media).await;
                }
            }
        }

        info!(
            downloaded = self.downloaded.load(Ordering::Relaxed),
            rate_limited = self.rate_limited.load(Ordering::Relaxed),
            "media downloader recovery sweep complete"
        );
        Ok(())
    }

    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.downloaded.load(Ordering::Relaxed),
            self.rate_limited.load(Ordering::Relaxed),
            self.in_flight.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedClient;
    use crate::rate_limiter::RateLimiter;
    use crate::store::{ListingStore, ObjectStore};

    struct Unused;

    #[async_trait::async_trait]
    impl ListingStore for Unused {
        async fn latest_run(&self, _: crate::models::Resource) -> crate::error::Result<Option<crate::models::RunRecord>> { Ok(None) }
        async fn insert_run(&self, _: &crate::models::RunRecord) -> crate::error::Result<()> { Ok(()) }
        async fn finalize_run(&self, _: &crate::models::RunRecord) -> crate::error::Result<()> { Ok(()) }
        async fn append_request_log(&self, _: &crate::models::RequestLogRow) -> crate::error::Result<()> { Ok(()) }
        async fn recent_request_timestamps(&self, _: chrono::DateTime<Utc>) -> crate::error::Result<Vec<chrono::DateTime<Utc>>> { Ok(Vec::new()) }
        async fn recent_media_download_bytes(&self, _: chrono::DateTime<Utc>) -> crate::error::Result<Vec<(chrono::DateTime<Utc>, u64)>> { Ok(Vec::new()) }
        async fn keys_at_hwm(&self, _: crate::models::Resource, _: chrono::DateTime<Utc>) -> crate::error::Result<Vec<String>> { Ok(Vec::new()) }
        async fn get_listing(&self, _: &str) -> crate::error::Result<Option<crate::models::Listing>> { Ok(None) }
        async fn upsert_listing(&self, _: &crate::models::Listing) -> crate::error::Result<()> { Ok(()) }
        async fn soft_hide_listing(&self, _: &str) -> crate::error::Result<()> { Ok(()) }
        async fn replace_rooms(&self, _: &str, _: &[crate::models::Room]) -> crate::error::Result<()> { Ok(()) }
        async fn replace_unit_types(&self, _: &str, _: &[crate::models::UnitType]) -> crate::error::Result<()> { Ok(()) }
        async fn upsert_raw(&self, _: &crate::models::RawResponse) -> crate::error::Result<()> { Ok(()) }
        async fn append_change_log(&self, _: &crate::models::ChangeLog) -> crate::error::Result<()> { Ok(()) }
        async fn append_price_history(&self, _: &crate::models::PriceHistory) -> crate::error::Result<()> { Ok(()) }
        async fn append_status_history(&self, _: &crate::models::StatusHistory) -> crate::error::Result<()> { Ok(()) }
        async fn get_member(&self, _: &str) -> crate::error::Result<Option<crate::models::Member>> { Ok(None) }
        async fn upsert_member(&self, _: &crate::models::Member) -> crate::error::Result<()> { Ok(()) }
        async fn soft_hide_member(&self, _: &str) -> crate::error::Result<()> { Ok(()) }
        async fn get_office(&self, _: &str) -> crate::error::Result<Option<crate::models::Office>> { Ok(None) }
        async fn upsert_office(&self, _: &crate::models::Office) -> crate::error::Result<()> { Ok(()) }
        async fn soft_hide_office(&self, _: &str) -> crate::error::Result<()> { Ok(()) }
        async fn upsert_open_house(&self, _: &crate::models::OpenHouse) -> crate::error::Result<bool> { Ok(true) }
        async fn delete_open_house(&self, _: &str) -> crate::error::Result<()> { Ok(()) }
        async fn upsert_lookup(&self, _: &crate::models::Lookup) -> crate::error::Result<()> { Ok(()) }
        async fn stored_media(&self, _: &str) -> crate::error::Result<Vec<crate::models::MediaAsset>> { Ok(Vec::new()) }
        async fn upsert_media(&self, _: &crate::models::MediaAsset) -> crate::error::Result<()> { Ok(()) }
        async fn delete_media(&self, _: &str) -> crate::error::Result<()> { Ok(()) }
        async fn pending_media(&self, _: usize) -> crate::error::Result<Vec<crate::models::MediaAsset>> { Ok(Vec::new()) }
        async fn recovery_media(&self) -> crate::error::Result<Vec<crate::models::MediaAsset>> { Ok(Vec::new()) }
        async fn append_media_download_audit(&self, _: &crate::models::MediaDownloadAuditRow) -> crate::error::Result<()> { Ok(()) }
        async fn stale_deleted_listings(&self, _: i64) -> crate::error::Result<Vec<String>> { Ok(Vec::new()) }
        async fn hard_delete_listing(&self, _: &str) -> crate::error::Result<()> { Ok(()) }
        async fn refresh_listing_view(&self) -> crate::error::Result<()> { Ok(()) }
    }

    #[async_trait::async_trait]
    impl ObjectStore for Unused {
        async fn put(&self, key: &str, _bytes: Vec<u8>, _content_type: &str) -> crate::error::Result<String> {
            Ok(format!("https://media.example.test/{key}"))
        }
        async fn delete(&self, _key: &str) -> crate::error::Result<()> { Ok(()) }
    }

    fn downloader() -> MediaDownloader {
        let limiter = Arc::new(RateLimiter::new(1 << 30, 1 << 31));
        let feed = Arc::new(FeedClient::new("https://feed.example.test/odata".to_string(), "tok", limiter).unwrap());
        MediaDownloader::new(Arc::new(Unused), Arc::new(Unused), feed, "VENDOR_MLS".to_string(), 4)
    }

    #[test]
    fn rate_limit_pause_doubles_and_caps() {
        let d = downloader();
        assert!(d.paused_for().is_none());

        d.note_rate_limited();
        let first = d.pause.lock().current;
        assert_eq!(first, INITIAL_PAUSE * 2);
        assert!(d.paused_for().is_some());

        d.note_rate_limited();
        let second = d.pause.lock().current;
        assert_eq!(second, INITIAL_PAUSE * 4);

        for _ in 0..10 {
            d.note_rate_limited();
        }
        assert_eq!(d.pause.lock().current, MAX_PAUSE);
    }

    #[test]
    fn success_resets_pause_interval() {
        let d = downloader();
        d.note_rate_limited();
        d.note_rate_limited();
        assert!(d.pause.lock().current > INITIAL_PAUSE);
        d.note_success();
        assert_eq!(d.pause.lock().current, INITIAL_PAUSE);
    }
}
