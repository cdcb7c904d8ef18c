//! §4.D-media: inline media refresh run from the listing/member/office processors.
//!
//! Grounded on `hashdive_api.rs::execute_with_retry`'s bounded-attempt,
//! 429-aware retry loop, generalized from a single request to a bounded
//! concurrent batch of downloads.

use super::ProcessorContext;
use crate::error::EngineError;
use crate::feed::is_expired;
use crate::models::{MediaAsset, MediaStatus, RecordStats, Resource};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const MAX_RETRIES: u32 = 3;
const FRESHNESS_MARGIN: Duration = Duration::from_secs(60);

enum Classification {
    SkipMetadataOnly(MediaAsset),
    AlreadyStored(MediaAsset),
    NeedsDownload(MediaAsset),
}

fn classify(incoming: &MediaAsset, stored: Option<&MediaAsset>) -> Classification {
    match stored {
        Some(existing) if existing.status == MediaStatus::Complete && existing.media_mod_ts == incoming.media_mod_ts => {
            let mut merged = existing.clone();
            merged.category = incoming.category.clone();
            merged.order = incoming.order;
            Classification::SkipMetadataOnly(merged)
        }
        Some(existing) if existing.is_stored() => {
            let mut merged = existing.clone();
            merged.status = MediaStatus::Complete;
            merged.media_mod_ts = incoming.media_mod_ts;
            Classification::AlreadyStored(merged)
        }
        Some(existing) => {
            let mut merged = incoming.clone();
            merged.retry_count = existing.retry_count;
            Classification::NeedsDownload(merged)
        }
        None => Classification::NeedsDownload(incoming.clone()),
    }
}

/// Runs the full inline refresh: diff against stored rows, classify, and
/// download what's needed. Returns the counts of media queued for (or
/// completed via) storage, media removed, and bytes downloaded.
pub async fn refresh(
    ctx: &ProcessorContext,
    parent_key: &str,
    listing_id: &str,
    resource: Resource,
    incoming: Vec<MediaAsset>,
    run_id: Uuid,
) -> RecordStats {
    let stored = ctx.store.stored_media(parent_key).await.unwrap_or_default();
    let stored_by_key: HashMap<String, MediaAsset> =
        stored.iter().cloned().map(|m| (m.media_key.clone(), m)).collect();
    let incoming_keys: std::collections::HashSet<&str> =
        incoming.iter().map(|m| m.media_key.as_str()).collect();

    let mut deleted = 0u64;
    for gone in stored.iter().filter(|m| !incoming_keys.contains(m.media_key.as_str())) {
        if let Some(key) = &gone.object_store_key {
            let _ = ctx.object_store.delete(key).await;
        }
        let _ = ctx.store.delete_media(&gone.media_key).await;
        deleted += 1;
    }

    let needs_fresh_urls = incoming
        .first()
        .and_then(|m| m.source_url.as_deref())
        .is_some_and(|url| is_expired(url, Utc::now(), FRESHNESS_MARGIN));

    let fresh_urls: HashMap<String, String> = if needs_fresh_urls {
        fetch_fresh_media_urls(ctx, listing_id).await
    } else {
        HashMap::new()
    };

    let mut to_download = Vec::new();
    let mut queued = 0u64;

    for media in incoming {
        match classify(&media, stored_by_key.get(&media.media_key)) {
            Classification::SkipMetadataOnly(row) => {
                let _ = ctx.store.upsert_media(&row).await;
            }
            Classification::AlreadyStored(row) => {
                let _ = ctx.store.upsert_media(&row).await;
                queued += 1;
            }
            Classification::NeedsDownload(mut row) => {
                if let Some(fresh) = fresh_urls.get(&row.media_key) {
                    row.source_url = Some(fresh.clone());
                }
                to_download.push(row);
            }
        }
    }

    let mut bytes = 0u64;
    for batch in to_download.chunks(ctx.inline_media_concurrency.max(1)) {
        let mut set = tokio::task::JoinSet::new();
        for media in batch {
            let ctx = ctx.clone();
            let media = media.clone();
            set.spawn(async move { download_one(&ctx, media, run_id).await });
        }
        while let Some(res) = set.join_next().await {
            if let Ok(Some(downloaded_bytes)) = res {
                queued += 1;
                bytes += downloaded_bytes;
            }
        }
    }

    RecordStats { media_queued: queued, media_deleted: deleted, media_bytes: bytes, ..Default::default() }
}

async fn fetch_fresh_media_urls(ctx: &ProcessorContext, listing_id: &str) -> HashMap<String, String> {
    let url = ctx.feed.build_single_listing_url(&ctx.vendor, listing_id);
    let run_id = Uuid::new_v4();
    let (page, _row) = ctx.feed.fetch_page(&url, run_id).await;
    let Ok(page) = page else { return HashMap::new() };
    let Some(record) = page.records.first() else { return HashMap::new() };
    crate::mapper::media_docs(record)
        .iter()
        .filter_map(|m| {
            let key = m.get("MediaKey")?.as_str()?.to_string();
            let url = m.get("MediaURL")?.as_str()?.to_string();
            Some((key, url))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(status: MediaStatus, mod_ts: Option<chrono::DateTime<Utc>>) -> MediaAsset {
        MediaAsset {
            media_key: "M1".into(),
            parent_key: "K1".into(),
            resource: Resource::Listing,
            source_url: Some("https://cdn.example.test/m1".into()),
            media_mod_ts: mod_ts,
            object_store_key: Some("listing/K1/M1.jpg".into()),
            public_url: Some("https://media.example.test/listing/K1/M1.jpg".into()),
            order: 0,
            category: None,
            file_size_bytes: Some(1024),
            content_type: Some("image/jpeg".into()),
            status,
            retry_count: 0,
        }
    }

    #[test]
    fn unchanged_complete_media_is_skipped_not_redownloaded() {
        let ts = Utc::now();
        let stored = asset(MediaStatus::Complete, Some(ts));
        let incoming = asset(MediaStatus::PendingDownload, Some(ts));
        match classify(&incoming, Some(&stored)) {
            Classification::SkipMetadataOnly(_) => {}
            _ => panic!("expected SkipMetadataOnly"),
        }
    }

    #[test]
    fn changed_mod_ts_on_stored_media_needs_download() {
        let old_ts = Utc::now();
        let new_ts = old_ts + chrono::Duration::seconds(1);
        let stored = asset(MediaStatus::Complete, Some(old_ts));
        let incoming = asset(MediaStatus::PendingDownload, Some(new_ts));
        match classify(&incoming, Some(&stored)) {
            Classification::NeedsDownload(_) => {}
            _ => panic!("expected NeedsDownload"),
        }
    }

    #[test]
    fn brand_new_media_needs_download() {
        let incoming = asset(MediaStatus::PendingDownload, None);
        match classify(&incoming, None) {
            Classification::NeedsDownload(_) => {}
            _ => panic!("expected NeedsDownload"),
        }
    }
}

/// Returns the number of bytes downloaded on success (`Some(0)` when the
/// media was already stored and merely re-confirmed, no network transfer).
async fn download_one(ctx: &ProcessorContext, mut media: MediaAsset, run_id: Uuid) -> Option<u64> {
    let Some(url) = media.source_url.clone() else {
        media.status = MediaStatus::Failed;
        let _ = ctx.store.upsert_media(&media).await;
        return None;
    };

    if is_expired(&url, Utc::now(), Duration::ZERO) {
        media.status = MediaStatus::Expired;
        let _ = ctx.store.upsert_media(&media).await;
        return None;
    }

    for attempt in 0..MAX_RETRIES {
        let (result, _row) = ctx.feed.download_media(&url, run_id).await;
        match result {
            Ok(body) => {
                let put = ctx
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
                    let _ = ctx.store.upsert_media(&media).await;
                    return Some(body.size);
                }
            }
            Err(EngineError::RateLimited) => {
                warn!(media_key = %media.media_key, attempt, "inline media 429, backing off");
                tokio::time::sleep(Duration::from_secs(30 * (attempt as u64 + 1))).await;
                continue;
            }
            Err(EngineError::UrlExpired { .. }) => {
                if media.is_stored() {
                    let _ = ctx.store.upsert_media(&media).await;
                    return Some(0);
                }
                media.status = MediaStatus::Expired;
                let _ = ctx.store.upsert_media(&media).await;
                return None;
            }
            Err(_) => {
                tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                continue;
            }
        }
    }

    media.status = MediaStatus::Failed;
    media.retry_count += 1;
    let _ = ctx.store.upsert_media(&media).await;
    None
}
