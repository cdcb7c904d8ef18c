//! Listing processor (§4.D steps 1-8). No teacher analogue — built directly
//! from spec.md; the bounded-concurrency inline media step is grounded in
//! `processor::media`.

use super::{media, ProcessFlags, ProcessorContext};
use crate::mapper;
use crate::models::{ChangeLog, PriceHistory, RecordStats, Resource, StatusHistory, WATCHED_FIELDS};
use crate::store::{AlertEvent, AlertKind};
use chrono::{DateTime, Utc};

pub struct ListingOutcome {
    pub stats: RecordStats,
    pub modification_ts: DateTime<Utc>,
}

pub async fn process(ctx: &ProcessorContext, record: &serde_json::Value, flags: ProcessFlags) -> crate::error::Result<ListingOutcome> {
    let incoming = mapper::map_listing(record)?;
    let modification_ts = incoming.modification_ts;

    // Step 1: visibility gate.
    if !incoming.can_view {
        let existing = ctx.store.get_listing(&incoming.listing_key).await?;
        let Some(existing) = existing else {
            return Ok(ListingOutcome { stats: RecordStats::default(), modification_ts });
        };
        ctx.store.soft_hide_listing(&incoming.listing_key).await?;
        if existing.can_view && !flags.is_initial_import {
            ctx.store
                .append_status_history(&StatusHistory {
                    listing_key: incoming.listing_key.clone(),
                    old_status: existing.status.standard_status.clone(),
                    new_status: "Deleted/Removed".to_string(),
                    recorded_at: Utc::now(),
                })
                .await?;
            let _ = ctx
                .alert_hook
                .notify(AlertEvent { resource: Resource::Listing, key: incoming.listing_key.clone(), kind: AlertKind::Removed })
                .await;
        }
        return Ok(ListingOutcome { stats: RecordStats::deleted(), modification_ts });
    }

    // Step 2: load existing.
    let existing = ctx.store.get_listing(&incoming.listing_key).await?;
    let is_new = existing.is_none();

    // Step 3: diff (update-path only).
    if let Some(existing) = &existing {
        if !flags.is_initial_import {
            diff_and_record(ctx, existing, &incoming).await?;
        }
    }

    // Steps 4-5: replace children + upsert listing/raw, logically one commit.
    let rooms = mapper::map_rooms(record);
    let unit_types = mapper::map_unit_types(record);
    ctx.store.replace_rooms(&incoming.listing_key, &rooms).await?;
    ctx.store.replace_unit_types(&incoming.listing_key, &unit_types).await?;

    let mut to_store = incoming.clone();
    if let Some(existing) = &existing {
        to_store.created_at = existing.created_at;
    }
    ctx.store.upsert_listing(&to_store).await?;
    ctx.store
        .upsert_raw(&crate::models::RawResponse { listing_key: incoming.listing_key.clone(), body: mapper::strip(record) })
        .await?;

    // Step 6: media refresh decision.
    let photos_changed = is_new
        || existing
            .as_ref()
            .is_some_and(|e| e.photos_change_ts != incoming.photos_change_ts);
    let media_docs = mapper::media_docs(record);
    let mut media_stats = RecordStats::default();
    if photos_changed && !media_docs.is_empty() {
        let assets = mapper::map_media(&incoming.listing_key, Resource::Listing, &media_docs);
        media_stats = media::refresh(
            ctx,
            &incoming.listing_key,
            &incoming.listing_id_display,
            Resource::Listing,
            assets,
            flags.run_id,
        )
        .await;
    }

    // Step 7: alert hook (replication mode only).
    if !flags.is_initial_import {
        let kind = if is_new { AlertKind::Inserted } else { AlertKind::Updated };
        let _ = ctx
            .alert_hook
            .notify(AlertEvent { resource: Resource::Listing, key: incoming.listing_key.clone(), kind })
            .await;
    }

    let mut stats = if is_new { RecordStats::inserted() } else { RecordStats::updated() };
    stats.merge(media_stats);

    Ok(ListingOutcome { stats, modification_ts })
}

async fn diff_and_record(
    ctx: &ProcessorContext,
    old: &crate::models::Listing,
    new: &crate::models::Listing,
) -> crate::error::Result<()> {
    let key = &new.listing_key;
    let now = Utc::now();

    if old.list_price != new.list_price {
        ctx.store
            .append_change_log(&ChangeLog {
                listing_key: key.clone(),
                field_name: WATCHED_FIELDS[0].to_string(),
                old_value: old.list_price.map(|d| d.to_string()),
                new_value: new.list_price.map(|d| d.to_string()),
                recorded_at: now,
            })
            .await?;

        let change_type = new
            .major_change_type
            .clone()
            .unwrap_or_else(|| match (old.list_price, new.list_price) {
                (Some(o), Some(n)) if n < o => "Price Decrease".to_string(),
                (Some(o), Some(n)) if n > o => "Price Increase".to_string(),
                _ => "Other".to_string(),
            });
        ctx.store
            .append_price_history(&PriceHistory {
                listing_key: key.clone(),
                old_price: old.list_price,
                new_price: new.list_price,
                change_type,
                recorded_at: now,
            })
            .await?;
    }

    if old.status.standard_status != new.status.standard_status {
        ctx.store
            .append_change_log(&ChangeLog {
                listing_key: key.clone(),
                field_name: WATCHED_FIELDS[1].to_string(),
                old_value: old.status.standard_status.clone(),
                new_value: new.status.standard_status.clone(),
                recorded_at: now,
            })
            .await?;
        ctx.store
            .append_status_history(&StatusHistory {
                listing_key: key.clone(),
                old_status: old.status.standard_status.clone(),
                new_status: new.status.standard_status.clone().unwrap_or_default(),
                recorded_at: now,
            })
            .await?;
    }

    if old.photo_count != new.photo_count {
        ctx.store
            .append_change_log(&ChangeLog {
                listing_key: key.clone(),
                field_name: WATCHED_FIELDS[2].to_string(),
                old_value: old.photo_count.map(|n| n.to_string()),
                new_value: new.photo_count.map(|n| n.to_string()),
                recorded_at: now,
            })
            .await?;
    }

    if old.public_remarks != new.public_remarks {
        ctx.store
            .append_change_log(&ChangeLog {
                listing_key: key.clone(),
                field_name: WATCHED_FIELDS[3].to_string(),
                old_value: old.public_remarks.clone(),
                new_value: new.public_remarks.clone(),
                recorded_at: now,
            })
            .await?;
    }

    if old.living_area != new.living_area {
        ctx.store
            .append_change_log(&ChangeLog {
                listing_key: key.clone(),
                field_name: WATCHED_FIELDS[4].to_string(),
                old_value: old.living_area.map(|d| d.to_string()),
                new_value: new.living_area.map(|d| d.to_string()),
                recorded_at: now,
            })
            .await?;
    }

    Ok(())
}
