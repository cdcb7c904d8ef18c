//! Member/office processors: the listing shape minus children/raw/archive
//! (§4.D "Member/Office processors follow the same shape").

use super::{media, ProcessFlags, ProcessorContext};
use crate::mapper;
use crate::models::{Member, Office, RecordStats, Resource};
use chrono::Utc;
use serde_json::Value;

fn get_str(v: &Value, field: &str) -> Option<String> {
    v.get(field).and_then(|x| x.as_str()).map(|s| s.to_string())
}

fn get_bool(v: &Value, field: &str) -> bool {
    v.get(field).and_then(|x| x.as_bool()).unwrap_or(false)
}

fn get_timestamp(v: &Value, field: &str) -> Option<chrono::DateTime<Utc>> {
    get_str(v, field).and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc)))
}

pub async fn process_member(ctx: &ProcessorContext, record: &Value, flags: ProcessFlags) -> crate::error::Result<RecordStats> {
    let member_key = get_str(record, "MemberKey").ok_or_else(|| crate::error::EngineError::MappingError {
        field: "MemberKey".to_string(),
        reason: "missing".to_string(),
    })?;
    let can_view = get_bool(record, "MlgCanView");

    if !can_view {
        let existing = ctx.store.get_member(&member_key).await?;
        if existing.is_some() {
            ctx.store.soft_hide_member(&member_key).await?;
            return Ok(RecordStats::deleted());
        }
        return Ok(RecordStats::default());
    }

    let existing = ctx.store.get_member(&member_key).await?;
    let is_new = existing.is_none();
    let photos_change_ts = get_timestamp(record, "PhotosChangeTimestamp");

    let member = Member {
        member_key: member_key.clone(),
        can_view,
        full_name: get_str(record, "MemberFullName"),
        email: get_str(record, "MemberEmail"),
        office_key: get_str(record, "OfficeKey"),
        photos_change_ts,
        modification_ts: get_timestamp(record, "ModificationTimestamp").ok_or_else(|| crate::error::EngineError::MappingError {
            field: "ModificationTimestamp".to_string(),
            reason: "missing".to_string(),
        })?,
        deleted_at: None,
    };
    ctx.store.upsert_member(&member).await?;

    let photos_changed = is_new || existing.as_ref().is_some_and(|e| e.photos_change_ts != photos_change_ts);
    let media_docs = mapper::media_docs(record);
    let mut media_stats = RecordStats::default();
    if photos_changed && !media_docs.is_empty() {
        let assets = mapper::map_media(&member_key, Resource::Member, &media_docs);
        media_stats = media::refresh(ctx, &member_key, &member_key, Resource::Member, assets, flags.run_id).await;
    }

    let mut stats = if is_new { RecordStats::inserted() } else { RecordStats::updated() };
    stats.merge(media_stats);
    Ok(stats)
}

pub async fn process_office(ctx: &ProcessorContext, record: &Value, flags: ProcessFlags) -> crate::error::Result<RecordStats> {
    let office_key = get_str(record, "OfficeKey").ok_or_else(|| crate::error::EngineError::MappingError {
        field: "OfficeKey".to_string(),
        reason: "missing".to_string(),
    })?;
    let can_view = get_bool(record, "MlgCanView");

    if !can_view {
        let existing = ctx.store.get_office(&office_key).await?;
        if existing.is_some() {
            ctx.store.soft_hide_office(&office_key).await?;
            return Ok(RecordStats::deleted());
        }
        return Ok(RecordStats::default());
    }

    let existing = ctx.store.get_office(&office_key).await?;
    let is_new = existing.is_none();
    let photos_change_ts = get_timestamp(record, "PhotosChangeTimestamp");

    let office = Office {
        office_key: office_key.clone(),
        can_view,
        name: get_str(record, "OfficeName"),
        phone: get_str(record, "OfficePhone"),
        photos_change_ts,
        modification_ts: get_timestamp(record, "ModificationTimestamp").ok_or_else(|| crate::error::EngineError::MappingError {
            field: "ModificationTimestamp".to_string(),
            reason: "missing".to_string(),
        })?,
        deleted_at: None,
    };
    ctx.store.upsert_office(&office).await?;

    let photos_changed = is_new || existing.as_ref().is_some_and(|e| e.photos_change_ts != photos_change_ts);
    let media_docs = mapper::media_docs(record);
    let mut media_stats = RecordStats::default();
    if photos_changed && !media_docs.is_empty() {
        let assets = mapper::map_media(&office_key, Resource::Office, &media_docs);
        media_stats = media::refresh(ctx, &office_key, &office_key, Resource::Office, assets, flags.run_id).await;
    }

    let mut stats = if is_new { RecordStats::inserted() } else { RecordStats::updated() };
    stats.merge(media_stats);
    Ok(stats)
}
