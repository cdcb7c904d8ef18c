//! OpenHouse processor: straight upsert keyed by listing id; incoming
//! `canView=false` is hard-deleted, since these rows represent ephemeral
//! events (§4.D). The original spec-flagged bug — misclassifying every
//! upsert as `updated` — is fixed here: `upsert_open_house` reports back
//! whether the row was newly inserted.

use super::ProcessorContext;
use crate::models::{OpenHouse, RecordStats};
use chrono::{DateTime, Utc};
use serde_json::Value;

fn get_str(v: &Value, field: &str) -> Option<String> {
    v.get(field).and_then(|x| x.as_str()).map(|s| s.to_string())
}

fn get_bool(v: &Value, field: &str) -> bool {
    v.get(field).and_then(|x| x.as_bool()).unwrap_or(false)
}

fn get_timestamp(v: &Value, field: &str) -> Option<DateTime<Utc>> {
    get_str(v, field).and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc)))
}

pub async fn process(ctx: &ProcessorContext, record: &Value) -> crate::error::Result<RecordStats> {
    let open_house_key = get_str(record, "OpenHouseKey").ok_or_else(|| crate::error::EngineError::MappingError {
        field: "OpenHouseKey".to_string(),
        reason: "missing".to_string(),
    })?;

    if !get_bool(record, "MlgCanView") {
        ctx.store.delete_open_house(&open_house_key).await?;
        return Ok(RecordStats::deleted());
    }

    let open_house = OpenHouse {
        open_house_key: open_house_key.clone(),
        listing_id: get_str(record, "ListingId").unwrap_or_default(),
        start_time: get_timestamp(record, "OpenHouseStartTime"),
        end_time: get_timestamp(record, "OpenHouseEndTime"),
        remarks: get_str(record, "OpenHouseRemarks"),
        modification_ts: get_timestamp(record, "ModificationTimestamp").ok_or_else(|| crate::error::EngineError::MappingError {
            field: "ModificationTimestamp".to_string(),
            reason: "missing".to_string(),
        })?,
    };

    let inserted = ctx.store.upsert_open_house(&open_house).await?;
    Ok(if inserted { RecordStats::inserted() } else { RecordStats::updated() })
}
