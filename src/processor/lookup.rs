//! Lookup processor: a straight upsert, no visibility gate (§4.D).

use super::ProcessorContext;
use crate::models::{Lookup, RecordStats};
use chrono::{DateTime, Utc};
use serde_json::Value;

fn get_str(v: &Value, field: &str) -> Option<String> {
    v.get(field).and_then(|x| x.as_str()).map(|s| s.to_string())
}

fn get_timestamp(v: &Value, field: &str) -> Option<DateTime<Utc>> {
    get_str(v, field).and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc)))
}

pub async fn process(ctx: &ProcessorContext, record: &Value, vendor: &str) -> crate::error::Result<RecordStats> {
    let lookup = Lookup {
        vendor_system: vendor.to_string(),
        lookup_name: get_str(record, "LookupName").unwrap_or_default(),
        value: get_str(record, "LookupValue").unwrap_or_default(),
        display_value: get_str(record, "LookupValueDisplay"),
        modification_ts: get_timestamp(record, "ModificationTimestamp").ok_or_else(|| crate::error::EngineError::MappingError {
            field: "ModificationTimestamp".to_string(),
            reason: "missing".to_string(),
        })?,
    };
    ctx.store.upsert_lookup(&lookup).await?;
    Ok(RecordStats::updated())
}
