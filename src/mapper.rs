//! Module C: pure vendor-JSON → internal-entity mapping (§4.C).
//!
//! No teacher file maps a dynamic, vendor-prefixed JSON shape like this one;
//! built directly from spec.md §4.C, keeping the typed-struct-per-response
//! convention the teacher's `dome_rest.rs` uses for its own (fixed-shape)
//! response types.

use crate::error::{EngineError, Result};
use crate::models::{
    Listing, ListingStatus, MediaAsset, MediaStatus, Resource, Room, UnitType,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;

/// A 2-3 letter uppercase vendor prefix followed by `_`, e.g. `ABC_SchoolDistrict`.
fn vendor_local_prefix(key: &str) -> bool {
    let Some(underscore) = key.find('_') else { return false };
    let prefix = &key[..underscore];
    (2..=3).contains(&prefix.len()) && prefix.chars().all(|c| c.is_ascii_uppercase())
}

fn get_str(v: &serde_json::Value, field: &str) -> Option<String> {
    v.get(field).and_then(|x| x.as_str()).map(|s| s.to_string())
}

fn get_i32(v: &serde_json::Value, field: &str) -> Option<i32> {
    v.get(field).and_then(|x| x.as_i64()).map(|n| n as i32)
}

fn get_f64(v: &serde_json::Value, field: &str) -> Option<f64> {
    v.get(field).and_then(|x| x.as_f64())
}

fn get_bool(v: &serde_json::Value, field: &str) -> bool {
    v.get(field).and_then(|x| x.as_bool()).unwrap_or(false)
}

fn get_str_array(v: &serde_json::Value, field: &str) -> Vec<String> {
    v.get(field)
        .and_then(|x| x.as_array())
        .map(|arr| arr.iter().filter_map(|e| e.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

fn get_decimal(v: &serde_json::Value, field: &str) -> Option<Decimal> {
    match v.get(field)? {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn get_timestamp(v: &serde_json::Value, field: &str) -> Option<DateTime<Utc>> {
    get_str(v, field).and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc)))
}

/// `modificationTs` must parse; any other malformed timestamp is left `None`.
fn get_required_timestamp(v: &serde_json::Value, field: &str) -> Result<DateTime<Utc>> {
    let raw = get_str(v, field).ok_or_else(|| EngineError::MappingError {
        field: field.to_string(),
        reason: "missing".to_string(),
    })?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| EngineError::MappingError { field: field.to_string(), reason: e.to_string() })
}

/// WKT `SRID=4326;POINT(lng lat)` when both coordinates are present (§4.C).
fn geo_point(lat: Option<f64>, lng: Option<f64>) -> Option<String> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Some(format!("SRID=4326;POINT({lng} {lat})")),
        _ => None,
    }
}

/// Strips the vendor's 2-3 letter prefix off `listingId` for display (§4.C).
fn strip_vendor_prefix(listing_id: &str) -> String {
    if let Some(underscore) = listing_id.find('_') {
        let prefix = &listing_id[..underscore];
        if (2..=3).contains(&prefix.len()) && prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return listing_id[underscore + 1..].to_string();
        }
    }
    listing_id.to_string()
}

/// Known (non-vendor-local) listing fields, used to decide membership in `localFields`.
const KNOWN_FIELDS: &[&str] = &[
    "ListingKey", "ListingId", "MlgCanView", "ListPrice", "OriginalListPrice", "PreviousListPrice",
    "StandardStatus", "MlsStatus", "PropertyType", "PropertySubType", "BedroomsTotal",
    "BathroomsTotalInteger", "LivingArea", "LotSizeAcres", "YearBuilt", "Latitude", "Longitude",
    "ListAgentKey", "ListOfficeKey", "BuyerAgentKey", "BuyerOfficeKey", "PublicRemarks",
    "PrivateRemarksInternal", "ElementarySchool", "MiddleOrJuniorSchool", "HighSchool",
    "TaxAnnualAmount", "TaxYear", "BuyerAgencyCompensation", "ModificationTimestamp",
    "OriginatingSystemModificationTimestamp", "PhotosChangeTimestamp", "MajorChangeTimestamp",
    "OriginalEntryTimestamp", "MajorChangeType", "OriginatingSystemName", "PhotosCount", "UseCases",
    "Media", "Rooms", "UnitTypes",
];

pub fn map_listing(v: &serde_json::Value) -> Result<Listing> {
    let listing_key = get_str(v, "ListingKey").ok_or_else(|| EngineError::MappingError {
        field: "ListingKey".to_string(),
        reason: "missing".to_string(),
    })?;
    let listing_id = get_str(v, "ListingId").unwrap_or_default();
    let modification_ts = get_required_timestamp(v, "ModificationTimestamp")?;

    let mut local_fields = HashMap::new();
    if let Some(obj) = v.as_object() {
        for (key, val) in obj {
            if vendor_local_prefix(key) {
                local_fields.insert(key.clone(), val.clone());
            } else if !KNOWN_FIELDS.contains(&key.as_str()) {
                // Unknown but not vendor-prefixed: ignored, not archived as localFields
                // (the raw archive via `strip` keeps the full document separately).
            }
        }
    }

    Ok(Listing {
        listing_key,
        listing_id_display: strip_vendor_prefix(&listing_id),
        can_view: get_bool(v, "MlgCanView"),
        use_cases: get_str_array(v, "UseCases"),
        list_price: get_decimal(v, "ListPrice"),
        original_list_price: get_decimal(v, "OriginalListPrice"),
        previous_list_price: get_decimal(v, "PreviousListPrice"),
        status: ListingStatus {
            standard_status: get_str(v, "StandardStatus"),
            vendor_status: get_str(v, "MlsStatus"),
        },
        property_type: get_str(v, "PropertyType"),
        property_sub_type: get_str(v, "PropertySubType"),
        bedrooms_total: get_i32(v, "BedroomsTotal"),
        bathrooms_total: get_decimal(v, "BathroomsTotalInteger"),
        living_area: get_decimal(v, "LivingArea"),
        lot_size: get_decimal(v, "LotSizeAcres"),
        year_built: get_i32(v, "YearBuilt"),
        latitude: get_f64(v, "Latitude"),
        longitude: get_f64(v, "Longitude"),
        geo_point: geo_point(get_f64(v, "Latitude"), get_f64(v, "Longitude")),
        list_agent_key: get_str(v, "ListAgentKey"),
        list_office_key: get_str(v, "ListOfficeKey"),
        buyer_agent_key: get_str(v, "BuyerAgentKey"),
        buyer_office_key: get_str(v, "BuyerOfficeKey"),
        public_remarks: get_str(v, "PublicRemarks"),
        private_remarks: get_str(v, "PrivateRemarksInternal"),
        photo_count: get_i32(v, "PhotosCount"),
        elementary_school: get_str(v, "ElementarySchool"),
        middle_or_junior_school: get_str(v, "MiddleOrJuniorSchool"),
        high_school: get_str(v, "HighSchool"),
        tax_annual_amount: get_decimal(v, "TaxAnnualAmount"),
        tax_year: get_i32(v, "TaxYear"),
        buyer_agency_compensation: get_str(v, "BuyerAgencyCompensation"),
        modification_ts,
        originating_mod_ts: get_timestamp(v, "OriginatingSystemModificationTimestamp"),
        photos_change_ts: get_timestamp(v, "PhotosChangeTimestamp"),
        major_change_ts: get_timestamp(v, "MajorChangeTimestamp"),
        original_entry_ts: get_timestamp(v, "OriginalEntryTimestamp"),
        major_change_type: get_str(v, "MajorChangeType"),
        local_fields,
        created_at: Utc::now(),
    })
}

pub fn map_rooms(v: &serde_json::Value) -> Vec<Room> {
    v.get("Rooms")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .map(|r| Room {
                    room_type: get_str(r, "RoomType"),
                    room_level: get_str(r, "RoomLevel"),
                    room_dimensions: get_str(r, "RoomDimensions"),
                    room_features: r
                        .get("RoomFeatures")
                        .and_then(|f| f.as_array())
                        .map(|fs| fs.iter().filter_map(|f| f.as_str().map(String::from)).collect())
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn map_unit_types(v: &serde_json::Value) -> Vec<UnitType> {
    v.get("UnitTypes")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .map(|u| UnitType {
                    unit_type_type: get_str(u, "UnitTypeType"),
                    unit_type_bedrooms: get_i32(u, "UnitTypeBedsTotal"),
                    unit_type_bathrooms: get_decimal(u, "UnitTypeBathsTotal"),
                    unit_type_rent: get_decimal(u, "UnitTypeActualRent"),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Returns the input document with `Media`/`Rooms`/`UnitTypes` removed, for
/// the raw archive (§4.C: "companion function ... for archive storage").
pub fn strip(v: &serde_json::Value) -> serde_json::Value {
    let mut stripped = v.clone();
    if let Some(obj) = stripped.as_object_mut() {
        obj.remove("Media");
        obj.remove("Rooms");
        obj.remove("UnitTypes");
    }
    stripped
}

/// Extension used in the deterministic object-store key, derived from content type.
fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type {
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some(ct) if ct.starts_with("video/") => "mp4",
        _ => "jpg",
    }
}

/// One internal media entity per input media sub-document (§4.C media mapping).
pub fn map_media(parent_key: &str, resource: Resource, media_docs: &[serde_json::Value]) -> Vec<MediaAsset> {
    media_docs
        .iter()
        .enumerate()
        .map(|(idx, m)| {
            let media_key = get_str(m, "MediaKey").unwrap_or_else(|| format!("{parent_key}-{idx}"));
            let content_type = get_str(m, "MimeType");
            let ext = extension_for(content_type.as_deref());
            let object_store_key = format!("{}/{}/{}.{}", resource.as_str(), parent_key, media_key, ext);
            MediaAsset {
                media_key,
                parent_key: parent_key.to_string(),
                resource,
                source_url: get_str(m, "MediaURL"),
                media_mod_ts: get_timestamp(m, "MediaModificationTimestamp"),
                object_store_key: Some(object_store_key),
                public_url: None,
                order: get_i32(m, "Order").unwrap_or(idx as i32),
                category: get_str(m, "MediaCategory"),
                file_size_bytes: None,
                content_type,
                status: MediaStatus::PendingDownload,
                retry_count: 0,
            }
        })
        .collect()
}

pub fn media_docs(v: &serde_json::Value) -> Vec<serde_json::Value> {
    v.get("Media").and_then(|m| m.as_array()).cloned().unwrap_or_default()
}
