//! Domain entities (§3, §3a).
//!
//! Storage layout is owned by the out-of-scope relational store; these
//! types are the shape the core reads and writes through `crate::store`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The five replicated resource kinds (§4.G scheduling order, §2 data flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Listing,
    Member,
    Office,
    OpenHouse,
    Lookup,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Listing => "listing",
            Resource::Member => "member",
            Resource::Office => "office",
            Resource::OpenHouse => "open_house",
            Resource::Lookup => "lookup",
        }
    }

    /// `$expand` value used when building feed URLs for this resource (§4.B).
    pub fn expand_param(&self) -> Option<&'static str> {
        match self {
            Resource::Listing => Some("Media,Rooms,UnitTypes"),
            Resource::Member | Resource::Office => Some("Media"),
            Resource::OpenHouse | Resource::Lookup => None,
        }
    }

    /// Page size used when paging this resource (§4.B: 1000 expanding, 5000 otherwise).
    pub fn page_size(&self) -> u32 {
        if self.expand_param().is_some() {
            1000
        } else {
            5000
        }
    }
}

/// A listing's standard/vendor status pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingStatus {
    pub standard_status: Option<String>,
    pub vendor_status: Option<String>,
}

/// The ~100-attribute listing entity of §3, grouped as documented there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    /// Opaque vendor key — primary key.
    pub listing_key: String,
    /// Vendor listing id with its vendor prefix stripped (§4.C).
    pub listing_id_display: String,

    pub can_view: bool,
    pub use_cases: Vec<String>,

    pub list_price: Option<Decimal>,
    pub original_list_price: Option<Decimal>,
    pub previous_list_price: Option<Decimal>,

    pub status: ListingStatus,

    pub property_type: Option<String>,
    pub property_sub_type: Option<String>,
    pub bedrooms_total: Option<i32>,
    pub bathrooms_total: Option<Decimal>,
    pub living_area: Option<Decimal>,
    pub lot_size: Option<Decimal>,
    pub year_built: Option<i32>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// WKT `SRID=4326;POINT(lng lat)`, derived by the mapper when lat/long are both present.
    pub geo_point: Option<String>,

    pub list_agent_key: Option<String>,
    pub list_office_key: Option<String>,
    pub buyer_agent_key: Option<String>,
    pub buyer_office_key: Option<String>,

    pub public_remarks: Option<String>,
    pub private_remarks: Option<String>,
    /// `PhotosCount` — watched for `ChangeLog` emission alongside price/status/remarks/area.
    pub photo_count: Option<i32>,

    pub elementary_school: Option<String>,
    pub middle_or_junior_school: Option<String>,
    pub high_school: Option<String>,

    pub tax_annual_amount: Option<Decimal>,
    pub tax_year: Option<i32>,

    pub buyer_agency_compensation: Option<String>,

    pub modification_ts: DateTime<Utc>,
    pub originating_mod_ts: Option<DateTime<Utc>>,
    pub photos_change_ts: Option<DateTime<Utc>>,
    pub major_change_ts: Option<DateTime<Utc>>,
    pub original_entry_ts: Option<DateTime<Utc>>,

    /// Vendor's own classification of the most recent change, when present
    /// (used to infer `PriceHistory.change_type` in preference to sign).
    pub major_change_type: Option<String>,

    /// Vendor-local fields (2-3 letter uppercase prefix + `_`) relocated here
    /// instead of explicit columns (§3 invariant).
    pub local_fields: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Room {
    pub room_type: Option<String>,
    pub room_level: Option<String>,
    pub room_dimensions: Option<String>,
    pub room_features: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitType {
    pub unit_type_type: Option<String>,
    pub unit_type_bedrooms: Option<i32>,
    pub unit_type_bathrooms: Option<Decimal>,
    pub unit_type_rent: Option<Decimal>,
}

/// The last mapper-input JSON minus expanded sub-resources (§3, §4.C `strip`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub listing_key: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaStatus {
    PendingDownload,
    Complete,
    Failed,
    Expired,
}

/// A media asset row (§3). `status = Complete` implies `object_store_key`,
/// `public_url` and `file_size_bytes > 0` are all set — enforced by
/// `MediaAsset::mark_complete` rather than left to call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAsset {
    pub media_key: String,
    pub parent_key: String,
    pub resource: Resource,

    /// Signed CDN URL — not persisted past the current refresh cycle.
    pub source_url: Option<String>,
    pub media_mod_ts: Option<DateTime<Utc>>,

    pub object_store_key: Option<String>,
    pub public_url: Option<String>,
    pub order: i32,
    pub category: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub content_type: Option<String>,
    pub status: MediaStatus,
    pub retry_count: u32,
}

impl MediaAsset {
    pub fn is_stored(&self) -> bool {
        self.object_store_key.as_deref().is_some_and(|k| !k.is_empty())
            && self.public_url.as_deref().is_some_and(|u| !u.is_empty())
            && self.file_size_bytes.is_some_and(|s| s > 0)
    }

    pub fn mark_complete(&mut self, object_store_key: String, public_url: String, file_size_bytes: u64, content_type: String) {
        self.object_store_key = Some(object_store_key);
        self.public_url = Some(public_url);
        self.file_size_bytes = Some(file_size_bytes);
        self.content_type = Some(content_type);
        self.status = MediaStatus::Complete;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub member_key: String,
    pub can_view: bool,
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub office_key: Option<String>,
    pub photos_change_ts: Option<DateTime<Utc>>,
    pub modification_ts: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Office {
    pub office_key: String,
    pub can_view: bool,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub photos_change_ts: Option<DateTime<Utc>>,
    pub modification_ts: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenHouse {
    pub open_house_key: String,
    pub listing_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub remarks: Option<String>,
    pub modification_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lookup {
    pub vendor_system: String,
    pub lookup_name: String,
    pub value: String,
    pub display_value: Option<String>,
    pub modification_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceHistory {
    pub listing_key: String,
    pub old_price: Option<Decimal>,
    pub new_price: Option<Decimal>,
    pub change_type: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistory {
    pub listing_key: String,
    pub old_status: Option<String>,
    pub new_status: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeLog {
    pub listing_key: String,
    pub field_name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Fields watched for `ChangeLog`/history emission (§4.D step 3).
pub const WATCHED_FIELDS: &[&str] = &[
    "list_price",
    "standard_status",
    "photo_count",
    "public_remarks",
    "living_area",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    InitialImport,
    Replication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

/// Per-HTTP-error-status tallies for a run (§3 "HTTP error histogram").
pub type ErrorHistogram = HashMap<u16, u64>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub records_received: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_deleted: u64,
    pub media_downloaded: u64,
    pub media_deleted: u64,
    pub media_bytes: u64,
    pub request_count: u64,
    pub request_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub resource: Resource,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub hwm_start: Option<DateTime<Utc>>,
    pub hwm_end: Option<DateTime<Utc>>,
    pub counts: RunCounts,
    pub avg_latency_ms: Option<f64>,
    pub error_histogram: ErrorHistogram,
    pub error_message: Option<String>,
}

impl RunRecord {
    pub fn new(resource: Resource, mode: RunMode, hwm_start: Option<DateTime<Utc>>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            resource,
            mode,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            hwm_start,
            hwm_end: None,
            counts: RunCounts::default(),
            avg_latency_ms: None,
            error_histogram: HashMap::new(),
            error_message: None,
        }
    }
}

/// One row per HTTP call, successful or failed (§3a, §4.B, §7's observability contract).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogRow {
    pub run_id: Uuid,
    pub url: String,
    pub status: Option<u16>,
    pub elapsed_ms: u64,
    pub bytes: u64,
    pub record_count: Option<u64>,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaDownloadOutcome {
    Complete,
    Failed,
    Expired,
}

/// One row per completed background media download (§3a, §4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDownloadAuditRow {
    pub media_key: String,
    pub parent_key: String,
    pub bytes: u64,
    pub elapsed_ms: u64,
    pub attempt_count: u32,
    pub outcome: MediaDownloadOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Per-record pipeline statistics returned by a processor (§4.D).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordStats {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub media_queued: u64,
    pub media_deleted: u64,
    pub media_bytes: u64,
}

impl RecordStats {
    pub fn inserted() -> Self {
        Self { inserted: 1, ..Default::default() }
    }
    pub fn updated() -> Self {
        Self { updated: 1, ..Default::default() }
    }
    pub fn deleted() -> Self {
        Self { deleted: 1, ..Default::default() }
    }

    pub fn merge(&mut self, other: RecordStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.media_queued += other.media_queued;
        self.media_deleted += other.media_deleted;
        self.media_bytes += other.media_bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_asset_completeness_invariant() {
        let mut m = MediaAsset {
            media_key: "M1".into(),
            parent_key: "K1".into(),
            resource: Resource::Listing,
            source_url: Some("https://cdn.example.test/m1?expires=1".into()),
            media_mod_ts: None,
            object_store_key: None,
            public_url: None,
            order: 0,
            category: None,
            file_size_bytes: None,
            content_type: None,
            status: MediaStatus::PendingDownload,
            retry_count: 0,
        };
        assert!(!m.is_stored());
        m.mark_complete(
            "listing/K1/M1.jpg".into(),
            "https://media.example.test/listing/K1/M1.jpg".into(),
            1024,
            "image/jpeg".into(),
        );
        assert!(m.is_stored());
        assert_eq!(m.status, MediaStatus::Complete);
    }

    #[test]
    fn resource_expand_and_page_size() {
        assert_eq!(Resource::Listing.expand_param(), Some("Media,Rooms,UnitTypes"));
        assert_eq!(Resource::Listing.page_size(), 1000);
        assert_eq!(Resource::Lookup.expand_param(), None);
        assert_eq!(Resource::Lookup.page_size(), 5000);
    }
}
