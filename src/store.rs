//! Out-of-scope external collaborator seams (§1, §9 "traits at the seams").
//!
//! The relational store, object store, and alert hook are named by the spec
//! as external collaborators outside this core's scope — no concrete
//! Postgres/S3 implementation lives here, only the contract the engine calls
//! against. `async-trait` is already a teacher dependency, used the same way
//! for its own service-boundary traits.

use crate::error::Result;
use crate::models::{
    ChangeLog, Listing, MediaAsset, MediaDownloadAuditRow, Member, Office, OpenHouse, PriceHistory,
    RawResponse, RequestLogRow, Resource, Room, RunRecord, StatusHistory, UnitType,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// What the cycle driver and processors need from the relational store.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn latest_run(&self, resource: Resource) -> Result<Option<RunRecord>>;
    async fn insert_run(&self, run: &RunRecord) -> Result<()>;
    async fn finalize_run(&self, run: &RunRecord) -> Result<()>;
    async fn append_request_log(&self, row: &RequestLogRow) -> Result<()>;

    /// Request timestamps recorded since `since`, for rate-limiter restart
    /// recovery (§4.A "Recovery from restart").
    async fn recent_request_timestamps(&self, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>>;

    /// Completed media-download (timestamp, bytes) pairs recorded since
    /// `since`, for rate-limiter restart recovery (§4.A "Recovery from restart").
    async fn recent_media_download_bytes(&self, since: DateTime<Utc>) -> Result<Vec<(DateTime<Utc>, u64)>>;

    /// Primary keys whose `modificationTs` equals `hwm` exactly (§4.F step 3).
    async fn keys_at_hwm(&self, resource: Resource, hwm: DateTime<Utc>) -> Result<Vec<String>>;

    async fn get_listing(&self, listing_key: &str) -> Result<Option<Listing>>;
    async fn upsert_listing(&self, listing: &Listing) -> Result<()>;
    async fn soft_hide_listing(&self, listing_key: &str) -> Result<()>;
    async fn replace_rooms(&self, listing_key: &str, rooms: &[Room]) -> Result<()>;
    async fn replace_unit_types(&self, listing_key: &str, unit_types: &[UnitType]) -> Result<()>;
    async fn upsert_raw(&self, raw: &RawResponse) -> Result<()>;
    async fn append_change_log(&self, entry: &ChangeLog) -> Result<()>;
    async fn append_price_history(&self, entry: &PriceHistory) -> Result<()>;
    async fn append_status_history(&self, entry: &StatusHistory) -> Result<()>;

    async fn get_member(&self, member_key: &str) -> Result<Option<Member>>;
    async fn upsert_member(&self, member: &Member) -> Result<()>;
    async fn soft_hide_member(&self, member_key: &str) -> Result<()>;

    async fn get_office(&self, office_key: &str) -> Result<Option<Office>>;
    async fn upsert_office(&self, office: &Office) -> Result<()>;
    async fn soft_hide_office(&self, office_key: &str) -> Result<()>;

    async fn upsert_open_house(&self, open_house: &OpenHouse) -> Result<bool>;
    async fn delete_open_house(&self, open_house_key: &str) -> Result<()>;

    async fn upsert_lookup(&self, lookup: &crate::models::Lookup) -> Result<()>;

    async fn stored_media(&self, parent_key: &str) -> Result<Vec<MediaAsset>>;
    async fn upsert_media(&self, media: &MediaAsset) -> Result<()>;
    async fn delete_media(&self, media_key: &str) -> Result<()>;
    async fn pending_media(&self, limit: usize) -> Result<Vec<MediaAsset>>;
    async fn recovery_media(&self) -> Result<Vec<MediaAsset>>;
    async fn append_media_download_audit(&self, row: &MediaDownloadAuditRow) -> Result<()>;

    /// Listings whose soft-delete marker is older than `older_than_days` (§4.G daily cleanup).
    async fn stale_deleted_listings(&self, older_than_days: i64) -> Result<Vec<String>>;
    async fn hard_delete_listing(&self, listing_key: &str) -> Result<()>;

    /// Best-effort materialized-view refresh (§4.F step 7); errors are ignored by the caller.
    async fn refresh_listing_view(&self) -> Result<()>;
}

/// What the inline media step and background downloader need from the object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<String>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// The replication-change notification extension point (§4.D step 7). A
/// no-op contract in this system — the call site is the guarantee.
#[async_trait]
pub trait AlertHook: Send + Sync {
    async fn notify(&self, event: AlertEvent) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub resource: Resource,
    pub key: String,
    pub kind: AlertKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Inserted,
    Updated,
    Removed,
}
