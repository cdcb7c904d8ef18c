//! Module D: per-resource record pipeline (§4.D).

pub mod listing;
pub mod lookup;
pub mod media;
pub mod member_office;
pub mod open_house;

use crate::feed::FeedClient;
use crate::store::{AlertHook, ListingStore, ObjectStore};
use std::sync::Arc;
use uuid::Uuid;

/// Shared collaborators every processor needs, bundled so call sites don't
/// thread four separate `Arc`s through every function signature.
#[derive(Clone)]
pub struct ProcessorContext {
    pub store: Arc<dyn ListingStore>,
    pub object_store: Arc<dyn ObjectStore>,
    pub feed: Arc<FeedClient>,
    pub alert_hook: Arc<dyn AlertHook>,
    pub vendor: String,
    pub inline_media_concurrency: usize,
}

/// Flags threaded through the processor call for the current record (§4.D).
#[derive(Debug, Clone, Copy)]
pub struct ProcessFlags {
    pub is_initial_import: bool,
    pub run_id: Uuid,
}
