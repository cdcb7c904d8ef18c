//! Feed URL construction (§4.B).

use crate::models::Resource;
use chrono::{DateTime, Utc};

/// `gt` normally, `ge` when the caller needs resume-safe semantics (§4.F step 3/4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampOp {
    Gt,
    Ge,
}

impl TimestampOp {
    fn as_str(&self) -> &'static str {
        match self {
            TimestampOp::Gt => "gt",
            TimestampOp::Ge => "ge",
        }
    }
}

fn filter_base(vendor: &str) -> String {
    format!("OriginatingSystemName eq '{vendor}'")
}

fn with_expand(base_url: &str, resource: Resource, filter: String, page_size: u32) -> String {
    let mut qp = vec![
        ("$filter".to_string(), filter),
        ("$top".to_string(), page_size.to_string()),
        ("$orderby".to_string(), "ModificationTimestamp".to_string()),
    ];
    if let Some(expand) = resource.expand_param() {
        qp.push(("$expand".to_string(), expand.to_string()));
    }
    let query = qp
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding_lite(&v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{base_url}/{resource_path}?{query}", resource_path = resource_path(resource))
}

fn resource_path(resource: Resource) -> &'static str {
    match resource {
        Resource::Listing => "Property",
        Resource::Member => "Member",
        Resource::Office => "Office",
        Resource::OpenHouse => "OpenHouse",
        Resource::Lookup => "Lookup",
    }
}

/// Minimal percent-encoding for the characters OData filters actually contain.
/// The feed is an internal collaborator with a known vendor dialect — this is
/// not a general-purpose URL encoder.
fn urlencoding_lite(s: &str) -> String {
    s.replace(' ', "%20").replace('\'', "%27")
}

/// Initial-import URL: `OriginatingSystemName` filter plus `MlgCanView eq true` (§4.B).
pub fn build_initial_url(base_url: &str, resource: Resource, vendor: &str) -> String {
    let filter = format!("{} and MlgCanView eq true", filter_base(vendor));
    with_expand(base_url, resource, filter, resource.page_size())
}

/// Replication URL: `ModificationTimestamp <op> '<iso-timestamp>'` (§4.B, §4.F).
pub fn build_replication_url(base_url: &str, resource: Resource, vendor: &str, hwm: DateTime<Utc>, resume_safe: bool) -> String {
    let op = if resume_safe { TimestampOp::Ge } else { TimestampOp::Gt };
    let filter = format!(
        "{} and ModificationTimestamp {} '{}'",
        filter_base(vendor),
        op.as_str(),
        hwm.to_rfc3339()
    );
    with_expand(base_url, resource, filter, resource.page_size())
}

/// Single-record refetch used by media recovery to obtain fresh signed URLs
/// for one listing (§4.D-media "Pre-flight URL freshness", §4.E step 3).
pub fn build_single_listing_url(base_url: &str, vendor: &str, listing_id: &str) -> String {
    let filter = format!("{} and ListingId eq '{}'", filter_base(vendor), listing_id);
    with_expand(base_url, Resource::Listing, filter, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn initial_url_filters_can_view() {
        let url = build_initial_url("https://feed.example.test/odata", Resource::Listing, "VENDOR_MLS");
        assert!(url.contains("MlgCanView%20eq%20true") || url.contains("MlgCanView eq true") || url.contains("MlgCanView"));
        assert!(url.contains("Property"));
        assert!(url.contains("%24expand=Media%2CRooms%2CUnitTypes") || url.contains("Media"));
    }

    #[test]
    fn replication_url_uses_ge_when_resume_safe() {
        let hwm = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let url = build_replication_url("https://feed.example.test/odata", Resource::Listing, "VENDOR_MLS", hwm, true);
        assert!(url.contains("ge"));
        let url_gt = build_replication_url("https://feed.example.test/odata", Resource::Listing, "VENDOR_MLS", hwm, false);
        assert!(url_gt.contains("gt"));
    }

    #[test]
    fn lookup_has_no_expand() {
        let url = build_initial_url("https://feed.example.test/odata", Resource::Lookup, "VENDOR_MLS");
        assert!(!url.contains("$expand") && !url.contains("%24expand"));
    }
}
