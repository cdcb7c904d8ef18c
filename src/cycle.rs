//! Module F: replication cycle driver (§4.F).
//!
//! The per-page iterate-then-accumulate shape follows `dome_rest.rs`'s
//! `get_all_orders_for_market` pagination loop (page cap, accumulate,
//! stop on exhaustion), translated from offset-based to HWM-based paging.

use crate::feed::{iterate_pages, FeedClient};
use crate::models::{Resource, RunMode, RunRecord, RunStatus};
use crate::processor::{self, ProcessFlags, ProcessorContext};
use crate::store::ListingStore;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info_span, warn, Instrument};

pub struct CycleDriver {
    pub store: Arc<dyn ListingStore>,
    pub feed: Arc<FeedClient>,
    pub vendor: String,
}

impl CycleDriver {
    /// Runs one full replication cycle for `resource` (§4.F steps 1-7).
    pub async fn run_cycle(&self, resource: Resource, ctx: &ProcessorContext) -> anyhow::Result<RunRecord> {
        let span = info_span!("cycle", resource = resource.as_str());
        self.run_cycle_inner(resource, ctx).instrument(span).await
    }

    async fn run_cycle_inner(&self, resource: Resource, ctx: &ProcessorContext) -> anyhow::Result<RunRecord> {
        // Step 1: mode selection.
        let previous = self.store.latest_run(resource).await?;
        let (mode, hwm) = match previous.as_ref().and_then(|r| r.hwm_end) {
            Some(hwm) => (RunMode::Replication, Some(hwm)),
            None => (RunMode::InitialImport, None),
        };

        // Step 2: create run record.
        let mut run = RunRecord::new(resource, mode, hwm);
        self.store.insert_run(&run).await?;

        // Step 3: dedup set for resume safety (replication mode only).
        let mut dedup_keys: HashSet<String> = if mode == RunMode::Replication {
            let keys = self.store.keys_at_hwm(resource, hwm.unwrap()).await?;
            keys.into_iter().collect()
        } else {
            HashSet::new()
        };

        // Step 4: URL construction.
        let initial_url = match mode {
            RunMode::InitialImport => self.feed.build_initial_url(resource, &self.vendor),
            RunMode::Replication => self.feed.build_replication_url(resource, &self.vendor, hwm.unwrap(), true),
        };

        // Step 5: iterate pages, routing each record to its processor.
        let mut pages = iterate_pages(&self.feed, initial_url, run.run_id);
        let mut committed_any = false;
        let mut cycle_error: Option<String> = None;
        let mut latencies = Vec::new();
        let mut cycle_stats = crate::models::RecordStats::default();

        'pages: loop {
            let Some((page_result, row)) = pages.next().await else { break };
            self.store.append_request_log(&row).await.ok();
            latencies.push(row.elapsed_ms as f64);

            let page = match page_result {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "cycle page fetch failed");
                    *run.error_histogram.entry(row.status.unwrap_or(0)).or_insert(0) += 1;
                    // Only errors §7 classifies as cycle-aborting (RateLimited, ApiError)
                    // mark the run partial/failed; anything else is logged and the
                    // iteration (already exhausted by the page iterator) simply ends.
                    if e.aborts_cycle() {
                        cycle_error = Some(e.to_string());
                    }
                    break 'pages;
                }
            };

            run.counts.records_received += page.records.len() as u64;
            run.counts.request_count += 1;
            run.counts.request_bytes += page.bytes;

            for record in &page.records {
                if let Some(key) = record.get(key_field(resource)).and_then(|v| v.as_str()) {
                    if !dedup_keys.is_empty() && dedup_keys.remove(key) {
                        continue;
                    }
                }

                let flags = ProcessFlags { is_initial_import: mode == RunMode::InitialImport, run_id: run.run_id };
                match dispatch(resource, ctx, record, &self.vendor, flags).await {
                    Ok((stats, modification_ts)) => {
                        cycle_stats.merge(stats);
                        run.hwm_end = Some(run.hwm_end.map_or(modification_ts, |cur| cur.max(modification_ts)));
                        committed_any = true;
                    }
                    Err(e) => {
                        // Per-record errors are logged and swallowed (§4.F step 5).
                        warn!(error = %e, "record processing failed, skipping");
                    }
                }
            }
        }

        run.counts.records_inserted += cycle_stats.inserted;
        run.counts.records_updated += cycle_stats.updated;
        run.counts.records_deleted += cycle_stats.deleted;
        run.counts.media_downloaded += cycle_stats.media_queued;
        run.counts.media_deleted += cycle_stats.media_deleted;
        run.counts.media_bytes += cycle_stats.media_bytes;

        // Step 6: finalize.
        run.status = if cycle_error.is_none() {
            RunStatus::Completed
        } else if committed_any {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };
        run.error_message = cycle_error;
        run.completed_at = Some(Utc::now());
        if !latencies.is_empty() {
            run.avg_latency_ms = Some(latencies.iter().sum::<f64>() / latencies.len() as f64);
        }
        self.store.finalize_run(&run).await?;

        // Step 7: post-cycle, listing cycles only, best-effort.
        if resource == Resource::Listing {
            let _ = self.store.refresh_listing_view().await;
        }

        Ok(run)
    }
}

fn key_field(resource: Resource) -> &'static str {
    match resource {
        Resource::Listing => "ListingKey",
        Resource::Member => "MemberKey",
        Resource::Office => "OfficeKey",
        Resource::OpenHouse => "OpenHouseKey",
        Resource::Lookup => "LookupKey",
    }
}

async fn dispatch(
    resource: Resource,
    ctx: &ProcessorContext,
    record: &serde_json::Value,
    vendor: &str,
    flags: ProcessFlags,
) -> crate::error::Result<(crate::models::RecordStats, chrono::DateTime<Utc>)> {
    let modification_ts = record
        .get("ModificationTimestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let stats = match resource {
        Resource::Listing => {
            let outcome = processor::listing::process(ctx, record, flags).await?;
            return Ok((outcome.stats, outcome.modification_ts));
        }
        Resource::Member => processor::member_office::process_member(ctx, record, flags).await?,
        Resource::Office => processor::member_office::process_office(ctx, record, flags).await?,
        Resource::OpenHouse => processor::open_house::process(ctx, record).await?,
        Resource::Lookup => processor::lookup::process(ctx, record, vendor).await?,
    };
    Ok((stats, modification_ts))
}
