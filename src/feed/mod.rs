//! Module B: feed client (§4.B).

pub mod client;
pub mod url;

pub use client::{is_expired, url_expires_at, FeedClient, MediaBytes, Page};

use crate::error::Result;
use crate::models::RequestLogRow;
use uuid::Uuid;

/// Drives repeated `fetch_page` calls following `@odata.nextLink`, yielding
/// one page at a time so the cycle driver can process records incrementally
/// instead of buffering an entire replication run in memory.
pub struct PageIterator<'a> {
    client: &'a FeedClient,
    run_id: Uuid,
    next_url: Option<String>,
    done: bool,
}

impl<'a> PageIterator<'a> {
    pub fn new(client: &'a FeedClient, initial_url: String, run_id: Uuid) -> Self {
        Self { client, run_id, next_url: Some(initial_url), done: false }
    }

    /// Returns `None` once iteration is exhausted or has previously errored.
    pub async fn next(&mut self) -> Option<(Result<Page>, RequestLogRow)> {
        if self.done {
            return None;
        }
        let url = self.next_url.take()?;
        let (result, row) = self.client.fetch_page(&url, self.run_id).await;
        match &result {
            Ok(page) => {
                self.next_url = page.next_link.clone();
                if self.next_url.is_none() {
                    self.done = true;
                }
            }
            Err(_) => self.done = true,
        }
        Some((result, row))
    }
}

pub fn iterate_pages<'a>(client: &'a FeedClient, initial_url: String, run_id: Uuid) -> PageIterator<'a> {
    PageIterator::new(client, initial_url, run_id)
}
