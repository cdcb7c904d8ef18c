//! Two-dimension admission control shared by the feed client and the media
//! downloader (§4.A). One process-wide instance, handed out as an `Arc`.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

const API_HARD_1S: usize = 2;
const API_HARD_1H: usize = 7_200;
const API_HARD_24H: usize = 40_000;

const API_SOFT_1S: usize = 1; // spec's fractional 1.5 rounds down to the first in-window event
const API_SOFT_1H: usize = 6_000;
const API_SOFT_24H: usize = 35_000;

const DELAY_SOFT_1S: Duration = Duration::from_millis(200);
const DELAY_SOFT_1H: Duration = Duration::from_secs(2);
const DELAY_SOFT_24H: Duration = Duration::from_secs(5);

const MEDIA_WINDOW: Duration = Duration::from_secs(60 * 60);
const MEDIA_SOFT_PAUSE: Duration = Duration::from_secs(10);

/// Snapshot of current admission state, exported to the out-of-scope
/// health/dashboard surface (§3a, §4.A "Stats").
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterStats {
    pub api_count_1s: usize,
    pub api_count_1h: usize,
    pub api_count_24h: usize,
    pub api_pct_of_cap_1h: f64,
    pub media_bytes_window: u64,
    pub media_pct_of_cap: f64,
}

struct ApiSeries {
    events: VecDeque<Instant>,
}

impl ApiSeries {
    fn new() -> Self {
        Self { events: VecDeque::new() }
    }

    fn prune(&mut self, now: Instant) {
        let cutoff = now.checked_sub(Duration::from_secs(24 * 60 * 60)).unwrap_or(now);
        while self.events.front().is_some_and(|t| *t < cutoff) {
            self.events.pop_front();
        }
    }

    fn count_since(&self, now: Instant, window: Duration) -> usize {
        let cutoff = now.checked_sub(window).unwrap_or(now);
        self.events.iter().rev().take_while(|t| **t >= cutoff).count()
    }

    /// Minimum wait before another event would be admitted, per §4.A's
    /// escalating soft-cap delays and hard caps.
    fn wait_for(&self, now: Instant) -> Duration {
        let c1s = self.count_since(now, Duration::from_secs(1));
        let c1h = self.count_since(now, Duration::from_secs(60 * 60));
        let c24h = self.count_since(now, Duration::from_secs(24 * 60 * 60));

        if c1s >= API_HARD_1S {
            return self.hard_wait(now, Duration::from_secs(1));
        }
        if c1h >= API_HARD_1H {
            return self.hard_wait(now, Duration::from_secs(60 * 60));
        }
        if c24h >= API_HARD_24H {
            return self.hard_wait(now, Duration::from_secs(24 * 60 * 60));
        }

        let mut wait = Duration::ZERO;
        if c1s >= API_SOFT_1S {
            wait = wait.max(DELAY_SOFT_1S);
        }
        if c1h >= API_SOFT_1H {
            wait = wait.max(DELAY_SOFT_1H);
        }
        if c24h >= API_SOFT_24H {
            wait = wait.max(DELAY_SOFT_24H);
        }
        wait
    }

    /// Wait until the oldest event within `window` falls out of it.
    fn hard_wait(&self, now: Instant, window: Duration) -> Duration {
        let cutoff = now.checked_sub(window).unwrap_or(now);
        match self.events.iter().find(|t| **t >= cutoff) {
            Some(oldest) => (*oldest + window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn record(&mut self, now: Instant) {
        self.events.push_back(now);
    }
}

struct MediaSeries {
    events: VecDeque<(Instant, u64)>,
    soft_cap: u64,
    hard_cap: u64,
}

impl MediaSeries {
    fn new(soft_cap: u64, hard_cap: u64) -> Self {
        Self { events: VecDeque::new(), soft_cap, hard_cap }
    }

    fn prune(&mut self, now: Instant) {
        let cutoff = now.checked_sub(MEDIA_WINDOW).unwrap_or(now);
        while self.events.front().is_some_and(|(t, _)| *t < cutoff) {
            self.events.pop_front();
        }
    }

    fn bytes_in_window(&self) -> u64 {
        self.events.iter().map(|(_, b)| b).sum()
    }

    fn wait_for(&self, now: Instant) -> Duration {
        let bytes = self.bytes_in_window();
        if bytes >= self.hard_cap {
            let cutoff = now.checked_sub(MEDIA_WINDOW).unwrap_or(now);
            return match self.events.iter().find(|(t, _)| *t >= cutoff) {
                Some((oldest, _)) => (*oldest + MEDIA_WINDOW).saturating_duration_since(now),
                None => Duration::ZERO,
            };
        }
        if bytes >= self.soft_cap {
            return MEDIA_SOFT_PAUSE;
        }
        Duration::ZERO
    }

    fn record(&mut self, now: Instant, bytes: u64) {
        self.events.push_back((now, bytes));
    }
}

/// Shared admission singleton (§4.A). Cheap to clone — wrap in `Arc` at the
/// call sites that need shared ownership across tasks.
pub struct RateLimiter {
    api: Mutex<ApiSeries>,
    media: Mutex<MediaSeries>,
}

impl RateLimiter {
    pub fn new(media_soft_cap_bytes: u64, media_hard_cap_bytes: u64) -> Self {
        Self {
            api: Mutex::new(ApiSeries::new()),
            media: Mutex::new(MediaSeries::new(media_soft_cap_bytes, media_hard_cap_bytes)),
        }
    }

    /// Seeds the API series from recent request logs and the media series
    /// from recent completed downloads, so a restart doesn't forget recent
    /// usage (§4.A "Recovery from restart").
    pub fn seed(&self, api_events: impl IntoIterator<Item = Instant>, media_events: impl IntoIterator<Item = (Instant, u64)>) {
        let now = Instant::now();
        {
            let mut api = self.api.lock();
            api.events.extend(api_events);
            api.prune(now);
        }
        {
            let mut media = self.media.lock();
            media.events.extend(media_events);
            media.prune(now);
        }
    }

    /// Blocks the caller until an API-series slot is admitted, then records
    /// the event before returning. Internally serialized — callers never
    /// race each other for the same slot (§4.A admission protocol).
    pub async fn admit_api(&self) {
        loop {
            let wait = {
                let mut api = self.api.lock();
                let now = Instant::now();
                api.prune(now);
                let wait = api.wait_for(now);
                if wait.is_zero() {
                    api.record(now);
                    return;
                }
                wait
            };
            debug!(wait_ms = wait.as_millis() as u64, "api rate limit: waiting");
            sleep(wait).await;
        }
    }

    /// Blocks until the media series has headroom. Does not itself record
    /// bytes — the caller records the actual downloaded size afterward via
    /// [`RateLimiter::record_media_bytes`], since the size isn't known until
    /// the download completes (§4.A: "overestimation is impossible").
    pub async fn admit_media(&self) {
        loop {
            let wait = {
                let mut media = self.media.lock();
                let now = Instant::now();
                media.prune(now);
                media.wait_for(now)
            };
            if wait.is_zero() {
                return;
            }
            debug!(wait_ms = wait.as_millis() as u64, "media rate limit: waiting");
            sleep(wait).await;
        }
    }

    pub fn record_media_bytes(&self, bytes: u64) {
        let mut media = self.media.lock();
        media.record(Instant::now(), bytes);
    }

    pub fn stats(&self) -> RateLimiterStats {
        let now = Instant::now();
        let api = self.api.lock();
        let media = self.media.lock();
        let media_bytes = media.bytes_in_window();
        RateLimiterStats {
            api_count_1s: api.count_since(now, Duration::from_secs(1)),
            api_count_1h: api.count_since(now, Duration::from_secs(60 * 60)),
            api_count_24h: api.count_since(now, Duration::from_secs(24 * 60 * 60)),
            api_pct_of_cap_1h: api.count_since(now, Duration::from_secs(60 * 60)) as f64 / API_HARD_1H as f64 * 100.0,
            media_bytes_window: media_bytes,
            media_pct_of_cap: media_bytes as f64 / media.hard_cap as f64 * 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_under_cap_without_waiting() {
        let limiter = RateLimiter::new(1024, 2048);
        let start = Instant::now();
        limiter.admit_api().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn second_call_within_one_second_waits() {
        let limiter = RateLimiter::new(1024, 2048);
        limiter.admit_api().await;
        limiter.admit_api().await;
        let start = Instant::now();
        limiter.admit_api().await;
        assert!(start.elapsed() >= DELAY_SOFT_1S || start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn media_hard_cap_blocks_until_window_frees() {
        let limiter = RateLimiter::new(100, 200);
        limiter.record_media_bytes(150);
        limiter.record_media_bytes(150);
        let stats = limiter.stats();
        assert!(stats.media_bytes_window >= 200);
    }

    #[test]
    fn seed_restores_recent_usage() {
        let limiter = RateLimiter::new(1024, 2048);
        let now = Instant::now();
        limiter.seed(vec![now], vec![(now, 512)]);
        let stats = limiter.stats();
        assert_eq!(stats.api_count_24h, 1);
        assert_eq!(stats.media_bytes_window, 512);
    }
}
