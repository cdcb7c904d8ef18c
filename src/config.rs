//! Process configuration (§6).
//!
//! All fields are env-var driven, matching the teacher's `Config::from_env`
//! convention; validation is eager and fails fast at startup.

use anyhow::{bail, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub feed_base_url: String,
    pub feed_token: String,
    pub originating_system: String,

    /// Opaque connection string for the out-of-scope relational store;
    /// the core never parses it, only forwards it to the store collaborator.
    pub database_url: String,
    pub database_pool_size: u32,

    pub object_store_endpoint: String,
    pub object_store_bucket: String,
    pub object_store_access_key: String,
    pub object_store_secret_key: String,
    pub public_domain: String,

    pub media_concurrency: usize,
    pub media_bandwidth_soft_cap_gib: f64,
    pub media_bandwidth_hard_cap_gib: f64,

    pub cadence_listing_secs: u64,
    pub cadence_member_secs: u64,
    pub cadence_office_secs: u64,
    pub cadence_open_house_secs: u64,
    pub cadence_lookup_secs: u64,

    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let feed_base_url = require_env("FEED_BASE_URL")?;
        let feed_token = require_env("FEED_TOKEN")?;
        let originating_system = env_or("ORIGINATING_SYSTEM", "VENDOR_MLS");

        let database_url = require_env("DATABASE_URL")?;
        let database_pool_size = env_parse_or("DATABASE_POOL_SIZE", 10);

        let object_store_endpoint = require_env("OBJECT_STORE_ENDPOINT")?;
        let object_store_bucket = require_env("OBJECT_STORE_BUCKET")?;
        let object_store_access_key = require_env("OBJECT_STORE_ACCESS_KEY")?;
        let object_store_secret_key = require_env("OBJECT_STORE_SECRET_KEY")?;
        let public_domain = require_env("PUBLIC_DOMAIN")?;

        let media_concurrency = env_parse_or("MEDIA_CONCURRENCY", 15usize);
        let media_bandwidth_soft_cap_gib = env_parse_or("MEDIA_BANDWIDTH_SOFT_CAP_GIB", 3.5);
        let media_bandwidth_hard_cap_gib = env_parse_or("MEDIA_BANDWIDTH_HARD_CAP_GIB", 4.0);

        let cadence_listing_secs = env_parse_or("CADENCE_LISTING_SECS", 60);
        let cadence_member_secs = env_parse_or("CADENCE_MEMBER_SECS", 300);
        let cadence_office_secs = env_parse_or("CADENCE_OFFICE_SECS", 300);
        let cadence_open_house_secs = env_parse_or("CADENCE_OPEN_HOUSE_SECS", 300);
        let cadence_lookup_secs = env_parse_or("CADENCE_LOOKUP_SECS", 86_400);

        let log_level = env_or("LOG_LEVEL", "info");

        let cfg = Self {
            feed_base_url,
            feed_token,
            originating_system,
            database_url,
            database_pool_size,
            object_store_endpoint,
            object_store_bucket,
            object_store_access_key,
            object_store_secret_key,
            public_domain,
            media_concurrency,
            media_bandwidth_soft_cap_gib,
            media_bandwidth_hard_cap_gib,
            cadence_listing_secs,
            cadence_member_secs,
            cadence_office_secs,
            cadence_open_house_secs,
            cadence_lookup_secs,
            log_level,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.feed_base_url.is_empty() {
            bail!("FEED_BASE_URL must not be empty");
        }
        if self.feed_token.is_empty() {
            bail!("FEED_TOKEN must not be empty");
        }
        if self.database_pool_size == 0 {
            bail!("DATABASE_POOL_SIZE must be > 0");
        }
        if self.media_concurrency == 0 {
            bail!("MEDIA_CONCURRENCY must be > 0");
        }
        if self.media_bandwidth_soft_cap_gib <= 0.0
            || self.media_bandwidth_soft_cap_gib > self.media_bandwidth_hard_cap_gib
        {
            bail!("MEDIA_BANDWIDTH_SOFT_CAP_GIB must be > 0 and <= hard cap");
        }
        for (name, secs) in [
            ("CADENCE_LISTING_SECS", self.cadence_listing_secs),
            ("CADENCE_MEMBER_SECS", self.cadence_member_secs),
            ("CADENCE_OFFICE_SECS", self.cadence_office_secs),
            ("CADENCE_OPEN_HOUSE_SECS", self.cadence_open_house_secs),
            ("CADENCE_LOOKUP_SECS", self.cadence_lookup_secs),
        ] {
            if secs == 0 {
                bail!("{name} must be > 0");
            }
        }
        Ok(())
    }

    pub fn media_bandwidth_soft_cap_bytes(&self) -> u64 {
        (self.media_bandwidth_soft_cap_gib * 1024.0 * 1024.0 * 1024.0) as u64
    }

    pub fn media_bandwidth_hard_cap_bytes(&self) -> u64 {
        (self.media_bandwidth_hard_cap_gib * 1024.0 * 1024.0 * 1024.0) as u64
    }

    pub fn cadence(&self, resource: crate::models::Resource) -> Duration {
        use crate::models::Resource::*;
        let secs = match resource {
            Listing => self.cadence_listing_secs,
            Member => self.cadence_member_secs,
            Office => self.cadence_office_secs,
            OpenHouse => self.cadence_open_house_secs,
            Lookup => self.cadence_lookup_secs,
        };
        Duration::from_secs(secs)
    }
}

fn require_env(key: &str) -> Result<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(v),
        _ => bail!("missing required environment variable {key}"),
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_required_env() {
        std::env::set_var("FEED_BASE_URL", "https://feed.example.test/odata");
        std::env::set_var("FEED_TOKEN", "test-token");
        std::env::set_var("DATABASE_URL", "postgres://localhost/test");
        std::env::set_var("OBJECT_STORE_ENDPOINT", "https://store.example.test");
        std::env::set_var("OBJECT_STORE_BUCKET", "media");
        std::env::set_var("OBJECT_STORE_ACCESS_KEY", "key");
        std::env::set_var("OBJECT_STORE_SECRET_KEY", "secret");
        std::env::set_var("PUBLIC_DOMAIN", "media.example.test");
    }

    #[test]
    fn defaults_applied_when_unset() {
        set_required_env();
        std::env::remove_var("MEDIA_CONCURRENCY");
        std::env::remove_var("CADENCE_LISTING_SECS");
        let cfg = Config::from_env().expect("config should load");
        assert_eq!(cfg.media_concurrency, 15);
        assert_eq!(cfg.cadence_listing_secs, 60);
        assert_eq!(cfg.cadence_lookup_secs, 86_400);
    }

    #[test]
    fn rejects_empty_feed_token() {
        set_required_env();
        std::env::set_var("FEED_TOKEN", "");
        assert!(Config::from_env().is_err());
        std::env::set_var("FEED_TOKEN", "test-token");
    }

    #[test]
    fn rejects_soft_cap_above_hard_cap() {
        set_required_env();
        std::env::set_var("MEDIA_BANDWIDTH_SOFT_CAP_GIB", "10");
        std::env::set_var("MEDIA_BANDWIDTH_HARD_CAP_GIB", "4");
        assert!(Config::from_env().is_err());
        std::env::remove_var("MEDIA_BANDWIDTH_SOFT_CAP_GIB");
        std::env::remove_var("MEDIA_BANDWIDTH_HARD_CAP_GIB");
    }
}
