use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_BASE_URL: &str = "https://theresanaiforthat.com";
const CONFIG_FILE: &str = "taaft_sync";
const ENV_PREFIX: &str = "TAAFT";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub site: SiteSettings,
    pub crawl: CrawlSettings,
    pub store: StoreSettings,
    pub paths: PathSettings,
    pub checks: CheckSettings,
    #[serde(default)]
    pub spider_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteSettings {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlSettings {
    pub max_retries: u32,
    pub stale_threshold: u32,
    pub max_scrolls: u32,
    pub scroll_pause_ms: u64,
    pub step_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_step_ms: u64,
    pub settle_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    pub table: String,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathSettings {
    pub cache: PathBuf,
    pub ledger: PathBuf,
    pub bad_ids: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckSettings {
    pub concurrency: usize,
    pub timeout_ms: u64,
}

impl CheckSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Resolved store endpoint + key.
#[derive(Debug, Clone)]
pub struct StoreCredentials {
    pub url: String,
    pub key: String,
}

impl Settings {
    /// Defaults, then `taaft_sync.toml` (optional), then `TAAFT_*` env,
    /// then the legacy `SUPABASE_*` / `SPIDER_API_KEY` variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(file: &Path) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("site.base_url", DEFAULT_BASE_URL)?
            .set_default("crawl.max_retries", 3)?
            .set_default("crawl.stale_threshold", 20)?
            .set_default("crawl.max_scrolls", 600)?
            .set_default("crawl.scroll_pause_ms", 2000)?
            .set_default("crawl.step_timeout_ms", 25_000)?
            .set_default("crawl.backoff_base_ms", 3000)?
            .set_default("crawl.backoff_step_ms", 2000)?
            .set_default("crawl.settle_ms", 2000)?
            .set_default("store.table", "tools")?
            .set_default("store.batch_size", 100)?
            .set_default("paths.cache", "data/crawled_tools.json")?
            .set_default("paths.ledger", "data/taaft.sqlite")?
            .set_default("paths.bad_ids", "data/bad_ids.json")?
            .set_default("checks.concurrency", 20)?
            .set_default("checks.timeout_ms", 5000)?
            .add_source(File::from(file.to_path_buf()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("store.url", legacy_var(&["SUPABASE_URL"]))?
            .set_override_option(
                "store.key",
                legacy_var(&["SUPABASE_KEY", "SUPABASE_SERVICE_KEY"]),
            )?
            .set_override_option("spider_api_key", legacy_var(&["SPIDER_API_KEY"]))?
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Store endpoint and key; missing values are fatal for store commands.
    pub fn store_credentials(&self) -> Result<StoreCredentials, ConfigError> {
        let url = non_empty(self.store.url.as_deref())
            .ok_or(ConfigError::MissingCredential("SUPABASE_URL"))?;
        let key = non_empty(self.store.key.as_deref())
            .ok_or(ConfigError::MissingCredential("SUPABASE_KEY"))?;
        Ok(StoreCredentials {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    pub fn spider_key(&self) -> Option<&str> {
        non_empty(self.spider_api_key.as_deref())
    }
}

fn legacy_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|n| env::var(n).ok())
        .find(|v| !v.trim().is_empty())
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}
