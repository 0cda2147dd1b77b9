// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::source::PaginationStrategy;

pub const ENV_CONFIG_PATH: &str = "FEED_CONFIG_PATH";
pub const ENV_BASE_URL: &str = "FEED_BASE_URL";
pub const ENV_PAGE_SIZE: &str = "FEED_PAGE_SIZE";
pub const ENV_STRATEGY: &str = "FEED_STRATEGY";

/// Upper bound the feed API enforces on `size`.
pub const MAX_PAGE_SIZE: u32 = 50;
pub const MAX_RETRIES: u8 = 10;

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}
fn default_feed_path() -> String {
    "/feed".to_string()
}
fn default_cursor_path() -> String {
    "/feed/since".to_string()
}
fn default_create_path() -> String {
    "/tweets".to_string()
}
fn default_page_size() -> u32 {
    10
}
fn default_refresh_interval_secs() -> u64 {
    30
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    4
}
fn default_max_retries() -> u8 {
    2
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_feed_path")]
    pub feed_path: String,
    #[serde(default = "default_cursor_path")]
    pub cursor_path: String,
    #[serde(default = "default_create_path")]
    pub create_path: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub strategy: PaginationStrategy,
    /// 0 disables the auto-refresh ticker.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Extra attempts for network failures only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            feed_path: default_feed_path(),
            cursor_path: default_cursor_path(),
            create_path: default_create_path(),
            page_size: default_page_size(),
            strategy: PaginationStrategy::default(),
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl FeedConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading feed config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing feed config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Resolve config using env var + fallbacks, then apply env overrides:
    /// 1) $FEED_CONFIG_PATH
    /// 2) config/feed.toml
    /// 3) config/feed.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        let base = Self::load_file_default()?;
        base.with_env_overrides()
    }

    fn load_file_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/feed.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/feed.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            if !url.trim().is_empty() {
                self.base_url = url.trim().to_string();
            }
        }
        if let Ok(size) = std::env::var(ENV_PAGE_SIZE) {
            self.page_size = size
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PAGE_SIZE} must be a positive integer"))?;
        }
        if let Ok(s) = std::env::var(ENV_STRATEGY) {
            self.strategy = s.parse()?;
        }
        Ok(self.sanitized())
    }

    /// Clamp values into what the feed API accepts.
    pub fn sanitized(mut self) -> Self {
        self.page_size = self.page_size.clamp(1, MAX_PAGE_SIZE);
        self.max_retries = self.max_retries.min(MAX_RETRIES);
        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
        for p in [
            &mut self.feed_path,
            &mut self.cursor_path,
            &mut self.create_path,
        ] {
            if !p.starts_with('/') {
                p.insert(0, '/');
            }
        }
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<FeedConfig> {
    if hint_ext == "json" {
        if let Ok(v) = serde_json::from_str(s) {
            return Ok(v);
        }
        return toml::from_str(s).map_err(|e| anyhow!("unsupported feed config format: {e}"));
    }
    match toml::from_str(s) {
        Ok(v) => Ok(v),
        Err(toml_err) => serde_json::from_str(s)
            .map_err(|_| anyhow!("unsupported feed config format: {toml_err}")),
    }
}
