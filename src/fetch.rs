//! Page fetching with an on-disk cache.
//!
//! The only asynchronous part of the system. Fetched HTML is buffered and
//! handed to the single-threaded parser whole; re-runs read the cache
//! unless forced, so a festival site is hit once per page per edition.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{Result, ScraperError};

/// Source of raw page text, keyed by URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get(&self, url: &str) -> Result<String>;
}

/// Cache file name: sha256 of the URL, content stored verbatim.
fn cache_file_name(url: &str) -> String {
    format!("{}.html", hex::encode(Sha256::digest(url.as_bytes())))
}

/// Fetches over HTTP, reading and writing the cache directory.
pub struct CachingFetcher {
    client: reqwest::Client,
    cache_dir: PathBuf,
    force: bool,
}

impl CachingFetcher {
    pub fn new(cache_dir: impl Into<PathBuf>, force: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            cache_dir: cache_dir.into(),
            force,
        }
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(cache_file_name(url))
    }
}

#[async_trait]
impl PageSource for CachingFetcher {
    async fn get(&self, url: &str) -> Result<String> {
        let path = self.cache_path(url);
        if !self.force {
            if let Ok(cached) = fs::read_to_string(&path).await {
                debug!(url, "serving page from cache");
                return Ok(cached);
            }
        }
        info!(url, "fetching page");
        let text = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        fs::create_dir_all(&self.cache_dir).await?;
        fs::write(&path, &text).await?;
        Ok(text)
    }
}

/// Offline source reading only a previously warmed cache directory.
pub struct DirPageSource {
    cache_dir: PathBuf,
}

impl DirPageSource {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Seed a page into the directory, for tests and manual fixtures.
    pub fn seed(cache_dir: &Path, url: &str, html: &str) -> Result<()> {
        std::fs::create_dir_all(cache_dir)?;
        std::fs::write(cache_dir.join(cache_file_name(url)), html)?;
        Ok(())
    }
}

#[async_trait]
impl PageSource for DirPageSource {
    async fn get(&self, url: &str) -> Result<String> {
        let path = self.cache_dir.join(cache_file_name(url));
        match fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(_) => Err(ScraperError::CacheMiss(url.to_string())),
        }
    }
}
