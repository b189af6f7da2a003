//! [`TargetCache`] – persisted list of discovered ping targets.
//!
//! The file holds `{"timestamp": <unix seconds>, "targets": [...]}`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default cache location.
pub const DEFAULT_CACHE_PATH: &str = "/tmp/icmp_nodes.json";

/// Default cache lifetime (12 h).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(12 * 3600);

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed cache: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    timestamp: f64,
    targets: Vec<String>,
}

/// Targets read back from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedTargets {
    /// Written less than one TTL ago.
    Fresh(Vec<String>),
    /// Older than the TTL; usable only as a fallback.
    Stale(Vec<String>),
}

impl CachedTargets {
    pub fn into_targets(self) -> Vec<String> {
        match self {
            Self::Fresh(t) | Self::Stale(t) => t,
        }
    }
}

/// JSON file cache with a time-to-live.
#[derive(Debug, Clone)]
pub struct TargetCache {
    path: PathBuf,
    ttl: Duration,
}

impl Default for TargetCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_PATH, DEFAULT_CACHE_TTL)
    }
}

impl TargetCache {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cache and classify it against `now`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Io`] when the file is absent or unreadable,
    /// [`CacheError::Malformed`] when it does not parse.
    pub fn load(&self, now: DateTime<Utc>) -> Result<CachedTargets, CacheError> {
        let raw = fs::read_to_string(&self.path)?;
        let file: CacheFile = serde_json::from_str(&raw)?;
        let age = unix_seconds(now) - file.timestamp;
        if age > self.ttl.as_secs_f64() {
            Ok(CachedTargets::Stale(file.targets))
        } else {
            Ok(CachedTargets::Fresh(file.targets))
        }
    }

    /// Overwrite the cache with `targets` stamped at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Io`] when the file cannot be written.
    pub fn store(&self, targets: &[String], now: DateTime<Utc>) -> Result<(), CacheError> {
        let body = serde_json::to_string(&CacheFile {
            timestamp: unix_seconds(now),
            targets: targets.to_vec(),
        })?;
        fs::write(&self.path, body)?;
        Ok(())
    }
}

fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}
