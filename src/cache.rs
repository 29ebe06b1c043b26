//! On-disk content cache shared by every render worker.
//!
//! Remote diagram rendering is the slow part of a build: every fence is an
//! HTTP round trip. This cache lets a processor skip the request when the
//! same diagram source was rendered before, in this build or an earlier one.
//!
//! # Keys
//!
//! The cache is **content-addressed**. A key is the SHA-256 of a namespace
//! plus every input that affects the output (diagram kind, source, endpoint),
//! so editing a diagram or switching endpoints is a miss without any explicit
//! invalidation.
//!
//! # Concurrency
//!
//! Several workers open the same directory at once. Writes go to a temporary
//! file inside the cache directory which is then atomically persisted under
//! its key, so readers only ever see complete entries. Two workers missing on
//! the same key both compute it and the last rename wins; both values are
//! identical by construction.
//!
//! # Layout
//!
//! ```text
//! .stagepress-cache/
//! ├── 3f/3fa9…e1.txt
//! └── c0/c07b…42.txt
//! ```

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

/// Version folded into every key. Bump to orphan all existing entries.
const CACHE_VERSION: u32 = 1;

/// A content hash identifying one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash a namespace and its inputs into a key.
    ///
    /// Parts are length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
    pub fn new(namespace: &str, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(CACHE_VERSION.to_le_bytes());
        hasher.update(namespace.as_bytes());
        hasher.update(b"\0");
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle on a cache directory. Cheap to open once per worker.
#[derive(Debug)]
pub struct ContentCache {
    dir: PathBuf,
    hits: AtomicU32,
    misses: AtomicU32,
}

impl ContentCache {
    /// Open (and create) the cache directory.
    pub fn open(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            hits: AtomicU32::new(0),
            misses: AtomicU32::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let k = key.as_str();
        self.dir.join(&k[..2]).join(format!("{k}.txt"))
    }

    /// Look up an entry, counting the hit or miss.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        match std::fs::read_to_string(self.entry_path(key)) {
            Ok(content) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(content)
            }
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store an entry atomically.
    pub fn put(&self, key: &CacheKey, content: &str) -> io::Result<()> {
        let path = self.entry_path(key);
        let shard = path.parent().unwrap_or(&self.dir);
        std::fs::create_dir_all(shard)?;
        let mut tmp = tempfile::NamedTempFile::new_in(shard)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// A failed store is logged and otherwise ignored; the computed value is
    /// still returned.
    pub fn get_or_insert_with<E>(
        &self,
        key: &CacheKey,
        compute: impl FnOnce() -> Result<String, E>,
    ) -> Result<String, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = compute()?;
        if let Err(e) = self.put(key, &value) {
            tracing::debug!(key = %key, error = %e, "Failed to write cache entry");
        }
        Ok(value)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Summary of cache performance for one worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
}

impl CacheStats {
    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits > 0 {
            write!(
                f,
                "{} cached, {} rendered ({} total)",
                self.hits,
                self.misses,
                self.total()
            )
        } else {
            write!(f, "{} rendered", self.misses)
        }
    }
}
