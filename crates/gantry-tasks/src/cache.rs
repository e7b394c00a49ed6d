//! Content-addressable result cache

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use gantry_core::config::CacheConfig;

/// Upper bound on how far below `max_entries` an eviction pass shrinks the store
const EVICTION_MARGIN: usize = 100;

/// Suffix of records being written; renamed to `.json` once complete
const TMP_SUFFIX: &str = ".json.tmp";

/// Cache key: SHA-256 over task name, input and the sorted dependency list
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Compute a cache key. Dependency order does not affect the result.
    pub fn compute<S: AsRef<str>>(task_name: &str, input: &str, dependencies: &[S]) -> Self {
        let mut sorted: Vec<&str> = dependencies.iter().map(AsRef::as_ref).collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(task_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(input.as_bytes());
        hasher.update(b"\0");
        hasher.update(sorted.join(",").as_bytes());

        CacheKey(format!("{:x}", hasher.finalize()))
    }

    /// Abbreviated form for log output
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest(data: &str) -> String {
    format!("{:x}", Sha256::digest(data.as_bytes()))
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// A cached task outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key
    pub key: CacheKey,
    /// Task that produced the result
    pub task_name: String,
    /// SHA-256 of the task input
    pub input_hash: String,
    /// SHA-256 of the task output
    pub output_hash: String,
    /// Creation time in unix milliseconds
    pub timestamp_ms: i64,
    /// Dependency task names, sorted
    pub dependencies: Vec<String>,
    /// Files checked for modification on lookup
    pub file_dependencies: Vec<PathBuf>,
    /// Whether the task succeeded
    pub success: bool,
    /// Structured result data, if the task produced any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<serde_json::Value>,
}

impl CacheEntry {
    /// When this entry was created
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp_ms)
    }

    /// Time since the entry was created
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_ms().saturating_sub(self.timestamp_ms).max(0) as u64)
    }

    fn is_expired(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    /// First file dependency that is missing or newer than the entry, if any
    fn stale_file(&self) -> Option<&Path> {
        self.file_dependencies
            .iter()
            .find(|path| match fs::metadata(path).and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified).timestamp_millis() > self.timestamp_ms,
                Err(_) => true,
            })
            .map(PathBuf::as_path)
    }
}

/// Options for opening a result cache
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Directory holding one JSON record per key
    pub dir: PathBuf,
    /// Entries older than this are treated as misses
    pub max_age: Duration,
    /// Entry count that triggers eviction
    pub max_entries: usize,
}

impl CacheOptions {
    /// Options with default limits
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let defaults = CacheConfig::default();
        Self {
            dir: dir.into(),
            max_age: defaults.max_age(),
            max_entries: defaults.max_entries,
        }
    }

    /// Build options from configuration and a resolved directory
    pub fn from_config(config: &CacheConfig, dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_age: config.max_age(),
            max_entries: config.max_entries.max(1),
        }
    }

    /// Set the maximum entry age
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Set the eviction threshold
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

enum Validity {
    Fresh(CacheEntry),
    Absent,
    Stale(&'static str, CacheEntry),
}

/// Content-addressable result cache.
///
/// Entries live in memory behind a mutex and are mirrored to disk as
/// `<key>.json`. Validity against TTL and file modification times is checked
/// at lookup.
#[derive(Debug)]
pub struct ResultCache {
    options: CacheOptions,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResultCache {
    /// Open a cache directory, loading existing records.
    ///
    /// Records that fail to parse are deleted and skipped.
    #[instrument(skip_all, fields(dir = %options.dir.display()))]
    pub fn open(options: CacheOptions) -> Result<Self, CacheError> {
        fs::create_dir_all(&options.dir)?;

        let mut entries = HashMap::new();
        let mut dropped = 0usize;

        for dirent in fs::read_dir(&options.dir)? {
            let path = dirent?.path();
            if !path.is_file() {
                continue;
            }
            if path.to_str().is_some_and(|p| p.ends_with(TMP_SUFFIX)) {
                debug!(path = %path.display(), "removing interrupted cache write");
                if let Err(e) = fs::remove_file(&path) {
                    debug!(path = %path.display(), error = %e, "failed to remove leftover temp file");
                }
                continue;
            }
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }

            match read_record(&path) {
                Ok(entry) => {
                    entries.insert(entry.key.clone(), entry);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "dropping corrupt cache record");
                    if let Err(e) = fs::remove_file(&path) {
                        debug!(path = %path.display(), error = %e, "failed to remove corrupt record");
                    }
                    dropped += 1;
                }
            }
        }

        info!(entries = entries.len(), dropped, "result cache loaded");

        Ok(Self {
            options,
            entries: Mutex::new(entries),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Create cache with default directory under a project root
    pub fn default_dir(root: &Path) -> Result<Self, CacheError> {
        Self::open(CacheOptions::new(root.join(".gantry").join("cache")))
    }

    /// Look up a cached result.
    ///
    /// Returns `None` when no entry exists, when it is older than `max_age`,
    /// or when a file dependency is missing or was modified after the entry
    /// was written. Stale entries are removed.
    pub fn get<S: AsRef<str>>(
        &self,
        task_name: &str,
        input: &str,
        dependencies: &[S],
    ) -> Option<CacheEntry> {
        let key = CacheKey::compute(task_name, input, dependencies);
        let candidate = self.lock().get(&key).cloned();

        let validity = match candidate {
            None => Validity::Absent,
            Some(entry) if entry.is_expired(self.options.max_age) => {
                Validity::Stale("expired", entry)
            }
            Some(entry) => match entry.stale_file() {
                Some(path) => {
                    debug!(task = task_name, file = %path.display(), "file dependency changed");
                    Validity::Stale("file dependency changed", entry)
                }
                None => Validity::Fresh(entry),
            },
        };

        match validity {
            Validity::Fresh(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(task = task_name, key = key.short(), "cache hit");
                Some(entry)
            }
            Validity::Absent => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(task = task_name, key = key.short(), "cache miss");
                None
            }
            Validity::Stale(reason, checked) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(task = task_name, key = key.short(), reason, "cache entry stale");
                self.discard_if_unchanged(&checked);
                None
            }
        }
    }

    /// Remove `checked` unless a `put` replaced it after it was read.
    /// Returns whether it was removed.
    fn discard_if_unchanged(&self, checked: &CacheEntry) -> bool {
        let mut entries = self.lock();
        let unchanged = entries.get(&checked.key).is_some_and(|current| {
            current.timestamp_ms == checked.timestamp_ms
                && current.output_hash == checked.output_hash
                && current.success == checked.success
        });

        if unchanged {
            entries.remove(&checked.key);
            self.remove_record(&checked.key);
        } else {
            debug!(key = checked.key.short(), "stale entry was replaced, keeping it");
        }
        unchanged
    }

    /// Store a task outcome, replacing any entry under the same key.
    ///
    /// Exceeding `max_entries` evicts the oldest entries until the store is
    /// back under the eviction margin.
    #[allow(clippy::too_many_arguments)]
    pub fn put<S: AsRef<str>>(
        &self,
        task_name: &str,
        input: &str,
        output: &str,
        dependencies: &[S],
        file_dependencies: &[PathBuf],
        success: bool,
        result_data: Option<serde_json::Value>,
    ) -> Result<CacheKey, CacheError> {
        let key = CacheKey::compute(task_name, input, dependencies);
        let mut deps: Vec<String> = dependencies.iter().map(|d| d.as_ref().to_string()).collect();
        deps.sort_unstable();

        let entry = CacheEntry {
            key: key.clone(),
            task_name: task_name.to_string(),
            input_hash: digest(input),
            output_hash: digest(output),
            timestamp_ms: now_ms(),
            dependencies: deps,
            file_dependencies: file_dependencies.to_vec(),
            success,
            result_data,
        };

        let mut entries = self.lock();
        self.write_record(&entry)?;
        entries.insert(key.clone(), entry);
        debug!(task = task_name, key = key.short(), success, "stored result in cache");

        let evicted = self.evict_excess(&mut entries, &key);
        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "evicted oldest cache entries");
            for key in &evicted {
                self.remove_record(key);
            }
        }
        drop(entries);

        Ok(key)
    }

    fn evict_excess(&self, entries: &mut HashMap<CacheKey, CacheEntry>, keep: &CacheKey) -> Vec<CacheKey> {
        let max = self.options.max_entries;
        if entries.len() <= max {
            return Vec::new();
        }

        let target = max - EVICTION_MARGIN.min(max / 10);
        let excess = entries.len() - target;

        let mut by_age: Vec<(i64, CacheKey)> = entries
            .values()
            .filter(|e| &e.key != keep)
            .map(|e| (e.timestamp_ms, e.key.clone()))
            .collect();
        by_age.sort();

        by_age
            .into_iter()
            .take(excess)
            .map(|(_, key)| {
                entries.remove(&key);
                key
            })
            .collect()
    }

    /// Remove entries produced by `task_name` and entries that depend on it.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate(&self, task_name: &str) -> usize {
        let removed = self.remove_where(|entry| {
            entry.task_name == task_name || entry.dependencies.iter().any(|d| d == task_name)
        });
        if removed > 0 {
            debug!(task = task_name, removed, "invalidated cache entries");
        }
        removed
    }

    /// Remove entries whose file dependencies include any of `changed`.
    pub fn invalidate_by_files<P: AsRef<Path>>(&self, changed: &[P]) -> usize {
        let removed = self.remove_where(|entry| {
            entry
                .file_dependencies
                .iter()
                .any(|f| changed.iter().any(|c| c.as_ref() == f.as_path()))
        });
        if removed > 0 {
            debug!(files = changed.len(), removed, "invalidated cache entries by file");
        }
        removed
    }

    /// Remove entries older than `max_age`
    pub fn prune(&self, max_age: Duration) -> PruneStats {
        info!(max_age_secs = max_age.as_secs(), "pruning cache");
        let total = self.len();
        let removed = self.remove_where(|entry| entry.is_expired(max_age));

        let stats = PruneStats {
            total,
            removed,
            kept: total - removed,
        };
        info!(total = stats.total, removed = stats.removed, kept = stats.kept, "cache prune complete");
        stats
    }

    /// Wipe every entry and its backing storage
    pub fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.lock();
        entries.clear();
        if self.options.dir.exists() {
            fs::remove_dir_all(&self.options.dir)?;
        }
        fs::create_dir_all(&self.options.dir)?;
        info!(dir = %self.options.dir.display(), "cache cleared");
        Ok(())
    }

    /// Get cache statistics
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.len();
        let mut size_on_disk = 0;

        if self.options.dir.exists() {
            for dirent in fs::read_dir(&self.options.dir)? {
                let dirent = dirent?;
                if let Ok(meta) = dirent.metadata() {
                    if meta.is_file() {
                        size_on_disk += meta.len();
                    }
                }
            }
        }

        let total_hits = self.hits.load(Ordering::Relaxed);
        let total_misses = self.misses.load(Ordering::Relaxed);
        let lookups = total_hits + total_misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            total_hits as f64 / lookups as f64 * 100.0
        };

        Ok(CacheStats {
            entries,
            size_on_disk,
            hit_rate,
            total_hits,
            total_misses,
        })
    }

    /// Number of entries held in memory
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Get the cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.options.dir
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records are deleted under the same lock `put` writes them under
    fn remove_where(&self, predicate: impl Fn(&CacheEntry) -> bool) -> usize {
        let mut entries = self.lock();
        let keys: Vec<CacheKey> = entries
            .values()
            .filter(|e| predicate(e))
            .map(|e| e.key.clone())
            .collect();

        for key in &keys {
            entries.remove(key);
            self.remove_record(key);
        }
        keys.len()
    }

    fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.options.dir.join(format!("{}.json", key.0))
    }

    fn write_record(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        fs::create_dir_all(&self.options.dir)?;
        let path = self.record_path(&entry.key);
        let tmp = path.with_extension(&TMP_SUFFIX[1..]);

        let json = serde_json::to_string_pretty(entry)?;
        let mut file = fs::File::create(&tmp)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove_record(&self, key: &CacheKey) {
        let path = self.record_path(key);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to remove cache record");
            }
        }
    }
}

fn read_record(path: &Path) -> Result<CacheEntry, CacheError> {
    let contents = fs::read_to_string(path)?;
    let entry: CacheEntry = serde_json::from_str(&contents)?;

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem != entry.key.0 {
        return Err(CacheError::KeyMismatch {
            file: stem.to_string(),
            key: entry.key.0,
        });
    }
    Ok(entry)
}

/// Statistics from a prune operation
#[derive(Debug, Default)]
pub struct PruneStats {
    /// Total entries found
    pub total: usize,
    /// Entries removed
    pub removed: usize,
    /// Entries kept
    pub kept: usize,
}

/// Cache statistics
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    /// Number of cache entries
    pub entries: usize,
    /// Total size of records on disk in bytes
    pub size_on_disk: u64,
    /// Percentage of lookups that were hits
    pub hit_rate: f64,
    /// Lookups that returned an entry
    pub total_hits: u64,
    /// Lookups that returned nothing
    pub total_misses: u64,
}

impl CacheStats {
    /// Format total size in human-readable form
    pub fn formatted_size(&self) -> String {
        if self.size_on_disk < 1024 {
            format!("{} B", self.size_on_disk)
        } else if self.size_on_disk < 1024 * 1024 {
            format!("{:.1} KB", self.size_on_disk as f64 / 1024.0)
        } else if self.size_on_disk < 1024 * 1024 * 1024 {
            format!("{:.1} MB", self.size_on_disk as f64 / (1024.0 * 1024.0))
        } else {
            format!(
                "{:.1} GB",
                self.size_on_disk as f64 / (1024.0 * 1024.0 * 1024.0)
            )
        }
    }
}

/// Cache errors
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// IO error
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Cache serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record's file name does not match the key it contains
    #[error("Cache record '{file}' holds key '{key}'")]
    KeyMismatch { file: String, key: String },
}
