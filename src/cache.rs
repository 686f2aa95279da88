//! Multi-level cache keyed by file path, with mtime validity and dependency
//! tracking.
//!
//! Five sub-caches: raw file text, parsed messages, named computations,
//! stat metadata, and the process snapshot. Each sits behind its own
//! shared-exclusive lock; no lock is held across I/O on the read path except
//! the stat that decides validity. Computations declare file dependencies and
//! are invalidated when any dep's mtime moves past the one recorded at store
//! time.

use crate::error::{LookoutError, Result};
use crate::parser::{self, ParsedLog};
use crate::process::ProcessInfo;
use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub file_ttl: Duration,
    pub parsed_ttl: Duration,
    pub computed_ttl: Duration,
    pub metadata_ttl: Duration,
    pub process_ttl: Duration,
    pub max_entries: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            file_ttl: Duration::from_secs(30),
            parsed_ttl: Duration::from_secs(15),
            computed_ttl: Duration::from_secs(10),
            metadata_ttl: Duration::from_secs(5),
            process_ttl: Duration::from_millis(500),
            max_entries: 512,
            sweep_interval: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
    pub files_invalidated: AtomicU64,
    pub computations_invalidated: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }

    fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
        self.files_invalidated.store(0, Ordering::Relaxed);
        self.computations_invalidated.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

struct FileEntry {
    text: Arc<String>,
    mtime: SystemTime,
    stored_at: Instant,
}

struct ParsedEntry {
    parsed: Arc<ParsedLog>,
    mtime: SystemTime,
    stored_at: Instant,
}

struct ComputedEntry {
    value: Arc<dyn Any + Send + Sync>,
    deps: Vec<(PathBuf, Option<SystemTime>)>,
    stored_at: Instant,
    ttl: Duration,
}

#[derive(Clone, Copy)]
pub struct FileStat {
    pub mtime: SystemTime,
    pub len: u64,
}

struct MetaEntry {
    stat: FileStat,
    stored_at: Instant,
}

pub struct DataCache {
    cfg: CacheConfig,
    files: RwLock<HashMap<PathBuf, FileEntry>>,
    parsed: RwLock<HashMap<PathBuf, ParsedEntry>>,
    computed: RwLock<HashMap<String, ComputedEntry>>,
    metadata: RwLock<HashMap<PathBuf, MetaEntry>>,
    processes: RwLock<Option<(Arc<Vec<ProcessInfo>>, Instant)>>,
    inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    pub stats: CacheStats,
}

fn stat_file(path: &Path) -> Result<FileStat> {
    let meta = std::fs::metadata(path).map_err(|e| LookoutError::FileUnavailable {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mtime = meta
        .modified()
        .map_err(|e| LookoutError::FileUnavailable {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(FileStat {
        mtime,
        len: meta.len(),
    })
}

fn mtime_of(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl DataCache {
    pub fn new(cfg: CacheConfig) -> Self {
        DataCache {
            cfg,
            files: RwLock::new(HashMap::new()),
            parsed: RwLock::new(HashMap::new()),
            computed: RwLock::new(HashMap::new()),
            metadata: RwLock::new(HashMap::new()),
            processes: RwLock::new(None),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    // -- file content ------------------------------------------------------

    /// Current file text. A cached entry is valid only while the on-disk
    /// mtime matches the one recorded at load time; a stat failure evicts
    /// every entry for the path and surfaces `FileUnavailable`.
    pub fn get_file_content(&self, path: &Path) -> Result<Arc<String>> {
        let stat = match stat_file(path) {
            Ok(s) => s,
            Err(e) => {
                self.invalidate_file(path);
                return Err(e);
            }
        };

        if let Some(entry) = self.files.read().unwrap().get(path) {
            if entry.mtime == stat.mtime {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.text.clone());
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let bytes = std::fs::read(path).map_err(|e| {
            self.invalidate_file(path);
            LookoutError::FileUnavailable {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        let text = Arc::new(String::from_utf8_lossy(&bytes).into_owned());

        self.files.write().unwrap().insert(
            path.to_path_buf(),
            FileEntry {
                text: text.clone(),
                mtime: stat.mtime,
                stored_at: Instant::now(),
            },
        );
        Ok(text)
    }

    // -- parsed messages ---------------------------------------------------

    /// Parsed messages for a log file, recomputed whenever the file content
    /// moves forward (cached mtime older than on-disk mtime).
    pub fn get_parsed(&self, path: &Path) -> Result<Arc<ParsedLog>> {
        let stat = match stat_file(path) {
            Ok(s) => s,
            Err(e) => {
                self.invalidate_file(path);
                return Err(e);
            }
        };

        if let Some(entry) = self.parsed.read().unwrap().get(path) {
            if stat.mtime <= entry.mtime {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.parsed.clone());
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let text = self.get_file_content(path)?;
        let parsed = Arc::new(parser::parse(&text));
        // Record the mtime that produced these bytes, not the pre-read stat:
        // the file may have been appended between the two calls.
        let mtime = self
            .files
            .read()
            .unwrap()
            .get(path)
            .map(|e| e.mtime)
            .unwrap_or(stat.mtime);

        self.parsed.write().unwrap().insert(
            path.to_path_buf(),
            ParsedEntry {
                parsed: parsed.clone(),
                mtime,
                stored_at: Instant::now(),
            },
        );
        Ok(parsed)
    }

    // -- stat metadata -----------------------------------------------------

    /// Cheap stat with a short wall-clock TTL, for callers that only need
    /// `lastModified` and can tolerate a few seconds of staleness.
    pub fn get_metadata(&self, path: &Path) -> Result<FileStat> {
        if let Some(entry) = self.metadata.read().unwrap().get(path) {
            if entry.stored_at.elapsed() <= self.cfg.metadata_ttl {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.stat);
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let stat = stat_file(path)?;
        self.metadata.write().unwrap().insert(
            path.to_path_buf(),
            MetaEntry {
                stat,
                stored_at: Instant::now(),
            },
        );
        Ok(stat)
    }

    // -- computations ------------------------------------------------------

    fn lookup_computed<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let map = self.computed.read().unwrap();
        let entry = map.get(key)?;
        if entry.stored_at.elapsed() > entry.ttl {
            return None;
        }
        for (dep, recorded) in &entry.deps {
            let current = mtime_of(dep);
            let changed = match (recorded, current) {
                (Some(recorded), Some(current)) => current > *recorded,
                (None, None) => false,
                _ => true,
            };
            if changed {
                return None;
            }
        }
        entry.value.clone().downcast::<T>().ok()
    }

    /// Named computation with declared file dependencies. Valid until the TTL
    /// lapses or any dep's mtime advances. Concurrent callers for the same
    /// key coalesce into one computation; every waiter gets its result.
    pub async fn get_computed<T, F, Fut>(
        &self,
        key: &str,
        deps: Vec<PathBuf>,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(value) = self.lookup_computed::<T>(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let latch = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = latch.lock().await;

        // A coalesced waiter finds the fresh value stored by the leader.
        if let Some(value) = self.lookup_computed::<T>(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let result = compute().await;
        self.inflight.lock().await.remove(key);
        let value = Arc::new(result?);
        let deps: Vec<(PathBuf, Option<SystemTime>)> = deps
            .into_iter()
            .map(|p| {
                let mtime = mtime_of(&p);
                (p, mtime)
            })
            .collect();

        self.computed.write().unwrap().insert(
            key.to_string(),
            ComputedEntry {
                value: value.clone(),
                deps,
                stored_at: Instant::now(),
                ttl: ttl.unwrap_or(self.cfg.computed_ttl),
            },
        );
        Ok(value)
    }

    // -- process snapshot --------------------------------------------------

    /// Process list with a 500 ms wall-clock TTL; `refresh` runs only on a
    /// stale or empty slot.
    pub fn get_processes<F>(&self, refresh: F) -> Result<Arc<Vec<ProcessInfo>>>
    where
        F: FnOnce() -> Result<Vec<ProcessInfo>>,
    {
        if let Some((snapshot, stored_at)) = self.processes.read().unwrap().as_ref() {
            if stored_at.elapsed() <= self.cfg.process_ttl {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(snapshot.clone());
            }
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(refresh()?);
        *self.processes.write().unwrap() = Some((snapshot.clone(), Instant::now()));
        Ok(snapshot)
    }

    // -- invalidation ------------------------------------------------------

    /// Drop a path from the file, parsed, and metadata caches and clear every
    /// computation that declared it as a dependency.
    pub fn invalidate_file(&self, path: &Path) {
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);

        let mut removed = false;
        removed |= self.files.write().unwrap().remove(path).is_some();
        removed |= self.parsed.write().unwrap().remove(path).is_some();
        removed |= self.metadata.write().unwrap().remove(path).is_some();
        if removed {
            self.stats.files_invalidated.fetch_add(1, Ordering::Relaxed);
        }

        let mut computed = self.computed.write().unwrap();
        let before = computed.len();
        computed.retain(|_, entry| !entry.deps.iter().any(|(dep, _)| dep == path));
        let dropped = (before - computed.len()) as u64;
        if dropped > 0 {
            self.stats
                .computations_invalidated
                .fetch_add(dropped, Ordering::Relaxed);
        }
    }

    /// Clear all computations (but no file-level entries).
    pub fn invalidate_computations(&self) {
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
        let mut computed = self.computed.write().unwrap();
        let dropped = computed.len() as u64;
        computed.clear();
        self.stats
            .computations_invalidated
            .fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn clear_all(&self) {
        self.files.write().unwrap().clear();
        self.parsed.write().unwrap().clear();
        self.computed.write().unwrap().clear();
        self.metadata.write().unwrap().clear();
        *self.processes.write().unwrap() = None;
        self.stats.reset();
    }

    // -- sweep -------------------------------------------------------------

    /// One periodic pass: drop entries past their TTL, then trim each cache
    /// to the entry cap, oldest stored first.
    pub fn sweep(&self) {
        let mut evicted = 0u64;
        evicted += sweep_map(&self.files, self.cfg.file_ttl, self.cfg.max_entries, |e| {
            e.stored_at
        });
        evicted += sweep_map(
            &self.parsed,
            self.cfg.parsed_ttl,
            self.cfg.max_entries,
            |e| e.stored_at,
        );
        evicted += sweep_map(
            &self.metadata,
            self.cfg.metadata_ttl,
            self.cfg.max_entries,
            |e| e.stored_at,
        );

        {
            let mut computed = self.computed.write().unwrap();
            let before = computed.len();
            computed.retain(|_, e| e.stored_at.elapsed() <= e.ttl);
            if computed.len() > self.cfg.max_entries {
                let mut by_age: Vec<(String, Instant)> = computed
                    .iter()
                    .map(|(k, e)| (k.clone(), e.stored_at))
                    .collect();
                by_age.sort_by_key(|(_, stored)| *stored);
                let excess = computed.len() - self.cfg.max_entries;
                for (key, _) in by_age.into_iter().take(excess) {
                    computed.remove(&key);
                }
            }
            evicted += (before - computed.len()) as u64;
        }

        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.cfg.sweep_interval
    }
}

fn sweep_map<K, V>(
    map: &RwLock<HashMap<K, V>>,
    ttl: Duration,
    cap: usize,
    stored_at: impl Fn(&V) -> Instant,
) -> u64
where
    K: Clone + std::hash::Hash + Eq + Ord,
{
    let mut map = map.write().unwrap();
    let before = map.len();
    map.retain(|_, v| stored_at(v).elapsed() <= ttl);
    if map.len() > cap {
        let mut by_age: Vec<(K, Instant)> =
            map.iter().map(|(k, v)| (k.clone(), stored_at(v))).collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let excess = map.len() - cap;
        for (key, _) in by_age.into_iter().take(excess) {
            map.remove(&key);
        }
    }
    (before - map.len()) as u64
}
