//! Recursive log-tree watcher.
//!
//! Bridges notify's callback thread into the tokio world over an mpsc
//! channel, then debounces per path: a burst of appends to one file becomes
//! one refresh. `.jsonl` events invalidate the cache before the data callback
//! fires; changes inside hint directories (todos and friends) only nudge the
//! process refresher.

use crate::cache::DataCache;
use crate::error::{LookoutError, Result};
use crate::perf::PerfMonitor;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub debounce: Duration,
    /// Directory names whose contents hint at process activity.
    pub hint_dirs: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            debounce: Duration::from_millis(250),
            hint_dirs: vec!["todos".to_string()],
        }
    }
}

pub struct FileWatcher {
    paused: Arc<AtomicBool>,
    watcher: Option<RecommendedWatcher>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl FileWatcher {
    /// Begin watching `root` recursively. Fails with `WatcherFailed` when the
    /// OS watch cannot be established.
    pub fn start<D, P>(
        root: &Path,
        cfg: WatcherConfig,
        cache: Arc<DataCache>,
        perf: Arc<PerfMonitor>,
        on_data: D,
        on_process: P,
    ) -> Result<FileWatcher>
    where
        D: Fn(PathBuf) + Send + Sync + 'static,
        P: Fn(PathBuf) + Send + Sync + 'static,
    {
        let (tx, rx) = tokio::sync::mpsc::channel::<PathBuf>(256);
        let paused = Arc::new(AtomicBool::new(false));

        let mut watcher = {
            let tx = tx.clone();
            let paused = paused.clone();
            let perf = perf.clone();
            notify::recommended_watcher(move |res: std::result::Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if paused.load(Ordering::Relaxed) {
                            return;
                        }
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            return;
                        }
                        for path in event.paths {
                            let _ = tx.blocking_send(path);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "watch event error");
                        perf.incr("watcher.transient_errors");
                    }
                }
            })
            .map_err(|e| LookoutError::WatcherFailed(e.to_string()))?
        };

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| LookoutError::WatcherFailed(e.to_string()))?;

        let task = tokio::spawn(debounce_loop(rx, cfg, cache, on_data, on_process));

        Ok(FileWatcher {
            paused,
            watcher: Some(watcher),
            task: Some(task),
        })
    }

    /// While paused, incoming events are dropped, not queued.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Release OS watch resources and stop the debounce task.
    pub fn stop(&mut self) {
        self.watcher.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn debounce_loop<D, P>(
    mut rx: tokio::sync::mpsc::Receiver<PathBuf>,
    cfg: WatcherConfig,
    cache: Arc<DataCache>,
    on_data: D,
    on_process: P,
) where
    D: Fn(PathBuf) + Send + Sync + 'static,
    P: Fn(PathBuf) + Send + Sync + 'static,
{
    // path -> deadline; the first event in a window sets the deadline, later
    // ones coalesce into it.
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
    let tick = cfg.debounce.min(Duration::from_millis(50)).max(Duration::from_millis(10));

    loop {
        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(path) => {
                        pending
                            .entry(path)
                            .or_insert_with(|| Instant::now() + cfg.debounce);
                    }
                    None => break, // watcher dropped, channel closed
                }
            }
            _ = tokio::time::sleep(tick), if !pending.is_empty() => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    pending.remove(&path);
                    dispatch(&path, &cfg, &cache, &on_data, &on_process);
                }
            }
        }
    }
}

fn dispatch<D, P>(path: &Path, cfg: &WatcherConfig, cache: &DataCache, on_data: &D, on_process: &P)
where
    D: Fn(PathBuf),
    P: Fn(PathBuf),
{
    if path.extension().is_some_and(|ext| ext == "jsonl") {
        // Invalidate before notifying so the refresh reads fresh bytes.
        cache.invalidate_file(path);
        on_data(path.to_path_buf());
    } else if in_hint_dir(path, &cfg.hint_dirs) {
        on_process(path.to_path_buf());
    }
}

fn in_hint_dir(path: &Path, hint_dirs: &[String]) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|name| hint_dirs.iter().any(|h| h == name))
    })
}
